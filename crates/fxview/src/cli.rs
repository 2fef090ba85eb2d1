use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use composer::ParamValue;
use renderer::Antialiasing;

#[derive(Parser, Debug)]
#[command(
    name = "fxview",
    author,
    version,
    about = "Scene viewer with a configurable post-processing chain"
)]
pub struct Args {
    /// Pipeline configuration file; defaults to `pipeline.toml` in the config directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the window or output size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Device pixel ratio for headless rendering (clamped to 2).
    #[arg(long, value_name = "RATIO")]
    pub dpr: Option<f32>,

    /// Render with the CPU backend and write the last frame as PNG.
    #[arg(long)]
    pub headless: bool,

    /// Frames to render before exiting (headless default: 1).
    #[arg(long, value_name = "N")]
    pub frames: Option<u64>,

    /// PNG path written by `--headless`.
    #[arg(long, value_name = "PATH", default_value = "fxview.png")]
    pub output: PathBuf,

    /// Initial parameter override, e.g. `--set bloom.strength=0.8`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub overrides: Vec<(String, ParamValue)>,

    /// Print the parameter registry as JSON and exit.
    #[arg(long)]
    pub list_parameters: bool,

    /// Displacement variant used for `normal-displacement` effects.
    #[arg(long, value_enum, default_value_t = Displacement::Static)]
    pub displacement: Displacement,

    /// Anti-aliasing policy: `auto` or `off`. Overrides the config file.
    #[arg(long, value_name = "MODE", value_parser = parse_antialias)]
    pub antialias: Option<Antialiasing>,

    /// Seed for randomised effects. Overrides the config file.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Displacement {
    /// Normal-map driven distortion.
    #[default]
    Static,
    /// Time-driven sine wave distortion.
    Animated,
}

pub fn parse() -> Args {
    Args::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1280x720".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}'", width.trim()))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}'", height.trim()))?;

    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_assignment(value: &str) -> Result<(String, ParamValue), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))?;
    let key = key.trim();
    if !key.contains('.') {
        return Err(format!("parameter key '{key}' must look like stage.parameter"));
    }
    let parsed = ParamValue::parse(raw)
        .ok_or_else(|| format!("'{}' is neither a number nor true/false", raw.trim()))?;
    Ok((key.to_string(), parsed))
}

pub fn parse_antialias(value: &str) -> Result<Antialiasing, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("anti-alias mode must not be empty".to_string());
    }

    let normalized = trimmed.to_ascii_lowercase();
    match normalized.as_str() {
        "auto" | "on" | "default" | "4" => Ok(Antialiasing::Auto),
        "off" | "none" | "disable" | "disabled" | "0" | "1" => Ok(Antialiasing::Off),
        other => Err(format!("unknown anti-alias mode '{other}'; expected auto or off")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_accepts_common_separators() {
        assert_eq!(parse_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_size(" 64 X 48 ").unwrap(), (64, 48));
        assert_eq!(parse_size("800×600").unwrap(), (800, 600));
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("1280").is_err());
        assert!(parse_size("ax10").is_err());
    }

    #[test]
    fn assignment_parses_numbers_and_switches() {
        assert_eq!(
            parse_assignment("bloom.strength=0.8").unwrap(),
            ("bloom.strength".to_string(), ParamValue::Float(0.8))
        );
        assert_eq!(
            parse_assignment("glitch.enabled=on").unwrap(),
            ("glitch.enabled".to_string(), ParamValue::Bool(true))
        );
        assert!(parse_assignment("strength=0.8").is_err());
        assert!(parse_assignment("bloom.strength").is_err());
        assert!(parse_assignment("bloom.strength=lots").is_err());
    }

    #[test]
    fn antialias_modes() {
        assert_eq!(parse_antialias("AUTO").unwrap(), Antialiasing::Auto);
        assert_eq!(parse_antialias("0").unwrap(), Antialiasing::Off);
        assert!(parse_antialias("").is_err());
        assert!(parse_antialias("8").is_err());
    }

    #[test]
    fn flags_compose() {
        let args = Args::try_parse_from([
            "fxview",
            "--headless",
            "--size",
            "32x24",
            "--set",
            "bloom.strength=1",
            "--set",
            "tint.red-x=0.2",
            "--displacement",
            "animated",
        ])
        .unwrap();
        assert!(args.headless);
        assert_eq!(args.size, Some((32, 24)));
        assert_eq!(args.overrides.len(), 2);
        assert_eq!(args.displacement, Displacement::Animated);
        assert_eq!(args.output, PathBuf::from("fxview.png"));
        assert!(args.antialias.is_none());
    }
}

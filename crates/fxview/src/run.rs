use anyhow::{Context, Result};
use composer::{ParamValue, ViewportState};
use fxconfig::{AntialiasSetting, PowerSetting, ViewerConfig};
use renderer::{Antialiasing, ComposerSetup, GpuPowerPreference, RendererConfig, WindowRuntime};
use tracing_subscriber::EnvFilter;

use crate::bindings::{scene_parts, SceneParts};
use crate::cli::Args;
use crate::{headless, panel, paths};

/// Per-run settings shared by the interactive and headless paths.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub seed: Option<u64>,
    pub overrides: Vec<(String, ParamValue)>,
}

impl Session {
    fn new(args: &Args, config: &ViewerConfig) -> Self {
        Self {
            seed: args.seed.or(config.render.seed),
            overrides: args.overrides.clone(),
        }
    }

    pub fn apply_overrides<F>(&self, mut set: F) -> Result<()>
    where
        F: FnMut(&str, ParamValue) -> Result<ParamValue>,
    {
        for (key, value) in &self.overrides {
            let stored = set(key, *value).with_context(|| format!("invalid override {key}={value}"))?;
            tracing::info!(key = %key, value = %stored, "applied parameter override");
        }
        Ok(())
    }
}

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let config = load_config(&args)?;
    let parts = scene_parts(&config, args.displacement)?;
    let session = Session::new(&args, &config);

    if args.list_parameters {
        return list_parameters(parts, &session, &config, &args);
    }
    if args.headless {
        let viewport = headless_viewport(&args, &config);
        let mut composer = headless::build(parts, &session, viewport)?;
        return headless::export(&mut composer, args.frames.unwrap_or(1), &args.output);
    }
    run_interactive(&args, &config, parts, session)
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<ViewerConfig> {
    match paths::discover_config(args.config.as_deref())? {
        Some(path) => {
            let config = ViewerConfig::load(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                effects = config.effects.len(),
                "loaded pipeline config"
            );
            Ok(config)
        }
        None => {
            tracing::info!("using built-in pipeline config");
            Ok(ViewerConfig::default())
        }
    }
}

fn window_size(args: &Args, config: &ViewerConfig) -> (u32, u32) {
    args.size
        .unwrap_or((config.window.width, config.window.height))
}

fn headless_viewport(args: &Args, config: &ViewerConfig) -> ViewportState {
    let (width, height) = window_size(args, config);
    let ratio = args.dpr.or(config.render.pixel_ratio).unwrap_or(1.0);
    ViewportState::new(width, height, ratio)
}

/// Prints the registry of a freshly built pipeline; no window or GPU needed.
fn list_parameters(
    mut parts: SceneParts,
    session: &Session,
    config: &ViewerConfig,
    args: &Args,
) -> Result<()> {
    // Registry contents do not depend on loaded images.
    parts.assets.clear();
    let composer = headless::build(parts, session, headless_viewport(args, config))?;
    let json = serde_json::to_string_pretty(&composer.parameters())
        .context("failed to serialise parameter registry")?;
    println!("{json}");
    Ok(())
}

fn run_interactive(
    args: &Args,
    config: &ViewerConfig,
    parts: SceneParts,
    session: Session,
) -> Result<()> {
    if args.dpr.is_some() {
        tracing::warn!("--dpr only applies to headless rendering; the window reports its own scale");
    }

    let antialiasing = args.antialias.unwrap_or(match config.render.antialias {
        AntialiasSetting::Auto => Antialiasing::Auto,
        AntialiasSetting::Off => Antialiasing::Off,
    });
    let renderer_config = RendererConfig {
        window_size: window_size(args, config),
        title: config.window.title.clone(),
        antialiasing,
        power: match config.render.power {
            PowerSetting::Low => GpuPowerPreference::Low,
            PowerSetting::High => GpuPowerPreference::High,
        },
        show_window: true,
        frame_limit: args.frames,
    };

    let setup: ComposerSetup = Box::new(move |backend, viewport| {
        let mut composer = composer::Composer::new(
            backend,
            parts.builder,
            parts.scene,
            parts.camera,
            viewport,
        )?
        .with_controls(parts.controls);
        if let Some(seed) = session.seed {
            composer = composer.with_seed(seed);
        }
        for request in parts.assets {
            composer.attach_asset(request.spawn());
        }
        session.apply_overrides(|key, value| composer.set_parameter(key, value).map_err(Into::into))?;
        Ok(composer)
    });

    let runtime = WindowRuntime::spawn(renderer_config, setup)?;
    tracing::info!("type 'help' for control panel commands");
    if let Err(err) = panel::spawn(runtime.control()) {
        tracing::warn!(error = %err, "control panel unavailable");
    }
    runtime.wait()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_overrides_config_for_size_seed_and_ratio() {
        let mut config = ViewerConfig::default();
        config.render.seed = Some(1);
        config.render.pixel_ratio = Some(1.5);

        let args = Args::try_parse_from(["fxview", "--headless"]).unwrap();
        let viewport = headless_viewport(&args, &config);
        assert_eq!((viewport.width, viewport.height), (800, 600));
        assert_eq!(viewport.pixel_ratio(), 1.5);
        assert_eq!(Session::new(&args, &config).seed, Some(1));

        let args = Args::try_parse_from([
            "fxview", "--headless", "--size", "64x32", "--dpr", "3", "--seed", "9",
        ])
        .unwrap();
        let viewport = headless_viewport(&args, &config);
        assert_eq!((viewport.width, viewport.height), (64, 32));
        assert_eq!(viewport.pixel_ratio(), 2.0);
        assert_eq!(Session::new(&args, &config).seed, Some(9));
    }

    #[test]
    fn overrides_stop_at_first_error() {
        let session = Session {
            seed: None,
            overrides: vec![
                ("a.x".into(), ParamValue::Float(1.0)),
                ("b.y".into(), ParamValue::Float(2.0)),
                ("c.z".into(), ParamValue::Float(3.0)),
            ],
        };
        let mut seen = Vec::new();
        let result = session.apply_overrides(|key, value| {
            seen.push(key.to_string());
            if key == "b.y" {
                anyhow::bail!("rejected");
            }
            Ok(value)
        });
        assert!(result.is_err());
        assert_eq!(seen, vec!["a.x", "b.y"]);
    }
}

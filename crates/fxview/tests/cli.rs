use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn fxview(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fxview"))
        .args(args)
        .env("FXVIEW_CONFIG_DIR", config_dir)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch fxview")
}

#[test]
fn headless_export_writes_png() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("pipeline.toml"),
        r#"
version = 1

[scene]
tone_mapping = "none"

[[effects]]
kind = "bloom"

[[effects]]
kind = "tint"
uTint = [0.2, 0.0, 0.0]
"#,
    )
    .unwrap();
    let output = dir.path().join("frame.png");

    let result = fxview(
        dir.path(),
        &[
            "--headless",
            "--size",
            "32x24",
            "--frames",
            "2",
            "--set",
            "bloom.strength=0.5",
            "--output",
            output.to_str().unwrap(),
        ],
    );
    assert!(
        result.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&result.stderr)
    );

    let bytes = fs::read(&output).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
}

#[test]
fn list_parameters_prints_registry_json() {
    let dir = TempDir::new().unwrap();
    let result = fxview(
        dir.path(),
        &["--list-parameters", "--set", "bloom.threshold=0.25"],
    );
    assert!(
        result.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&result.stderr)
    );

    let registry: serde_json::Value = serde_json::from_slice(&result.stdout).unwrap();
    let entries = registry.as_array().unwrap();
    let find = |key: &str| {
        entries
            .iter()
            .find(|entry| entry["key"] == key)
            .unwrap_or_else(|| panic!("missing {key}"))
    };
    assert_eq!(find("bloom.threshold")["value"], serde_json::json!(0.25));
    assert_eq!(find("glitch.enabled")["value"], serde_json::json!(false));
    assert!(find("tint.red-x")["min"].is_number());
    assert!(entries.iter().all(|entry| entry["key"] != "color-correction.enabled"));
}

#[test]
fn invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("pipeline.toml"), "version = 9\n").unwrap();

    let result = fxview(dir.path(), &["--list-parameters"]);
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("unsupported config version 9"), "stderr: {stderr}");
}

#[test]
fn unknown_override_fails_before_rendering() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("never.png");
    let result = fxview(
        dir.path(),
        &[
            "--headless",
            "--size",
            "8x8",
            "--set",
            "bloom.brightness=1",
            "--output",
            output.to_str().unwrap(),
        ],
    );
    assert!(!result.status.success());
    assert!(!output.exists());
}

use std::fs;

use fxconfig::{ConfigError, EffectKindSetting, ViewerConfig};
use tempfile::tempdir;

#[test]
fn load_anchors_assets_next_to_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("viewer.toml");
    fs::write(
        &path,
        r#"
version = 1

[scene]
environment = "maps/sky.hdr"

[[effects]]
kind = "normal-displacement"
normal_map = "maps/normal.png"
"#,
    )
    .unwrap();

    let config = ViewerConfig::load(&path).unwrap();
    assert_eq!(
        config.scene.environment.as_deref(),
        Some(dir.path().join("maps/sky.hdr").as_path())
    );
    assert_eq!(config.effects.len(), 1);
    assert_eq!(config.effects[0].kind, EffectKindSetting::NormalDisplacement);
    assert_eq!(
        config.effects[0].normal_map.as_deref(),
        Some(dir.path().join("maps/normal.png").as_path())
    );
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    match ViewerConfig::load(&path) {
        Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn serialized_defaults_load_back_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("defaults.toml");
    let mut expected = ViewerConfig::default();
    expected.scene.environment = Some(dir.path().join("sky.hdr"));
    for effect in &mut expected.effects {
        if let Some(normal_map) = effect.normal_map.as_mut() {
            *normal_map = dir.path().join("normal.png");
        }
    }
    fs::write(&path, expected.to_toml_string().unwrap()).unwrap();

    assert_eq!(ViewerConfig::load(&path).unwrap(), expected);
}

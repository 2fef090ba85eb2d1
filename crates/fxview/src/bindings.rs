//! Maps the parsed configuration onto composer types.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use composer::{
    decode_image, load_image, AssetHandle, AssetTarget, DirectionalLight, EffectKind,
    OrbitControls, PendingAsset, PerspectiveCamera, PipelineBuilder, Scene, Sphere, Stage,
    TextureEncoding, ToneMapping, UniformValue,
};
use fxconfig::{
    CameraConfig, EffectConfig, EffectKindSetting, SceneConfig, ToneMappingSetting,
    UniformSetting, ViewerConfig,
};
use glam::Vec3;

use crate::cli::Displacement;

const NORMAL_MAP_UNIFORM: &str = "uNormalMap";

/// An image to load and the slot it fills once resident.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRequest {
    pub target: AssetTarget,
    pub path: PathBuf,
    pub encoding: TextureEncoding,
}

impl AssetRequest {
    /// Decodes on a worker thread; the composer binds it when it arrives.
    pub fn spawn(self) -> PendingAsset {
        PendingAsset::new(self.target, load_image(self.path, self.encoding))
    }

    /// Decodes on the calling thread so the first frame already sees the result.
    pub fn load_now(self) -> PendingAsset {
        let label = self.path.display().to_string();
        let handle = match decode_image(&self.path, self.encoding) {
            Ok(image) => AssetHandle::ready(label, image),
            Err(err) => AssetHandle::failed(label, err),
        };
        PendingAsset::new(self.target, handle)
    }
}

/// Everything needed to construct a composer, minus the backend.
pub struct SceneParts {
    pub scene: Scene,
    pub camera: PerspectiveCamera,
    pub controls: OrbitControls,
    pub builder: PipelineBuilder,
    pub assets: Vec<AssetRequest>,
}

pub fn scene_parts(config: &ViewerConfig, displacement: Displacement) -> Result<SceneParts> {
    let mut assets = Vec::new();
    if let Some(path) = &config.scene.environment {
        assets.push(AssetRequest {
            target: AssetTarget::Environment,
            path: path.clone(),
            encoding: TextureEncoding::Color,
        });
    }

    let mut builder = PipelineBuilder::new();
    for effect in &config.effects {
        let (stage, normal_map) = build_stage(effect, displacement)?;
        if let Some(path) = normal_map {
            assets.push(AssetRequest {
                target: AssetTarget::StageTexture {
                    stage: stage.name().to_string(),
                    uniform: NORMAL_MAP_UNIFORM.to_string(),
                },
                path,
                encoding: TextureEncoding::Data,
            });
        }
        builder.push(stage);
    }

    Ok(SceneParts {
        scene: build_scene(&config.scene)?,
        camera: build_camera(&config.camera),
        controls: OrbitControls::new()
            .with_damping(config.camera.damping, config.camera.damping_factor),
        builder,
        assets,
    })
}

fn build_scene(config: &SceneConfig) -> Result<Scene> {
    let mut scene = Scene::new();
    scene.clear_color = config.clear_color;
    scene.environment_intensity = config.environment_intensity;
    scene.exposure = config.exposure;
    scene.tone_mapping = match config.tone_mapping {
        ToneMappingSetting::None => ToneMapping::None,
        ToneMappingSetting::AcesFilmic => ToneMapping::AcesFilmic,
    };
    scene.light = DirectionalLight {
        position: Vec3::from(config.light.position),
        color: config.light.color,
        intensity: config.light.intensity,
    };
    for sphere in &config.spheres {
        scene.add_sphere(
            Sphere::new(Vec3::from(sphere.center), sphere.radius, sphere.color)
                .with_material(sphere.roughness, sphere.metalness),
        )?;
    }
    Ok(scene)
}

/// Aspect is fixed up by the composer from the viewport.
fn build_camera(config: &CameraConfig) -> PerspectiveCamera {
    PerspectiveCamera::new(config.fov, 1.0, config.near, config.far)
        .with_position(Vec3::from(config.position))
        .with_target(Vec3::from(config.target))
}

fn build_stage(
    effect: &EffectConfig,
    displacement: Displacement,
) -> Result<(Stage, Option<PathBuf>)> {
    let swapped = effect.kind == EffectKindSetting::NormalDisplacement
        && displacement == Displacement::Animated;
    let kind = if swapped {
        EffectKind::WaveDisplacement
    } else {
        EffectKind::parse(effect.kind.as_str())
            .ok_or_else(|| anyhow!("unsupported effect kind '{}'", effect.kind.as_str()))?
    };

    let mut stage = Stage::effect(kind);
    if let Some(name) = &effect.name {
        stage = stage.with_name(name);
    }
    if let Some(enabled) = effect.enabled {
        stage = stage.with_enabled(enabled);
    }

    for (name, setting) in &effect.uniforms {
        let Some(declared) = stage.uniforms().get(name).copied() else {
            if swapped {
                tracing::warn!(
                    stage = stage.name(),
                    uniform = %name,
                    "uniform does not apply to the animated displacement; ignoring"
                );
                continue;
            }
            bail!("effect '{}' has no uniform '{name}'", stage.name());
        };
        let value = uniform_value(&declared, setting)
            .with_context(|| format!("effect '{}' uniform '{name}'", stage.name()))?;
        stage = stage.with_uniform(name, value);
    }

    let normal_map = if swapped {
        None
    } else {
        effect.normal_map.clone()
    };
    Ok((stage, normal_map))
}

fn uniform_value(declared: &UniformValue, setting: &UniformSetting) -> Result<UniformValue> {
    match (declared, setting) {
        (UniformValue::Float(_), UniformSetting::Float(value)) => Ok(UniformValue::Float(*value)),
        (UniformValue::Vec2(_), UniformSetting::Vector(values)) if values.len() == 2 => {
            Ok(UniformValue::Vec2([values[0], values[1]]))
        }
        (UniformValue::Vec3(_), UniformSetting::Vector(values)) if values.len() == 3 => {
            Ok(UniformValue::Vec3([values[0], values[1], values[2]]))
        }
        (UniformValue::Texture(_), _) => bail!("texture uniforms are bound from image paths"),
        (UniformValue::Float(_), _) => bail!("expected a number"),
        (UniformValue::Vec2(_), _) => bail!("expected 2 components"),
        (UniformValue::Vec3(_), _) => bail!("expected 3 components"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_reproduces_the_effect_chain() {
        let parts = scene_parts(&ViewerConfig::default(), Displacement::Static).unwrap();
        let names: Vec<&str> = parts.builder.effects().iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec!["dot-screen", "glitch", "rgb-shift", "bloom", "tint", "normal-displacement"]
        );
        let enabled: Vec<bool> = parts.builder.effects().iter().map(Stage::is_enabled).collect();
        assert_eq!(enabled, vec![false, false, false, true, true, true]);

        assert_eq!(parts.assets.len(), 2);
        assert_eq!(parts.assets[0].target, AssetTarget::Environment);
        assert_eq!(parts.assets[0].encoding, TextureEncoding::Color);
        assert_eq!(
            parts.assets[1].target,
            AssetTarget::StageTexture {
                stage: "normal-displacement".into(),
                uniform: NORMAL_MAP_UNIFORM.into(),
            }
        );
        assert_eq!(parts.assets[1].encoding, TextureEncoding::Data);

        assert_eq!(parts.scene.spheres().len(), 1);
        assert_eq!(parts.camera.position, Vec3::new(4.0, 1.0, -4.0));
    }

    #[test]
    fn animated_displacement_swaps_kind_and_drops_normal_map() {
        let parts = scene_parts(&ViewerConfig::default(), Displacement::Animated).unwrap();
        let last = parts.builder.effects().last().unwrap();
        assert_eq!(last.effect_kind(), Some(EffectKind::WaveDisplacement));
        assert_eq!(parts.assets.len(), 1);
    }

    #[test]
    fn uniform_overrides_follow_declared_types() {
        let config = ViewerConfig::from_toml_str(
            r#"
version = 1

[[effects]]
kind = "tint"
name = "warm"
enabled = false
uTint = [0.2, 0.1, 0.0]

[[effects]]
kind = "dot-screen"
center = [0.25, 0.75]
"#,
        )
        .unwrap();
        let parts = scene_parts(&config, Displacement::Static).unwrap();
        let tint = &parts.builder.effects()[0];
        assert_eq!(tint.name(), "warm");
        assert!(!tint.is_enabled());
        assert_eq!(tint.uniforms().vec3("uTint"), [0.2, 0.1, 0.0]);
        assert_eq!(parts.builder.effects()[1].uniforms().vec2("center"), [0.25, 0.75]);
    }

    #[test]
    fn mismatched_or_unknown_uniforms_are_rejected() {
        for body in [
            "[[effects]]\nkind = \"bloom\"\nstrength = [1.0, 2.0]\n",
            "[[effects]]\nkind = \"bloom\"\nbrightness = 1.0\n",
            "[[effects]]\nkind = \"tint\"\nuTint = 0.5\n",
        ] {
            let config = ViewerConfig::from_toml_str(&format!("version = 1\n{body}")).unwrap();
            assert!(scene_parts(&config, Displacement::Static).is_err(), "{body}");
        }
    }

    #[test]
    fn missing_asset_loads_as_failed_handle() {
        let request = AssetRequest {
            target: AssetTarget::Environment,
            path: PathBuf::from("/nonexistent/sky.hdr"),
            encoding: TextureEncoding::Color,
        };
        let mut pending = request.load_now();
        assert!(matches!(
            pending.handle.poll(),
            composer::AssetPoll::Failed(_)
        ));
    }
}

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// The only schema version this crate understands.
pub const CONFIG_VERSION: u32 = 1;

/// Scene sphere limit; mirrors the renderer's fixed uniform array.
pub const MAX_SPHERES: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the viewer needs to assemble a scene and an effect chain.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ViewerConfig {
    pub version: u32,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default = "default_effects")]
    pub effects: Vec<EffectConfig>,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "fxview".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub damping: bool,
    pub damping_factor: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 75.0,
            near: 0.1,
            far: 100.0,
            position: [4.0, 1.0, -4.0],
            target: [0.0, 0.0, 0.0],
            damping: true,
            damping_factor: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToneMappingSetting {
    None,
    #[default]
    AcesFilmic,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LightConfig {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            position: [0.25, 3.0, -2.25],
            color: [1.0, 1.0, 1.0],
            intensity: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SphereConfig {
    pub center: [f32; 3],
    pub radius: f32,
    #[serde(default = "default_sphere_color")]
    pub color: [f32; 3],
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub metalness: f32,
}

fn default_sphere_color() -> [f32; 3] {
    [0.8, 0.8, 0.8]
}

fn default_roughness() -> f32 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Equirectangular HDR used for background and lighting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<PathBuf>,
    pub environment_intensity: f32,
    pub exposure: f32,
    pub tone_mapping: ToneMappingSetting,
    pub clear_color: [f32; 3],
    pub light: LightConfig,
    pub spheres: Vec<SphereConfig>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            environment: Some(PathBuf::from("textures/environmentMaps/cockpit.hdr")),
            environment_intensity: 2.5,
            exposure: 1.0,
            tone_mapping: ToneMappingSetting::AcesFilmic,
            clear_color: [0.0, 0.0, 0.0],
            light: LightConfig::default(),
            // Stand-in for the helmet model: a metallic sphere where it sat.
            spheres: vec![SphereConfig {
                center: [0.0, 0.0, 0.0],
                radius: 1.6,
                color: [0.8, 0.8, 0.8],
                roughness: 0.35,
                metalness: 0.8,
            }],
        }
    }
}

/// Effects a config may declare; the pipeline appends colour correction and
/// antialiasing on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKindSetting {
    DotScreen,
    Glitch,
    RgbShift,
    Bloom,
    Tint,
    NormalDisplacement,
    WaveDisplacement,
}

impl EffectKindSetting {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DotScreen => "dot-screen",
            Self::Glitch => "glitch",
            Self::RgbShift => "rgb-shift",
            Self::Bloom => "bloom",
            Self::Tint => "tint",
            Self::NormalDisplacement => "normal-displacement",
            Self::WaveDisplacement => "wave-displacement",
        }
    }
}

/// A uniform override: a number or a 2/3-component vector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UniformSetting {
    Float(f32),
    Vector(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EffectConfig {
    pub kind: EffectKindSetting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Only meaningful for `normal-displacement`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_map: Option<PathBuf>,
    /// Remaining keys override the stage's uniforms by name.
    #[serde(flatten)]
    pub uniforms: BTreeMap<String, UniformSetting>,
}

impl EffectConfig {
    pub fn new(kind: EffectKindSetting) -> Self {
        Self {
            kind,
            name: None,
            enabled: None,
            normal_map: None,
            uniforms: BTreeMap::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Stage name: explicit `name`, else the kind identifier.
    pub fn stage_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.as_str())
    }
}

/// The chain the viewer runs without a config file.
pub fn default_effects() -> Vec<EffectConfig> {
    let mut displacement = EffectConfig::new(EffectKindSetting::NormalDisplacement);
    displacement.normal_map = Some(PathBuf::from("textures/interfaceNormalMap.png"));
    vec![
        EffectConfig::new(EffectKindSetting::DotScreen).with_enabled(false),
        EffectConfig::new(EffectKindSetting::Glitch).with_enabled(false),
        EffectConfig::new(EffectKindSetting::RgbShift).with_enabled(false),
        EffectConfig::new(EffectKindSetting::Bloom),
        EffectConfig::new(EffectKindSetting::Tint),
        displacement,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AntialiasSetting {
    #[default]
    Auto,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    Low,
    #[default]
    High,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Seed for randomised effects; unset means a fresh seed per run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(deserialize_with = "deserialize_antialias")]
    pub antialias: AntialiasSetting,
    pub power: PowerSetting,
    /// Device pixel ratio for headless rendering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_ratio: Option<f32>,
}

fn deserialize_antialias<'de, D>(deserializer: D) -> Result<AntialiasSetting, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Num(i64),
        Bool(bool),
    }

    match Helper::deserialize(deserializer)? {
        Helper::Str(raw) => parse_antialias(&raw).map_err(de::Error::custom),
        Helper::Num(value) if value < 0 => {
            Err(de::Error::custom("antialias value must be non-negative"))
        }
        Helper::Num(value) => parse_antialias(&value.to_string()).map_err(de::Error::custom),
        Helper::Bool(true) => Ok(AntialiasSetting::Auto),
        Helper::Bool(false) => Ok(AntialiasSetting::Off),
    }
}

fn parse_antialias(raw: &str) -> Result<AntialiasSetting, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "auto" | "on" | "default" | "4" => Ok(AntialiasSetting::Auto),
        "off" | "none" | "disable" | "disabled" | "0" | "1" => Ok(AntialiasSetting::Off),
        other => Err(format!("invalid antialias setting '{other}'")),
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            window: WindowConfig::default(),
            camera: CameraConfig::default(),
            scene: SceneConfig::default(),
            effects: default_effects(),
            render: RenderConfig::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ViewerConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads, validates and anchors relative asset paths at the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&input)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Joins every relative asset path onto `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(environment) = self.scene.environment.as_mut() {
            anchor(environment);
        }
        for effect in &mut self.effects {
            if let Some(normal_map) = effect.normal_map.as_mut() {
                anchor(normal_map);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(
                "window width and height must be greater than zero".into(),
            ));
        }

        let camera = &self.camera;
        if !(camera.fov > 0.0 && camera.fov < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera fov must be within (0, 180) degrees, got {}",
                camera.fov
            )));
        }
        if !(camera.near > 0.0 && camera.near < camera.far) {
            return Err(ConfigError::Invalid(format!(
                "camera planes must satisfy 0 < near < far, got near {} far {}",
                camera.near, camera.far
            )));
        }
        if !(0.0..=1.0).contains(&camera.damping_factor) {
            return Err(ConfigError::Invalid(
                "camera damping_factor must be within [0, 1]".into(),
            ));
        }

        let scene = &self.scene;
        if scene.spheres.len() > MAX_SPHERES {
            return Err(ConfigError::Invalid(format!(
                "scene declares {} spheres; at most {MAX_SPHERES} are supported",
                scene.spheres.len()
            )));
        }
        for (index, sphere) in scene.spheres.iter().enumerate() {
            if sphere.radius <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "sphere {index} radius must be greater than zero"
                )));
            }
        }
        if scene.exposure <= 0.0 {
            return Err(ConfigError::Invalid("scene exposure must be greater than zero".into()));
        }

        if let Some(ratio) = self.render.pixel_ratio {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "render pixel_ratio must be positive, got {ratio}"
                )));
            }
        }

        let mut names = HashSet::new();
        for effect in &self.effects {
            let name = effect.stage_name();
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("effect names must not be empty".into()));
            }
            if !names.insert(name.to_string()) {
                return Err(ConfigError::Invalid(format!(
                    "effect name '{name}' is declared more than once"
                )));
            }
            if effect.normal_map.is_some() && effect.kind != EffectKindSetting::NormalDisplacement {
                return Err(ConfigError::Invalid(format!(
                    "effect '{name}' sets normal_map but is not normal-displacement"
                )));
            }
            for (uniform, value) in &effect.uniforms {
                if let UniformSetting::Vector(components) = value {
                    if !(2..=3).contains(&components.len()) {
                        return Err(ConfigError::Invalid(format!(
                            "effect '{name}' uniform '{uniform}' must have 2 or 3 components"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

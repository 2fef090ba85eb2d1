use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::Rng;

use crate::clock::FrameTime;
use crate::params::{ParamBinding, TextureId, TunableParameter, UniformValue, Uniforms};

/// Effects the composer knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    DotScreen,
    Glitch,
    RgbShift,
    Bloom,
    Tint,
    NormalDisplacement,
    WaveDisplacement,
    ColorCorrection,
    AntialiasFallback,
}

impl EffectKind {
    pub const ALL: [EffectKind; 9] = [
        EffectKind::DotScreen,
        EffectKind::Glitch,
        EffectKind::RgbShift,
        EffectKind::Bloom,
        EffectKind::Tint,
        EffectKind::NormalDisplacement,
        EffectKind::WaveDisplacement,
        EffectKind::ColorCorrection,
        EffectKind::AntialiasFallback,
    ];

    /// Stable identifier used for default stage names and fragment programs.
    pub fn as_str(self) -> &'static str {
        match self {
            EffectKind::DotScreen => "dot-screen",
            EffectKind::Glitch => "glitch",
            EffectKind::RgbShift => "rgb-shift",
            EffectKind::Bloom => "bloom",
            EffectKind::Tint => "tint",
            EffectKind::NormalDisplacement => "normal-displacement",
            EffectKind::WaveDisplacement => "wave-displacement",
            EffectKind::ColorCorrection => "color-correction",
            EffectKind::AntialiasFallback => "antialias-fallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// True for the stages the pipeline appends on its own.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            EffectKind::ColorCorrection | EffectKind::AntialiasFallback
        )
    }

    /// Whether the effect changes colour values (and so must precede colour correction).
    pub fn alters_color(self) -> bool {
        !matches!(self, EffectKind::AntialiasFallback)
    }
}

impl std::fmt::Display for EffectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    BaseRender,
    Effect(EffectKind),
}

/// Vertex/fragment program identifiers a backend resolves to real shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderRef {
    pub vertex: &'static str,
    pub fragment: &'static str,
}

impl ShaderRef {
    pub const FULLSCREEN_VERTEX: &'static str = "fullscreen-triangle";

    fn fullscreen(fragment: &'static str) -> Self {
        Self {
            vertex: Self::FULLSCREEN_VERTEX,
            fragment,
        }
    }
}

/// Frame counter driving the digital glitch.
///
/// A strong glitch fires every `trigger` frames (or every frame when going
/// wild), weak glitches fill the first fifth of the interval and the effect
/// bypasses itself for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlitchState {
    frame: u32,
    trigger: u32,
}

impl GlitchState {
    pub const TRIGGER_RANGE: std::ops::RangeInclusive<u32> = 120..=240;
    pub const COLUMN_SIZE: f32 = 0.05;

    pub fn new(rng: &mut StdRng) -> Self {
        Self {
            frame: 0,
            trigger: rng.gen_range(Self::TRIGGER_RANGE),
        }
    }

    pub fn trigger(&self) -> u32 {
        self.trigger
    }

    fn advance(&mut self, rng: &mut StdRng, uniforms: &mut Uniforms) {
        let go_wild = uniforms.float("goWild") > 0.5;
        uniforms.set_float("seed", rng.gen::<f32>());
        uniforms.set_float("byp", 0.0);

        let phase = self.frame % self.trigger;
        if phase == 0 || go_wild {
            uniforms.set_float("amount", rng.gen::<f32>() / 30.0);
            uniforms.set_float("angle", rng.gen_range(-PI..PI));
            uniforms.set_float("seed_x", rng.gen_range(-1.0..1.0));
            uniforms.set_float("seed_y", rng.gen_range(-1.0..1.0));
            uniforms.set_float("distortion_x", rng.gen_range(0.0..1.0));
            uniforms.set_float("distortion_y", rng.gen_range(0.0..1.0));
            self.frame = 0;
            self.trigger = rng.gen_range(Self::TRIGGER_RANGE);
        } else if (phase as f32) < self.trigger as f32 / 5.0 {
            uniforms.set_float("amount", rng.gen::<f32>() / 90.0);
            uniforms.set_float("angle", rng.gen_range(-PI..PI));
            uniforms.set_float("distortion_x", rng.gen_range(0.0..1.0));
            uniforms.set_float("distortion_y", rng.gen_range(0.0..1.0));
            uniforms.set_float("seed_x", rng.gen_range(-0.3..0.3));
            uniforms.set_float("seed_y", rng.gen_range(-0.3..0.3));
        } else {
            uniforms.set_float("byp", 1.0);
        }
        self.frame += 1;
    }
}

/// One element of the frame pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    kind: StageKind,
    enabled: bool,
    shader: ShaderRef,
    uniforms: Uniforms,
    parameters: Vec<TunableParameter>,
    glitch: Option<GlitchState>,
}

impl Stage {
    fn new(name: &str, kind: StageKind, shader: ShaderRef, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            enabled,
            shader,
            uniforms: Uniforms::new(),
            parameters: Vec::new(),
            glitch: None,
        }
    }

    fn effect_stage(kind: EffectKind, enabled: bool) -> Self {
        Self::new(
            kind.as_str(),
            StageKind::Effect(kind),
            ShaderRef::fullscreen(kind.as_str()),
            enabled,
        )
    }

    fn uniform(mut self, name: &str, value: UniformValue) -> Self {
        self.uniforms.set(name, value);
        self
    }

    fn tunable(mut self, parameter: TunableParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    fn toggle(self, label: &str) -> Self {
        self.tunable(TunableParameter::enabled(label))
    }

    /// Rasterizes the scene from the camera into the first buffer.
    pub fn base_render() -> Self {
        Self::new(
            "scene",
            StageKind::BaseRender,
            ShaderRef::fullscreen("scene"),
            true,
        )
    }

    /// Default-configured stage for `kind`.
    pub fn effect(kind: EffectKind) -> Self {
        match kind {
            EffectKind::DotScreen => Self::dot_screen(),
            EffectKind::Glitch => Self::glitch(),
            EffectKind::RgbShift => Self::rgb_shift(),
            EffectKind::Bloom => Self::bloom(),
            EffectKind::Tint => Self::tint(),
            EffectKind::NormalDisplacement => Self::normal_displacement(None),
            EffectKind::WaveDisplacement => Self::wave_displacement(),
            EffectKind::ColorCorrection => Self::color_correction(),
            EffectKind::AntialiasFallback => Self::antialias_fallback(),
        }
    }

    pub fn dot_screen() -> Self {
        Self::effect_stage(EffectKind::DotScreen, false)
            .uniform("center", UniformValue::Vec2([0.5, 0.5]))
            .uniform("angle", UniformValue::Float(1.57))
            .uniform("scale", UniformValue::Float(1.0))
            .uniform("tSize", UniformValue::Vec2([256.0, 256.0]))
            .toggle("Dot screen")
            .tunable(TunableParameter::float("angle", "angle", 0.0, 2.0 * PI, 0.001))
            .tunable(TunableParameter::float("scale", "scale", 0.1, 4.0, 0.001))
    }

    pub fn glitch() -> Self {
        let mut stage = Self::effect_stage(EffectKind::Glitch, false);
        for name in [
            "byp",
            "amount",
            "angle",
            "seed",
            "seed_x",
            "seed_y",
            "distortion_x",
            "distortion_y",
        ] {
            stage.uniforms.set_float(name, 0.0);
        }
        stage
            .uniform("col_s", UniformValue::Float(GlitchState::COLUMN_SIZE))
            .uniform("goWild", UniformValue::Float(0.0))
            .toggle("Glitch")
            .tunable(TunableParameter::switch("go_wild", "goWild").with_label("Go wild"))
    }

    pub fn rgb_shift() -> Self {
        Self::effect_stage(EffectKind::RgbShift, false)
            .uniform("amount", UniformValue::Float(0.005))
            .uniform("angle", UniformValue::Float(0.0))
            .toggle("RGB shift")
            .tunable(TunableParameter::float("amount", "amount", 0.0, 0.1, 0.0001))
            .tunable(TunableParameter::float("angle", "angle", 0.0, 2.0 * PI, 0.001))
    }

    pub fn bloom() -> Self {
        Self::effect_stage(EffectKind::Bloom, true)
            .uniform("strength", UniformValue::Float(0.3))
            .uniform("radius", UniformValue::Float(1.0))
            .uniform("threshold", UniformValue::Float(0.6))
            .uniform("smoothWidth", UniformValue::Float(0.01))
            .toggle("Unreal bloom")
            .tunable(TunableParameter::float("strength", "strength", 0.0, 2.0, 0.001))
            .tunable(TunableParameter::float("radius", "radius", 0.0, 2.0, 0.001))
            .tunable(TunableParameter::float("threshold", "threshold", 0.0, 1.0, 0.001))
    }

    pub fn tint() -> Self {
        Self::effect_stage(EffectKind::Tint, true)
            .uniform("uTint", UniformValue::Vec3([0.0, 0.0, 0.0]))
            .toggle("Tint")
            .tunable(TunableParameter::component("red-x", "uTint", 0, -1.0, 1.0, 0.001))
            .tunable(TunableParameter::component("green-y", "uTint", 1, -1.0, 1.0, 0.001))
            .tunable(TunableParameter::component("blue-z", "uTint", 2, -1.0, 1.0, 0.001))
    }

    /// Static distortion driven by a normal map; passes through until the map is bound.
    pub fn normal_displacement(normal_map: Option<TextureId>) -> Self {
        Self::effect_stage(EffectKind::NormalDisplacement, true)
            .uniform("uNormalMap", UniformValue::Texture(normal_map))
            .uniform("uStrength", UniformValue::Float(0.1))
            .toggle("Displacement")
            .tunable(TunableParameter::float("strength", "uStrength", 0.0, 0.5, 0.001))
    }

    /// Time-driven sine distortion along the vertical axis.
    pub fn wave_displacement() -> Self {
        Self::effect_stage(EffectKind::WaveDisplacement, true)
            .uniform("uTime", UniformValue::Float(0.0))
            .uniform("uAmplitude", UniformValue::Float(0.1))
            .uniform("uFrequency", UniformValue::Float(10.0))
            .toggle("Displacement")
            .tunable(TunableParameter::float("amplitude", "uAmplitude", 0.0, 0.5, 0.001))
            .tunable(TunableParameter::float("frequency", "uFrequency", 0.0, 50.0, 0.01))
    }

    pub fn color_correction() -> Self {
        Self::effect_stage(EffectKind::ColorCorrection, true)
    }

    pub fn antialias_fallback() -> Self {
        Self::effect_stage(EffectKind::AntialiasFallback, true)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Overrides a declared uniform. Values for undeclared names are ignored
    /// so the GPU block layout stays fixed per kind.
    pub fn with_uniform(mut self, name: &str, value: UniformValue) -> Self {
        if self.uniforms.get(name).is_some() {
            self.uniforms.set(name, value);
        } else {
            tracing::warn!(stage = %self.name, uniform = name, "ignoring unknown uniform");
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn effect_kind(&self) -> Option<EffectKind> {
        match self.kind {
            StageKind::Effect(kind) => Some(kind),
            StageKind::BaseRender => None,
        }
    }

    pub fn shader(&self) -> ShaderRef {
        self.shader
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn parameters(&self) -> &[TunableParameter] {
        &self.parameters
    }

    /// Base render and the pipeline-appended stages always run.
    pub fn is_mandatory(&self) -> bool {
        match self.kind {
            StageKind::BaseRender => true,
            StageKind::Effect(kind) => kind.is_reserved(),
        }
    }

    /// Whether the stage owns extra buffers beyond the shared ping-pong pair.
    pub fn owns_mip_chain(&self) -> bool {
        self.kind == StageKind::Effect(EffectKind::Bloom)
    }

    /// False while a texture input is still loading or failed to load.
    pub fn has_inputs(&self) -> bool {
        self.uniforms
            .iter()
            .all(|(_, value)| !matches!(value, UniformValue::Texture(None)))
    }

    pub fn glitch_state(&self) -> Option<&GlitchState> {
        self.glitch.as_ref()
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut bool, &mut Uniforms, &[TunableParameter]) {
        (&mut self.enabled, &mut self.uniforms, &self.parameters)
    }

    pub(crate) fn bind_texture(&mut self, uniform: &str, texture: TextureId) -> bool {
        match self.uniforms.get(uniform) {
            Some(UniformValue::Texture(_)) => {
                self.uniforms.set(uniform, UniformValue::Texture(Some(texture)));
                true
            }
            _ => false,
        }
    }

    pub(crate) fn parameter(&self, name: &str) -> Option<&TunableParameter> {
        self.parameters.iter().find(|param| param.name == name)
    }

    /// Updates per-frame driven uniforms before the stage executes.
    pub(crate) fn advance(&mut self, time: &FrameTime, rng: &mut StdRng) {
        match self.kind {
            StageKind::Effect(EffectKind::WaveDisplacement) => {
                self.uniforms.set_float("uTime", time.elapsed);
            }
            StageKind::Effect(EffectKind::Glitch) => {
                let state = self.glitch.get_or_insert_with(|| GlitchState::new(rng));
                state.advance(rng, &mut self.uniforms);
            }
            _ => {}
        }
    }

    pub(crate) fn has_enabled_toggle(&self) -> bool {
        self.parameters
            .iter()
            .any(|param| param.binding == ParamBinding::Enabled)
    }
}

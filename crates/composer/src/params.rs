use serde::Serialize;

use crate::ComposerError;

/// Opaque handle to a texture uploaded through a [`crate::FrameBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextureId(pub u32);

/// Value stored in a stage uniform slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    /// Texture input; `None` until the backing asset has been uploaded.
    Texture(Option<TextureId>),
}

impl UniformValue {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            UniformValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn component(&self, index: usize) -> Option<f32> {
        match self {
            UniformValue::Float(value) if index == 0 => Some(*value),
            UniformValue::Vec2(value) => value.get(index).copied(),
            UniformValue::Vec3(value) => value.get(index).copied(),
            _ => None,
        }
    }

    fn set_component(&mut self, index: usize, component: f32) -> bool {
        match self {
            UniformValue::Float(value) if index == 0 => *value = component,
            UniformValue::Vec2(value) if index < 2 => value[index] = component,
            UniformValue::Vec3(value) if index < 3 => value[index] = component,
            _ => return false,
        }
        true
    }
}

/// Ordered uniform table of a stage. Declaration order is the GPU block layout order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Uniforms {
    entries: Vec<(String, UniformValue)>,
}

impl Uniforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: UniformValue) -> Self {
        self.set(name, value);
        self
    }

    /// Inserts or overwrites a uniform, keeping the original slot order.
    pub fn set(&mut self, name: &str, value: UniformValue) {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set(name, UniformValue::Float(value));
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn float(&self, name: &str) -> f32 {
        self.get(name).and_then(UniformValue::as_float).unwrap_or(0.0)
    }

    pub fn vec2(&self, name: &str) -> [f32; 2] {
        match self.get(name) {
            Some(UniformValue::Vec2(value)) => *value,
            _ => [0.0; 2],
        }
    }

    pub fn vec3(&self, name: &str) -> [f32; 3] {
        match self.get(name) {
            Some(UniformValue::Vec3(value)) => *value,
            _ => [0.0; 3],
        }
    }

    pub fn texture(&self, name: &str) -> Option<TextureId> {
        match self.get(name) {
            Some(UniformValue::Texture(id)) => *id,
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn write_component(&mut self, name: &str, index: usize, value: f32) -> bool {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == name)
            .is_some_and(|(_, slot)| slot.set_component(index, value))
    }
}

/// Value exchanged with the control panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f32),
    Bool(bool),
}

impl ParamValue {
    /// Parses panel input: `true`/`false`/`on`/`off` or a number.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "true" | "on" => Some(ParamValue::Bool(true)),
            "false" | "off" => Some(ParamValue::Bool(false)),
            other => other.parse::<f32>().ok().map(ParamValue::Float),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Float(value) => write!(f, "{value}"),
            ParamValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Storage a tunable parameter reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamBinding {
    /// The owning stage's `enabled` flag.
    Enabled,
    /// A float uniform or one component of a vector uniform.
    Uniform { name: String, component: usize },
    /// A float uniform exposed as an on/off switch (stored as 0.0 / 1.0).
    Switch { name: String },
}

/// A named, bounded value owned by a stage and exposed for live mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct TunableParameter {
    pub name: String,
    pub label: String,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub binding: ParamBinding,
}

impl TunableParameter {
    pub fn enabled(label: &str) -> Self {
        Self {
            name: "enabled".into(),
            label: label.into(),
            min: 0.0,
            max: 1.0,
            step: 1.0,
            binding: ParamBinding::Enabled,
        }
    }

    pub fn float(name: &str, uniform: &str, min: f32, max: f32, step: f32) -> Self {
        Self::component(name, uniform, 0, min, max, step)
    }

    pub fn component(
        name: &str,
        uniform: &str,
        component: usize,
        min: f32,
        max: f32,
        step: f32,
    ) -> Self {
        Self {
            name: name.into(),
            label: name.into(),
            min,
            max,
            step,
            binding: ParamBinding::Uniform {
                name: uniform.into(),
                component,
            },
        }
    }

    pub fn switch(name: &str, uniform: &str) -> Self {
        Self {
            name: name.into(),
            label: name.into(),
            min: 0.0,
            max: 1.0,
            step: 1.0,
            binding: ParamBinding::Switch {
                name: uniform.into(),
            },
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.into();
        self
    }

    pub fn is_boolean(&self) -> bool {
        matches!(
            self.binding,
            ParamBinding::Enabled | ParamBinding::Switch { .. }
        )
    }

    /// Reads the live value straight from the stage storage.
    pub(crate) fn read(&self, enabled: bool, uniforms: &Uniforms) -> ParamValue {
        match &self.binding {
            ParamBinding::Enabled => ParamValue::Bool(enabled),
            ParamBinding::Switch { name } => ParamValue::Bool(uniforms.float(name) > 0.5),
            ParamBinding::Uniform { name, component } => ParamValue::Float(
                uniforms
                    .get(name)
                    .and_then(|value| value.component(*component))
                    .unwrap_or(0.0),
            ),
        }
    }

    /// Writes into the stage storage; floats are clamped to `[min, max]`.
    pub(crate) fn write(
        &self,
        key: &str,
        value: ParamValue,
        enabled: &mut bool,
        uniforms: &mut Uniforms,
    ) -> Result<ParamValue, ComposerError> {
        match (&self.binding, value) {
            (ParamBinding::Enabled, ParamValue::Bool(flag)) => {
                *enabled = flag;
                Ok(ParamValue::Bool(flag))
            }
            (ParamBinding::Switch { name }, ParamValue::Bool(flag)) => {
                uniforms.set_float(name, if flag { 1.0 } else { 0.0 });
                Ok(ParamValue::Bool(flag))
            }
            (ParamBinding::Uniform { name, component }, ParamValue::Float(raw)) => {
                if !raw.is_finite() {
                    return Err(ComposerError::InvalidValue {
                        key: key.to_string(),
                        reason: format!("{raw} is not a finite number"),
                    });
                }
                let clamped = raw.clamp(self.min, self.max);
                if !uniforms.write_component(name, *component, clamped) {
                    return Err(ComposerError::InvalidValue {
                        key: key.to_string(),
                        reason: format!("uniform '{name}' has no component {component}"),
                    });
                }
                Ok(ParamValue::Float(clamped))
            }
            (binding, value) => Err(ComposerError::InvalidValue {
                key: key.to_string(),
                reason: match binding {
                    ParamBinding::Uniform { .. } => format!("expected a number, got {value}"),
                    _ => format!("expected true/false, got {value}"),
                },
            }),
        }
    }
}

/// Snapshot of one registry entry, shaped for a control panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub key: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f32>,
    pub value: ParamValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tint() -> Uniforms {
        Uniforms::new().with("uTint", UniformValue::Vec3([0.0; 3]))
    }

    #[test]
    fn uniforms_keep_declaration_order() {
        let uniforms = Uniforms::new()
            .with("b", UniformValue::Float(1.0))
            .with("a", UniformValue::Float(2.0))
            .with("b", UniformValue::Float(3.0));
        let names: Vec<_> = uniforms.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(uniforms.float("b"), 3.0);
    }

    #[test]
    fn vector_component_write_targets_single_lane() {
        let mut uniforms = tint();
        let mut enabled = true;
        let param = TunableParameter::component("green-y", "uTint", 1, -1.0, 1.0, 0.001);
        param
            .write("tint.green-y", ParamValue::Float(0.25), &mut enabled, &mut uniforms)
            .unwrap();
        assert_eq!(uniforms.vec3("uTint"), [0.0, 0.25, 0.0]);
        assert_eq!(param.read(enabled, &uniforms), ParamValue::Float(0.25));
    }

    #[test]
    fn float_writes_are_clamped() {
        let mut uniforms = tint();
        let mut enabled = true;
        let param = TunableParameter::component("red-x", "uTint", 0, -1.0, 1.0, 0.001);
        let stored = param
            .write("tint.red-x", ParamValue::Float(4.0), &mut enabled, &mut uniforms)
            .unwrap();
        assert_eq!(stored, ParamValue::Float(1.0));
    }

    #[test]
    fn rejects_non_finite_and_mismatched_values() {
        let mut uniforms = tint();
        let mut enabled = true;
        let param = TunableParameter::component("red-x", "uTint", 0, -1.0, 1.0, 0.001);
        assert!(param
            .write("tint.red-x", ParamValue::Float(f32::NAN), &mut enabled, &mut uniforms)
            .is_err());
        assert!(param
            .write("tint.red-x", ParamValue::Bool(true), &mut enabled, &mut uniforms)
            .is_err());
        let toggle = TunableParameter::enabled("Tint");
        assert!(toggle
            .write("tint.enabled", ParamValue::Float(1.0), &mut enabled, &mut uniforms)
            .is_err());
    }

    #[test]
    fn parses_panel_input() {
        assert_eq!(ParamValue::parse("on"), Some(ParamValue::Bool(true)));
        assert_eq!(ParamValue::parse(" 0.5 "), Some(ParamValue::Float(0.5)));
        assert_eq!(ParamValue::parse("loud"), None);
    }
}

use std::collections::HashSet;

use rand::rngs::StdRng;
use serde::Serialize;

use crate::backend::{BackendCapabilities, BackendError, BufferId, FrameBackend, FrameInputs};
use crate::params::{ParamValue, ParameterInfo, TextureId};
use crate::stage::{EffectKind, Stage, StageKind};
use crate::viewport::{BufferSize, ViewportState};
use crate::ComposerError;

/// Shape of the pipeline tail, fixed when the pipeline is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineVariant {
    /// Base render, effects, colour correction.
    Direct,
    /// As `Direct`, followed by the antialias fallback stage.
    WithAntialiasFallback,
}

impl PipelineVariant {
    /// Fallback antialiasing only pays off when neither density nor hardware
    /// multisampling smooths edges already.
    pub fn select(capabilities: &BackendCapabilities, viewport: &ViewportState) -> Self {
        if viewport.pixel_ratio() == 1.0 && !capabilities.native_multisample {
            PipelineVariant::WithAntialiasFallback
        } else {
            PipelineVariant::Direct
        }
    }
}

/// Collects effect stages in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    effects: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effect(mut self, stage: Stage) -> Self {
        self.effects.push(stage);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.effects.push(stage);
    }

    pub fn effects(&self) -> &[Stage] {
        &self.effects
    }

    /// Fixes the stage order: base render, declared effects, colour
    /// correction, then the antialias fallback when the variant calls for it.
    pub fn build(
        self,
        capabilities: &BackendCapabilities,
        viewport: &ViewportState,
    ) -> Result<Pipeline, ComposerError> {
        let mut names = HashSet::new();
        let mut stages = Vec::with_capacity(self.effects.len() + 3);
        stages.push(Stage::base_render());
        names.insert(Stage::base_render().name().to_string());

        for stage in self.effects {
            match stage.kind() {
                StageKind::Effect(kind) if kind.is_reserved() => {
                    return Err(ComposerError::ReservedStage(kind));
                }
                StageKind::BaseRender => {
                    return Err(ComposerError::DuplicateStage(stage.name().to_string()));
                }
                StageKind::Effect(_) => {}
            }
            if !names.insert(stage.name().to_string()) {
                return Err(ComposerError::DuplicateStage(stage.name().to_string()));
            }
            stages.push(stage);
        }

        let variant = PipelineVariant::select(capabilities, viewport);
        let mut tail = vec![Stage::color_correction()];
        if variant == PipelineVariant::WithAntialiasFallback {
            tail.push(Stage::antialias_fallback());
        }
        for stage in tail {
            if !names.insert(stage.name().to_string()) {
                return Err(ComposerError::DuplicateStage(stage.name().to_string()));
            }
            stages.push(stage);
        }

        let order: Vec<&str> = stages.iter().map(Stage::name).collect();
        tracing::info!(
            backend = %capabilities.name,
            ?variant,
            stages = ?order,
            "built frame pipeline"
        );

        Ok(Pipeline {
            stages,
            variant,
            buffer_size: viewport.buffer_size(),
            failing: HashSet::new(),
        })
    }
}

/// A stage that failed during one frame and was passed through instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub error: String,
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    /// Stages that produced a new image, in order.
    pub executed: Vec<String>,
    /// Disabled stages and stages still waiting on a texture.
    pub bypassed: Vec<String>,
    pub failures: Vec<StageFailure>,
    pub presented: BufferId,
}

/// Ordered stages plus the buffer size they were last resized to.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
    variant: PipelineVariant,
    buffer_size: BufferSize,
    failing: HashSet<String>,
}

impl Pipeline {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name() == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.name() == name)
    }

    pub fn position_of_kind(&self, kind: EffectKind) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.kind() == StageKind::Effect(kind))
    }

    pub fn variant(&self) -> PipelineVariant {
        self.variant
    }

    pub fn buffer_size(&self) -> BufferSize {
        self.buffer_size
    }

    /// Builds backend resources for every stage and sizes all buffers.
    pub fn prepare<B: FrameBackend + ?Sized>(&self, backend: &mut B) -> Result<(), BackendError> {
        for stage in &self.stages {
            backend.prepare_stage(stage)?;
        }
        backend.resize_buffers(self.buffer_size, &self.stages)
    }

    /// Resizes every sized buffer for `viewport` before returning.
    pub fn resize<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        viewport: &ViewportState,
    ) -> Result<(), BackendError> {
        let size = viewport.buffer_size();
        backend.resize_buffers(size, &self.stages)?;
        tracing::debug!(from = %self.buffer_size, to = %size, "resized pipeline buffers");
        self.buffer_size = size;
        Ok(())
    }

    fn split_key(key: &str) -> Result<(&str, &str), ComposerError> {
        key.split_once('.')
            .ok_or_else(|| ComposerError::UnknownParameter(key.to_string()))
    }

    fn stage_mut(&mut self, name: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|stage| stage.name() == name)
    }

    /// Writes `value` into the live storage the next frame reads.
    pub fn set_parameter(&mut self, key: &str, value: ParamValue) -> Result<ParamValue, ComposerError> {
        let (stage_name, param_name) = Self::split_key(key)?;
        let stage = self
            .stage_mut(stage_name)
            .ok_or_else(|| ComposerError::UnknownParameter(key.to_string()))?;
        if stage.is_mandatory() && param_name == "enabled" {
            return Err(ComposerError::MandatoryStage(stage_name.to_string()));
        }
        let (enabled, uniforms, parameters) = stage.parts_mut();
        let parameter = parameters
            .iter()
            .find(|param| param.name == param_name)
            .ok_or_else(|| ComposerError::UnknownParameter(key.to_string()))?;
        let stored = parameter.write(key, value, enabled, uniforms)?;
        tracing::debug!(key, value = %stored, "parameter updated");
        Ok(stored)
    }

    pub fn parameter(&self, key: &str) -> Result<ParamValue, ComposerError> {
        let (stage_name, param_name) = Self::split_key(key)?;
        let stage = self
            .stage(stage_name)
            .ok_or_else(|| ComposerError::UnknownParameter(key.to_string()))?;
        let parameter = stage
            .parameter(param_name)
            .ok_or_else(|| ComposerError::UnknownParameter(key.to_string()))?;
        Ok(parameter.read(stage.is_enabled(), stage.uniforms()))
    }

    /// Registry snapshot in stage order.
    pub fn parameters(&self) -> Vec<ParameterInfo> {
        self.stages
            .iter()
            .flat_map(|stage| {
                stage.parameters().iter().map(move |param| {
                    let ranged = !param.is_boolean();
                    ParameterInfo {
                        key: format!("{}.{}", stage.name(), param.name),
                        label: param.label.clone(),
                        min: ranged.then_some(param.min),
                        max: ranged.then_some(param.max),
                        step: ranged.then_some(param.step),
                        value: param.read(stage.is_enabled(), stage.uniforms()),
                    }
                })
            })
            .collect()
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ComposerError> {
        let stage = self
            .stage_mut(name)
            .ok_or_else(|| ComposerError::UnknownParameter(format!("{name}.enabled")))?;
        if stage.is_mandatory() || !stage.has_enabled_toggle() {
            return Err(ComposerError::MandatoryStage(name.to_string()));
        }
        stage.set_enabled(enabled);
        Ok(())
    }

    /// Flips a stage's enabled flag and returns the new state.
    pub fn toggle(&mut self, name: &str) -> Result<bool, ComposerError> {
        let enabled = self
            .stage(name)
            .map(Stage::is_enabled)
            .ok_or_else(|| ComposerError::UnknownParameter(format!("{name}.enabled")))?;
        self.set_enabled(name, !enabled)?;
        Ok(!enabled)
    }

    pub(crate) fn bind_texture(&mut self, stage: &str, uniform: &str, texture: TextureId) -> bool {
        self.stage_mut(stage)
            .is_some_and(|stage| stage.bind_texture(uniform, texture))
    }

    /// Runs one frame: base render, each enabled effect, present.
    ///
    /// A failing stage is logged and treated as a pass-through for this frame.
    /// Only fatal backend errors and presentation errors are returned.
    pub fn execute<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        inputs: &FrameInputs<'_>,
        rng: &mut StdRng,
    ) -> Result<FrameReport, BackendError> {
        backend.begin_frame()?;

        let mut report = FrameReport {
            frame: inputs.time.frame,
            executed: Vec::new(),
            bypassed: Vec::new(),
            failures: Vec::new(),
            presented: BufferId::Read,
        };
        let mut current = BufferId::Read;

        for stage in &mut self.stages {
            let result = match stage.kind() {
                StageKind::BaseRender => backend.render_scene(current, inputs),
                StageKind::Effect(_) => {
                    if !stage.is_enabled() || !stage.has_inputs() {
                        report.bypassed.push(stage.name().to_string());
                        continue;
                    }
                    stage.advance(&inputs.time, rng);
                    backend
                        .apply_effect(stage, current, current.other())
                        .map(|()| current = current.other())
                }
            };

            match result {
                Ok(()) => {
                    if self.failing.remove(stage.name()) {
                        tracing::info!(stage = stage.name(), "stage recovered");
                    }
                    report.executed.push(stage.name().to_string());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    if self.failing.insert(stage.name().to_string()) {
                        tracing::warn!(
                            stage = stage.name(),
                            error = %err,
                            "stage failed; passing its input through"
                        );
                    } else {
                        tracing::trace!(stage = stage.name(), error = %err, "stage still failing");
                    }
                    report.failures.push(StageFailure {
                        stage: stage.name().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        backend.present(current)?;
        report.presented = current;
        Ok(report)
    }
}

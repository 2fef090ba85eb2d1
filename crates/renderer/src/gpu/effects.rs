use anyhow::{anyhow, Result};
use composer::{
    BackendError, BufferId, BufferReport, BufferSize, EffectKind, Stage, TextureId, UniformValue,
    Uniforms,
};

use super::context::HDR_FORMAT;
use super::pass::{FullscreenPass, PassLayouts, PassTarget, UniformBlock};
use super::targets::{PingPong, RenderTarget};
use super::textures::TextureStore;
use super::uniforms::{block_size, pack_std140, resolution};
use crate::compile::{
    bloom_add, bloom_blur, bloom_composite, bloom_high_pass, effect_fragment, texture_uniforms,
};

const BLOOM_LEVELS: usize = 5;
const BLOOM_KERNEL_RADII: [u32; BLOOM_LEVELS] = [3, 5, 7, 9, 11];
const BLOOM_FACTORS: [f32; BLOOM_LEVELS] = [1.0, 0.8, 0.6, 0.4, 0.2];

/// Bind group built for one input buffer, valid until the buffers are
/// reallocated or a texture uniform is rebound.
struct CachedTextures {
    generation: u64,
    textures: Vec<TextureId>,
    bind_group: wgpu::BindGroup,
}

/// Keeps one bind group per ping-pong input.
#[derive(Default)]
pub(crate) struct InputBindings {
    read: Option<CachedTextures>,
    write: Option<CachedTextures>,
}

impl InputBindings {
    fn slot(&mut self, input: BufferId) -> &mut Option<CachedTextures> {
        match input {
            BufferId::Read => &mut self.read,
            BufferId::Write => &mut self.write,
        }
    }

    /// Returns the bind group for `input` plus `textures`, rebuilding it when stale.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn resolve(
        &mut self,
        device: &wgpu::Device,
        pass: &FullscreenPass,
        sampler: &wgpu::Sampler,
        input: &RenderTarget,
        input_id: BufferId,
        textures: Vec<TextureId>,
        store: &TextureStore,
        generation: u64,
    ) -> Result<&wgpu::BindGroup, BackendError> {
        let slot = self.slot(input_id);
        let fresh = slot
            .as_ref()
            .is_some_and(|cached| cached.generation == generation && cached.textures == textures);
        if !fresh {
            let mut views = vec![&input.view];
            for id in &textures {
                views.push(store.view(*id)?);
            }
            let bind_group = pass.bind_textures(device, sampler, &views)?;
            *slot = Some(CachedTextures {
                generation,
                textures,
                bind_group,
            });
        }
        slot.as_ref()
            .map(|cached| &cached.bind_group)
            .ok_or_else(|| BackendError::Internal(anyhow!("bind group cache is empty")))
    }
}

/// Shared state every effect draw needs.
pub(crate) struct EffectContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub layouts: &'a PassLayouts,
    pub textures: &'a TextureStore,
    pub buffers: &'a PingPong,
    pub generation: u64,
}

/// GPU programs and stage-owned buffers for one pipeline stage.
pub(crate) enum EffectProgram {
    Single(SinglePass),
    Bloom(Box<BloomPasses>),
}

impl EffectProgram {
    pub fn new(
        device: &wgpu::Device,
        layouts: &PassLayouts,
        stage: &Stage,
        size: BufferSize,
    ) -> Result<Self> {
        let kind = stage
            .effect_kind()
            .ok_or_else(|| anyhow!("stage '{}' is not an effect", stage.name()))?;
        if kind == EffectKind::Bloom {
            return Ok(Self::Bloom(Box::new(BloomPasses::new(
                device, layouts, stage, size,
            )?)));
        }
        Ok(Self::Single(SinglePass::new(device, layouts, stage, kind)?))
    }

    pub fn resize(&mut self, device: &wgpu::Device, layouts: &PassLayouts, size: BufferSize) {
        if let Self::Bloom(bloom) = self {
            bloom.resize(device, layouts, size);
        }
    }

    pub fn apply(
        &mut self,
        ctx: &EffectContext<'_>,
        encoder: &mut wgpu::CommandEncoder,
        stage: &Stage,
        input: BufferId,
        output: BufferId,
    ) -> Result<(), BackendError> {
        match self {
            Self::Single(pass) => pass.apply(ctx, encoder, stage, input, output),
            Self::Bloom(bloom) => bloom.apply(ctx, encoder, stage, input, output),
        }
    }

    pub fn reports(&self, owner: &str) -> Vec<BufferReport> {
        match self {
            Self::Single(_) => Vec::new(),
            Self::Bloom(bloom) => bloom.reports(owner),
        }
    }
}

pub(crate) struct SinglePass {
    pass: FullscreenPass,
    uniforms: UniformBlock,
    bindings: InputBindings,
}

impl SinglePass {
    fn new(
        device: &wgpu::Device,
        layouts: &PassLayouts,
        stage: &Stage,
        kind: EffectKind,
    ) -> Result<Self> {
        let uniforms = stage.uniforms();
        let source = effect_fragment(kind, uniforms)
            .ok_or_else(|| anyhow!("{kind} has no single-pass program"))?;
        let texture_count = 1 + texture_uniforms(uniforms).len();
        let pass = FullscreenPass::new(
            device,
            layouts,
            stage.name(),
            source,
            texture_count,
            HDR_FORMAT,
            1,
        )?;
        let block = UniformBlock::new(device, layouts, stage.name(), block_size(uniforms));
        Ok(Self {
            pass,
            uniforms: block,
            bindings: InputBindings::default(),
        })
    }

    fn apply(
        &mut self,
        ctx: &EffectContext<'_>,
        encoder: &mut wgpu::CommandEncoder,
        stage: &Stage,
        input: BufferId,
        output: BufferId,
    ) -> Result<(), BackendError> {
        let uniforms = stage.uniforms();
        let textures = bound_textures(stage.name(), uniforms)?;
        let source = ctx.buffers.get(input);
        let target = ctx.buffers.get(output);

        let bind_group = self.bindings.resolve(
            ctx.device,
            &self.pass,
            &ctx.layouts.sampler,
            source,
            input,
            textures,
            ctx.textures,
            ctx.generation,
        )?;
        self.uniforms
            .write(ctx.queue, &pack_std140(resolution(target.size), uniforms));
        self.pass.draw(
            encoder,
            PassTarget::direct(&target.view),
            &self.uniforms.bind_group,
            bind_group,
        );
        Ok(())
    }
}

/// Texture uniforms in binding order; an unbound slot fails the stage so it
/// passes its input through until the asset lands.
fn bound_textures(stage: &str, uniforms: &Uniforms) -> Result<Vec<TextureId>, BackendError> {
    texture_uniforms(uniforms)
        .into_iter()
        .map(|name| {
            uniforms.texture(name).ok_or_else(|| {
                BackendError::Internal(anyhow!("stage '{stage}' texture '{name}' is unbound"))
            })
        })
        .collect()
}

struct BlurLevel {
    horizontal: FullscreenPass,
    vertical: FullscreenPass,
    horizontal_uniforms: UniformBlock,
    vertical_uniforms: UniformBlock,
}

/// Mip chain one bloom stage owns, plus the bind groups wiring it together.
struct BloomTargets {
    bright: RenderTarget,
    horizontal: Vec<RenderTarget>,
    vertical: Vec<RenderTarget>,
    horizontal_inputs: Vec<wgpu::BindGroup>,
    vertical_inputs: Vec<wgpu::BindGroup>,
    composite_input: wgpu::BindGroup,
}

impl BloomTargets {
    fn new(
        device: &wgpu::Device,
        layouts: &PassLayouts,
        levels: &[BlurLevel],
        composite: &FullscreenPass,
        size: BufferSize,
    ) -> Result<Self> {
        let bright = RenderTarget::new(device, "bloom bright", size.mip(0));
        let horizontal: Vec<RenderTarget> = (0..BLOOM_LEVELS)
            .map(|level| {
                RenderTarget::new(device, &format!("bloom blur-h-{level}"), size.mip(level as u32))
            })
            .collect();
        let vertical: Vec<RenderTarget> = (0..BLOOM_LEVELS)
            .map(|level| {
                RenderTarget::new(device, &format!("bloom blur-v-{level}"), size.mip(level as u32))
            })
            .collect();

        let mut horizontal_inputs = Vec::with_capacity(BLOOM_LEVELS);
        let mut vertical_inputs = Vec::with_capacity(BLOOM_LEVELS);
        for (level, passes) in levels.iter().enumerate() {
            let source = if level == 0 {
                &bright
            } else {
                &vertical[level - 1]
            };
            horizontal_inputs.push(passes.horizontal.bind_textures(
                device,
                &layouts.sampler,
                &[&source.view],
            )?);
            vertical_inputs.push(passes.vertical.bind_textures(
                device,
                &layouts.sampler,
                &[&horizontal[level].view],
            )?);
        }
        let mips: Vec<&wgpu::TextureView> = vertical.iter().map(|target| &target.view).collect();
        let composite_input = composite.bind_textures(device, &layouts.sampler, &mips)?;

        Ok(Self {
            bright,
            horizontal,
            vertical,
            horizontal_inputs,
            vertical_inputs,
            composite_input,
        })
    }
}

/// Multi-pass bloom: high-pass into the first mip, separable blur down the
/// chain, weighted composite of all mips, additive blend over the input.
pub(crate) struct BloomPasses {
    high_pass: FullscreenPass,
    high_pass_uniforms: UniformBlock,
    high_pass_bindings: InputBindings,
    levels: Vec<BlurLevel>,
    composite: FullscreenPass,
    composite_uniforms: UniformBlock,
    add: FullscreenPass,
    add_uniforms: UniformBlock,
    add_bindings: InputBindings,
    targets: Option<BloomTargets>,
}

fn blur_uniforms(direction: [f32; 2]) -> Uniforms {
    Uniforms::new().with("direction", UniformValue::Vec2(direction))
}

impl BloomPasses {
    fn new(
        device: &wgpu::Device,
        layouts: &PassLayouts,
        stage: &Stage,
        size: BufferSize,
    ) -> Result<Self> {
        let name = stage.name();
        let uniforms = stage.uniforms();
        let stage_block = block_size(uniforms);
        let pass = |label: String, source: String, textures: usize| {
            FullscreenPass::new(device, layouts, &label, source, textures, HDR_FORMAT, 1)
        };

        let high_pass = pass(format!("{name} high pass"), bloom_high_pass(uniforms), 1)?;
        let levels = BLOOM_KERNEL_RADII
            .iter()
            .enumerate()
            .map(|(level, &radius)| -> Result<BlurLevel> {
                let horizontal = blur_uniforms([1.0, 0.0]);
                let vertical = blur_uniforms([0.0, 1.0]);
                Ok(BlurLevel {
                    horizontal: pass(
                        format!("{name} blur-h-{level}"),
                        bloom_blur(&horizontal, radius),
                        1,
                    )?,
                    vertical: pass(
                        format!("{name} blur-v-{level}"),
                        bloom_blur(&vertical, radius),
                        1,
                    )?,
                    horizontal_uniforms: UniformBlock::new(
                        device,
                        layouts,
                        &format!("{name} blur-h-{level}"),
                        block_size(&horizontal),
                    ),
                    vertical_uniforms: UniformBlock::new(
                        device,
                        layouts,
                        &format!("{name} blur-v-{level}"),
                        block_size(&vertical),
                    ),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let composite = pass(
            format!("{name} composite"),
            bloom_composite(uniforms, &BLOOM_FACTORS),
            BLOOM_LEVELS,
        )?;
        let add = pass(format!("{name} add"), bloom_add(uniforms), 2)?;

        let targets = BloomTargets::new(device, layouts, &levels, &composite, size)?;
        Ok(Self {
            high_pass,
            high_pass_uniforms: UniformBlock::new(
                device,
                layouts,
                &format!("{name} high pass"),
                stage_block,
            ),
            high_pass_bindings: InputBindings::default(),
            levels,
            composite,
            composite_uniforms: UniformBlock::new(
                device,
                layouts,
                &format!("{name} composite"),
                stage_block,
            ),
            add,
            add_uniforms: UniformBlock::new(device, layouts, &format!("{name} add"), stage_block),
            add_bindings: InputBindings::default(),
            targets: Some(targets),
        })
    }

    fn resize(&mut self, device: &wgpu::Device, layouts: &PassLayouts, size: BufferSize) {
        match BloomTargets::new(device, layouts, &self.levels, &self.composite, size) {
            Ok(targets) => self.targets = Some(targets),
            Err(err) => {
                tracing::warn!(error = %err, %size, "failed to reallocate bloom mip chain");
                self.targets = None;
            }
        }
    }

    fn apply(
        &mut self,
        ctx: &EffectContext<'_>,
        encoder: &mut wgpu::CommandEncoder,
        stage: &Stage,
        input: BufferId,
        output: BufferId,
    ) -> Result<(), BackendError> {
        let targets = self.targets.as_ref().ok_or_else(|| BackendError::UnpreparedStage {
            stage: stage.name().to_string(),
        })?;
        let uniforms = stage.uniforms();
        let source = ctx.buffers.get(input);
        let target = ctx.buffers.get(output);

        let high_pass_input = self.high_pass_bindings.resolve(
            ctx.device,
            &self.high_pass,
            &ctx.layouts.sampler,
            source,
            input,
            Vec::new(),
            ctx.textures,
            ctx.generation,
        )?;
        self.high_pass_uniforms
            .write(ctx.queue, &pack_std140(resolution(targets.bright.size), uniforms));
        self.high_pass.draw(
            encoder,
            PassTarget::direct(&targets.bright.view),
            &self.high_pass_uniforms.bind_group,
            high_pass_input,
        );

        for (level, passes) in self.levels.iter().enumerate() {
            let horizontal = &targets.horizontal[level];
            passes.horizontal_uniforms.write(
                ctx.queue,
                &pack_std140(resolution(horizontal.size), &blur_uniforms([1.0, 0.0])),
            );
            passes.horizontal.draw(
                encoder,
                PassTarget::direct(&horizontal.view),
                &passes.horizontal_uniforms.bind_group,
                &targets.horizontal_inputs[level],
            );

            let vertical = &targets.vertical[level];
            passes.vertical_uniforms.write(
                ctx.queue,
                &pack_std140(resolution(vertical.size), &blur_uniforms([0.0, 1.0])),
            );
            passes.vertical.draw(
                encoder,
                PassTarget::direct(&vertical.view),
                &passes.vertical_uniforms.bind_group,
                &targets.vertical_inputs[level],
            );
        }

        // The first horizontal target doubles as the composite buffer.
        let composite = &targets.horizontal[0];
        self.composite_uniforms
            .write(ctx.queue, &pack_std140(resolution(composite.size), uniforms));
        self.composite.draw(
            encoder,
            PassTarget::direct(&composite.view),
            &self.composite_uniforms.bind_group,
            &targets.composite_input,
        );

        let add_input = add_bind_group(
            &mut self.add_bindings,
            ctx,
            &self.add,
            source,
            input,
            composite,
        )?;
        self.add_uniforms
            .write(ctx.queue, &pack_std140(resolution(target.size), uniforms));
        self.add.draw(
            encoder,
            PassTarget::direct(&target.view),
            &self.add_uniforms.bind_group,
            add_input,
        );
        Ok(())
    }

    fn reports(&self, owner: &str) -> Vec<BufferReport> {
        let Some(targets) = &self.targets else {
            return Vec::new();
        };
        let report = |label: String, target: &RenderTarget, level: usize| BufferReport {
            owner: owner.to_string(),
            label,
            size: target.size,
            mip_level: Some(level as u32),
        };
        let mut reports = vec![report("bright".into(), &targets.bright, 0)];
        for (level, target) in targets.horizontal.iter().enumerate() {
            reports.push(report(format!("blur-h-{level}"), target, level));
        }
        for (level, target) in targets.vertical.iter().enumerate() {
            reports.push(report(format!("blur-v-{level}"), target, level));
        }
        reports
    }
}

fn add_bind_group<'a>(
    bindings: &'a mut InputBindings,
    ctx: &EffectContext<'_>,
    pass: &FullscreenPass,
    source: &RenderTarget,
    input: BufferId,
    composite: &RenderTarget,
) -> Result<&'a wgpu::BindGroup, BackendError> {
    let slot = bindings.slot(input);
    // The mip chain is reallocated together with the ping-pong pair.
    let fresh = slot
        .as_ref()
        .is_some_and(|cached| cached.generation == ctx.generation);
    if !fresh {
        let bind_group =
            pass.bind_textures(ctx.device, &ctx.layouts.sampler, &[&source.view, &composite.view])?;
        *slot = Some(CachedTextures {
            generation: ctx.generation,
            textures: Vec::new(),
            bind_group,
        });
    }
    slot.as_ref()
        .map(|cached| &cached.bind_group)
        .ok_or_else(|| BackendError::Internal(anyhow!("bind group cache is empty")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_texture_uniform_fails_the_stage() {
        let stage = Stage::normal_displacement(None);
        let err = bound_textures(stage.name(), stage.uniforms()).unwrap_err();
        assert!(err.to_string().contains("uNormalMap"));

        let stage = Stage::normal_displacement(Some(TextureId(4)));
        assert_eq!(
            bound_textures(stage.name(), stage.uniforms()).unwrap(),
            vec![TextureId(4)]
        );
    }

    #[test]
    fn blur_block_carries_direction_after_resolution() {
        let bytes = pack_std140(resolution(BufferSize::new(100, 50)), &blur_uniforms([0.0, 1.0]));
        assert_eq!(bytes.len(), 32);
        let direction: [f32; 2] = [
            f32::from_ne_bytes(bytes[16..20].try_into().unwrap()),
            f32::from_ne_bytes(bytes[20..24].try_into().unwrap()),
        ];
        assert_eq!(direction, [0.0, 1.0]);
    }
}

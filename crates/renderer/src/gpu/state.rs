use std::collections::HashMap;

use anyhow::{anyhow, Result};
use composer::{
    BackendCapabilities, BackendError, BufferId, BufferReport, BufferSize, FrameBackend,
    FrameInputs, Stage, TextureId, ViewportState,
};
use image::Rgba32FImage;
use winit::dpi::PhysicalSize;

use super::context::GpuContext;
use super::effects::{EffectContext, EffectProgram, InputBindings};
use super::pass::{FullscreenPass, PassLayouts, PassTarget, UniformBlock};
use super::scene::ScenePass;
use super::targets::PingPong;
use super::textures::TextureStore;
use super::uniforms::{pack_std140, resolution, RESOLUTION_BYTES};
use crate::compile::blit_fragment;
use crate::types::AdapterProfile;

/// Copies the presented buffer onto the swapchain image.
struct BlitPass {
    pass: FullscreenPass,
    uniforms: UniformBlock,
    bindings: InputBindings,
}

/// wgpu implementation of [`FrameBackend`]: HDR ping-pong buffers, one GPU
/// program set per stage, and a blit onto the window surface at present.
pub struct GpuBackend {
    context: GpuContext,
    layouts: PassLayouts,
    buffers: PingPong,
    /// Bumped whenever buffers are reallocated; invalidates cached bind groups.
    generation: u64,
    scene: ScenePass,
    effects: HashMap<String, EffectProgram>,
    textures: TextureStore,
    blit: BlitPass,
    encoder: Option<wgpu::CommandEncoder>,
    frames: u64,
    /// Physical size of the window as reported by the windowing system.
    window_size: Option<PhysicalSize<u32>>,
}

/// The swapchain follows the window's physical size when one is known. Only
/// without a window does it fall back to the viewport's buffer size.
pub(crate) fn surface_extent(
    window: Option<PhysicalSize<u32>>,
    viewport: &ViewportState,
) -> PhysicalSize<u32> {
    match window {
        Some(size) if size.width > 0 && size.height > 0 => size,
        _ => {
            let buffer = viewport.buffer_size();
            PhysicalSize::new(buffer.width, buffer.height)
        }
    }
}

fn map_surface_error(err: wgpu::SurfaceError) -> BackendError {
    match err {
        wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
        wgpu::SurfaceError::Outdated => BackendError::SurfaceOutdated,
        wgpu::SurfaceError::Timeout => BackendError::Timeout,
        wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
        other => BackendError::Internal(anyhow!("surface error: {other:?}")),
    }
}

fn create_encoder(device: &wgpu::Device) -> wgpu::CommandEncoder {
    device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("frame encoder"),
    })
}

impl GpuBackend {
    pub(crate) fn new(context: GpuContext, viewport: &ViewportState) -> Result<Self> {
        let size = viewport.buffer_size();
        let device = &context.device;
        let layouts = PassLayouts::new(device)?;
        let scene = ScenePass::new(device, &layouts, context.hdr_sample_count, size)?;
        let max_dimension = device.limits().max_texture_dimension_2d;
        let textures = TextureStore::new(device, &context.queue, max_dimension);
        let blit = BlitPass {
            pass: FullscreenPass::new(
                device,
                &layouts,
                "surface blit",
                blit_fragment(),
                1,
                context.surface_format,
                1,
            )?,
            uniforms: UniformBlock::new(device, &layouts, "surface blit", RESOLUTION_BYTES),
            bindings: InputBindings::default(),
        };
        let buffers = PingPong::new(device, size);
        let window_size = Some(context.size);

        Ok(Self {
            context,
            layouts,
            buffers,
            generation: 0,
            scene,
            effects: HashMap::new(),
            textures,
            blit,
            encoder: None,
            frames: 0,
            window_size,
        })
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.context.adapter_profile
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn surface_size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    /// Records the window's physical size for the next surface configuration.
    pub fn set_window_size(&mut self, size: PhysicalSize<u32>) {
        self.window_size = Some(size);
    }
}

impl FrameBackend for GpuBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: self.context.adapter_profile.name.clone(),
            native_multisample: self.context.hdr_sample_count > 1,
            max_buffer_dimension: self.context.device.limits().max_texture_dimension_2d,
        }
    }

    fn configure_surface(&mut self, viewport: &ViewportState) -> Result<(), BackendError> {
        let physical = surface_extent(self.window_size, viewport);
        if physical == self.context.size {
            self.context.reconfigure();
        } else {
            self.context.resize(physical);
        }
        Ok(())
    }

    fn resize_buffers(&mut self, size: BufferSize, stages: &[Stage]) -> Result<(), BackendError> {
        let limit = self.context.device.limits().max_texture_dimension_2d;
        if size.width > limit || size.height > limit {
            return Err(BackendError::BufferTooLarge { size, limit });
        }

        let device = &self.context.device;
        self.buffers = PingPong::new(device, size);
        self.scene.resize(device, size);
        for stage in stages {
            if let Some(program) = self.effects.get_mut(stage.name()) {
                program.resize(device, &self.layouts, size);
            }
        }
        self.generation += 1;
        tracing::debug!(%size, generation = self.generation, "gpu buffers resized");
        Ok(())
    }

    fn prepare_stage(&mut self, stage: &Stage) -> Result<(), BackendError> {
        if stage.effect_kind().is_none() {
            return Ok(());
        }
        let program = EffectProgram::new(
            &self.context.device,
            &self.layouts,
            stage,
            self.buffers.read.size,
        )?;
        self.effects.insert(stage.name().to_string(), program);
        tracing::debug!(stage = stage.name(), "stage programs compiled");
        Ok(())
    }

    fn buffer_reports(&self) -> Vec<BufferReport> {
        let mut reports: Vec<BufferReport> = [("read", &self.buffers.read), ("write", &self.buffers.write)]
            .into_iter()
            .map(|(label, target)| BufferReport {
                owner: "pipeline".into(),
                label: label.into(),
                size: target.size,
                mip_level: None,
            })
            .collect();
        let mut owners: Vec<&String> = self.effects.keys().collect();
        owners.sort();
        for owner in owners {
            reports.extend(self.effects[owner].reports(owner));
        }
        reports
    }

    fn upload_texture(
        &mut self,
        label: &str,
        image: &Rgba32FImage,
    ) -> Result<TextureId, BackendError> {
        self.textures
            .upload(&self.context.device, &self.context.queue, label, image)
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        if self.encoder.is_some() {
            tracing::trace!("discarding commands from an unpresented frame");
        }
        self.encoder = Some(create_encoder(&self.context.device));
        Ok(())
    }

    fn render_scene(
        &mut self,
        target: BufferId,
        inputs: &FrameInputs<'_>,
    ) -> Result<(), BackendError> {
        let device = &self.context.device;
        let encoder = self.encoder.get_or_insert_with(|| create_encoder(device));
        self.scene.render(
            device,
            &self.context.queue,
            encoder,
            &self.textures,
            self.buffers.get(target),
            inputs,
        )
    }

    fn apply_effect(
        &mut self,
        stage: &Stage,
        input: BufferId,
        output: BufferId,
    ) -> Result<(), BackendError> {
        let program =
            self.effects
                .get_mut(stage.name())
                .ok_or_else(|| BackendError::UnpreparedStage {
                    stage: stage.name().to_string(),
                })?;
        let device = &self.context.device;
        let encoder = self.encoder.get_or_insert_with(|| create_encoder(device));
        let ctx = EffectContext {
            device,
            queue: &self.context.queue,
            layouts: &self.layouts,
            textures: &self.textures,
            buffers: &self.buffers,
            generation: self.generation,
        };
        program.apply(&ctx, encoder, stage, input, output)
    }

    fn present(&mut self, source: BufferId) -> Result<(), BackendError> {
        let frame = self
            .context
            .surface
            .get_current_texture()
            .map_err(map_surface_error)?;
        let suboptimal = frame.suboptimal;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let device = &self.context.device;
        let mut encoder = self
            .encoder
            .take()
            .unwrap_or_else(|| create_encoder(device));
        let input = self.buffers.get(source);
        let bind_group = self.blit.bindings.resolve(
            device,
            &self.blit.pass,
            &self.layouts.sampler,
            input,
            source,
            Vec::new(),
            &self.textures,
            self.generation,
        )?;
        let surface_size = BufferSize::new(self.context.config.width, self.context.config.height);
        self.blit.uniforms.write(
            &self.context.queue,
            &pack_std140(resolution(surface_size), &composer::Uniforms::new()),
        );
        self.blit.pass.draw(
            &mut encoder,
            PassTarget::direct(&view),
            &self.blit.uniforms.bind_group,
            bind_group,
        );

        self.context.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        if suboptimal {
            tracing::debug!("surface is suboptimal; reconfiguring");
            self.context.reconfigure();
        }
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_keeps_odd_window_size_at_scale_two() {
        let viewport = ViewportState::new(501, 301, 2.0);
        let window = PhysicalSize::new(1001, 601);
        assert_eq!(surface_extent(Some(window), &viewport), window);
        assert_eq!(viewport.buffer_size(), BufferSize::new(1002, 602));
    }

    #[test]
    fn surface_without_window_uses_clamped_buffer_size() {
        let viewport = ViewportState::new(100, 50, 3.0);
        assert_eq!(surface_extent(None, &viewport), PhysicalSize::new(200, 100));
        assert_eq!(
            surface_extent(Some(PhysicalSize::new(0, 0)), &viewport),
            PhysicalSize::new(200, 100)
        );
    }
}

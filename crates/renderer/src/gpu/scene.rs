use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use composer::{BackendError, BufferSize, FrameInputs, TextureId, ToneMapping, MAX_SPHERES};

use super::context::HDR_FORMAT;
use super::pass::{FullscreenPass, PassLayouts, PassTarget, UniformBlock};
use super::targets::{MultisampleTarget, RenderTarget};
use super::textures::{environment_sampler, TextureStore};
use crate::compile::scene_fragment;

/// std140 mirror of the `SceneParams` block in the scene fragment program.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct SceneUniforms {
    inverse_view_projection: [[f32; 4]; 4],
    camera_position: [f32; 4],
    light_direction: [f32; 4],
    light_radiance: [f32; 4],
    clear_color: [f32; 4],
    /// x: has environment, y: environment intensity, z: exposure, w: ACES on.
    environment: [f32; 4],
    counts: [f32; 4],
    sphere_center_radius: [[f32; 4]; MAX_SPHERES],
    sphere_color_roughness: [[f32; 4]; MAX_SPHERES],
    sphere_metalness: [[f32; 4]; MAX_SPHERES],
}

impl SceneUniforms {
    pub(crate) fn from_inputs(inputs: &FrameInputs<'_>) -> Self {
        let scene = inputs.scene;
        let light = scene.light;
        let direction = light.direction();
        let radiance = light.color.map(|channel| channel * light.intensity);
        let position = inputs.camera.position;

        let mut uniforms = Self {
            inverse_view_projection: inputs.camera.inverse_view_projection().to_cols_array_2d(),
            camera_position: [position.x, position.y, position.z, 1.0],
            light_direction: [direction.x, direction.y, direction.z, 0.0],
            light_radiance: [radiance[0], radiance[1], radiance[2], 0.0],
            clear_color: [scene.clear_color[0], scene.clear_color[1], scene.clear_color[2], 1.0],
            environment: [
                if scene.environment.is_some() { 1.0 } else { 0.0 },
                scene.environment_intensity,
                scene.exposure,
                match scene.tone_mapping {
                    ToneMapping::AcesFilmic => 1.0,
                    ToneMapping::None => 0.0,
                },
            ],
            counts: [0.0; 4],
            sphere_center_radius: [[0.0; 4]; MAX_SPHERES],
            sphere_color_roughness: [[0.0; 4]; MAX_SPHERES],
            sphere_metalness: [[0.0; 4]; MAX_SPHERES],
        };

        let spheres = scene.spheres();
        let count = spheres.len().min(MAX_SPHERES);
        uniforms.counts[0] = count as f32;
        for (index, sphere) in spheres.iter().take(count).enumerate() {
            let c = sphere.center;
            uniforms.sphere_center_radius[index] = [c.x, c.y, c.z, sphere.radius];
            uniforms.sphere_color_roughness[index] =
                [sphere.color[0], sphere.color[1], sphere.color[2], sphere.roughness];
            uniforms.sphere_metalness[index] = [sphere.metalness, 0.0, 0.0, 0.0];
        }
        uniforms
    }
}

/// Base render: ray-casts the scene into an HDR buffer, multisampled when
/// the device can resolve the HDR format.
pub(crate) struct ScenePass {
    pass: FullscreenPass,
    uniforms: UniformBlock,
    sampler: wgpu::Sampler,
    environment: Option<(Option<TextureId>, wgpu::BindGroup)>,
    sample_count: u32,
    msaa: Option<MultisampleTarget>,
}

impl ScenePass {
    pub fn new(
        device: &wgpu::Device,
        layouts: &PassLayouts,
        sample_count: u32,
        size: BufferSize,
    ) -> Result<Self> {
        let pass = FullscreenPass::new(
            device,
            layouts,
            "scene",
            scene_fragment(MAX_SPHERES),
            1,
            HDR_FORMAT,
            sample_count,
        )?;
        let uniforms = UniformBlock::new(
            device,
            layouts,
            "scene uniforms",
            std::mem::size_of::<SceneUniforms>(),
        );
        let msaa = (sample_count > 1).then(|| MultisampleTarget::new(device, size, sample_count));
        Ok(Self {
            pass,
            uniforms,
            sampler: environment_sampler(device),
            environment: None,
            sample_count,
            msaa,
        })
    }

    pub fn resize(&mut self, device: &wgpu::Device, size: BufferSize) {
        if self.sample_count > 1 {
            self.msaa = Some(MultisampleTarget::new(device, size, self.sample_count));
        }
    }

    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        textures: &TextureStore,
        target: &RenderTarget,
        inputs: &FrameInputs<'_>,
    ) -> Result<(), BackendError> {
        let wanted = inputs.scene.environment;
        let stale = self
            .environment
            .as_ref()
            .is_none_or(|(bound, _)| *bound != wanted);
        if stale {
            let view = match wanted {
                Some(id) => textures.view(id)?,
                None => textures.placeholder(),
            };
            let bind_group = self.pass.bind_textures(device, &self.sampler, &[view])?;
            self.environment = Some((wanted, bind_group));
        }

        self.uniforms
            .write(queue, bytemuck::bytes_of(&SceneUniforms::from_inputs(inputs)));

        let pass_target = match &self.msaa {
            Some(msaa) if msaa.size == target.size => PassTarget {
                view: &msaa.view,
                resolve: Some(&target.view),
            },
            _ => PassTarget::direct(&target.view),
        };
        if let Some((_, bind_group)) = &self.environment {
            self.pass
                .draw(encoder, pass_target, &self.uniforms.bind_group, bind_group);
        }
        Ok(())
    }
}

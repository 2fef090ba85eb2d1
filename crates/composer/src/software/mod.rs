//! CPU reference backend.
//!
//! Every stage runs on `Rgba32FImage` buffers with bilinear clamp-to-edge
//! sampling, using the same math as the GPU fragment programs. The backend
//! has no multisampling, so a pipeline built at pixel ratio 1 always carries
//! the antialias fallback stage. Used for headless export and for tests.

mod effects;
mod sample;
mod scene;

use std::collections::{HashMap, HashSet};

use image::{Rgba32FImage, RgbaImage};

use crate::backend::{
    BackendCapabilities, BackendError, BufferId, BufferReport, FrameBackend, FrameInputs,
};
use crate::params::TextureId;
use crate::stage::{EffectKind, Stage, StageKind};
use crate::viewport::{BufferSize, ViewportState};

pub use effects::linear_to_srgb;

use effects::BloomChain;

const MAX_DIMENSION: u32 = 16_384;

pub struct SoftwareBackend {
    size: BufferSize,
    surface: BufferSize,
    buffers: [Rgba32FImage; 2],
    textures: Vec<Rgba32FImage>,
    bloom: HashMap<String, BloomChain>,
    prepared: HashSet<String>,
    presented: Option<Rgba32FImage>,
    frames: u64,
}

impl SoftwareBackend {
    pub fn new(viewport: &ViewportState) -> Self {
        let size = viewport.buffer_size();
        Self {
            size,
            surface: size,
            buffers: [
                Rgba32FImage::new(size.width, size.height),
                Rgba32FImage::new(size.width, size.height),
            ],
            textures: Vec::new(),
            bloom: HashMap::new(),
            prepared: HashSet::new(),
            presented: None,
            frames: 0,
        }
    }

    fn index(id: BufferId) -> usize {
        match id {
            BufferId::Read => 0,
            BufferId::Write => 1,
        }
    }

    /// Borrows the input buffer immutably and the output buffer mutably.
    fn split(&mut self, input: BufferId, output: BufferId) -> (&Rgba32FImage, &mut Rgba32FImage) {
        let [first, second] = &mut self.buffers;
        match (Self::index(input), Self::index(output)) {
            (0, 1) => (&*first, second),
            _ => (&*second, first),
        }
    }

    pub fn buffer(&self, id: BufferId) -> &Rgba32FImage {
        &self.buffers[Self::index(id)]
    }

    /// Last presented frame in linear float, as handed to the display.
    pub fn presented(&self) -> Option<&Rgba32FImage> {
        self.presented.as_ref()
    }

    /// Last presented frame quantised to 8 bits per channel.
    pub fn presented_rgba8(&self) -> Option<RgbaImage> {
        self.presented.as_ref().map(|image| {
            let (width, height) = image.dimensions();
            RgbaImage::from_fn(width, height, |x, y| {
                let texel = image.get_pixel(x, y).0;
                image::Rgba(texel.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
            })
        })
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn surface_size(&self) -> BufferSize {
        self.surface
    }
}

impl FrameBackend for SoftwareBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "software".into(),
            native_multisample: false,
            max_buffer_dimension: MAX_DIMENSION,
        }
    }

    fn configure_surface(&mut self, viewport: &ViewportState) -> Result<(), BackendError> {
        self.surface = viewport.buffer_size();
        Ok(())
    }

    fn resize_buffers(&mut self, size: BufferSize, stages: &[Stage]) -> Result<(), BackendError> {
        if size.width > MAX_DIMENSION || size.height > MAX_DIMENSION {
            return Err(BackendError::BufferTooLarge {
                size,
                limit: MAX_DIMENSION,
            });
        }
        self.size = size;
        self.buffers = [
            Rgba32FImage::new(size.width, size.height),
            Rgba32FImage::new(size.width, size.height),
        ];
        self.bloom = stages
            .iter()
            .filter(|stage| stage.owns_mip_chain())
            .map(|stage| (stage.name().to_string(), BloomChain::new(size)))
            .collect();
        tracing::debug!(%size, bloom_chains = self.bloom.len(), "software buffers resized");
        Ok(())
    }

    fn prepare_stage(&mut self, stage: &Stage) -> Result<(), BackendError> {
        self.prepared.insert(stage.name().to_string());
        if stage.owns_mip_chain() {
            self.bloom
                .insert(stage.name().to_string(), BloomChain::new(self.size));
        }
        Ok(())
    }

    fn buffer_reports(&self) -> Vec<BufferReport> {
        let mut reports: Vec<BufferReport> = ["read", "write"]
            .into_iter()
            .zip(&self.buffers)
            .map(|(label, buffer)| BufferReport {
                owner: "pipeline".into(),
                label: label.into(),
                size: BufferSize::new(buffer.width(), buffer.height()),
                mip_level: None,
            })
            .collect();
        let mut owners: Vec<_> = self.bloom.keys().collect();
        owners.sort();
        for owner in owners {
            let chain = &self.bloom[owner];
            let mut push = |label: String, image: &Rgba32FImage, level: usize| {
                reports.push(BufferReport {
                    owner: owner.clone(),
                    label,
                    size: BufferSize::new(image.width(), image.height()),
                    mip_level: Some(level as u32),
                });
            };
            push("bright".into(), &chain.bright, 0);
            for (level, image) in chain.horizontal.iter().enumerate() {
                push(format!("blur-h-{level}"), image, level);
            }
            for (level, image) in chain.vertical.iter().enumerate() {
                push(format!("blur-v-{level}"), image, level);
            }
        }
        reports
    }

    fn upload_texture(
        &mut self,
        label: &str,
        image: &Rgba32FImage,
    ) -> Result<TextureId, BackendError> {
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(image.clone());
        tracing::debug!(label, id = id.0, width = image.width(), height = image.height(), "texture uploaded");
        Ok(id)
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn render_scene(
        &mut self,
        target: BufferId,
        inputs: &FrameInputs<'_>,
    ) -> Result<(), BackendError> {
        let environment = match inputs.scene.environment {
            Some(id) => Some(
                self.textures
                    .get(id.0 as usize)
                    .ok_or(BackendError::MissingTexture(id))?,
            ),
            None => None,
        };
        let buffer = &mut self.buffers[Self::index(target)];
        scene::render(buffer, inputs, environment);
        Ok(())
    }

    fn apply_effect(
        &mut self,
        stage: &Stage,
        input: BufferId,
        output: BufferId,
    ) -> Result<(), BackendError> {
        if !self.prepared.contains(stage.name()) {
            return Err(BackendError::UnpreparedStage {
                stage: stage.name().to_string(),
            });
        }
        let kind = match stage.kind() {
            StageKind::Effect(kind) => kind,
            StageKind::BaseRender => {
                return Err(BackendError::Internal(anyhow::anyhow!(
                    "base render stage cannot run as an effect"
                )))
            }
        };
        let uniforms = stage.uniforms();

        match kind {
            EffectKind::NormalDisplacement => {
                let id = uniforms
                    .texture("uNormalMap")
                    .ok_or_else(|| BackendError::Internal(anyhow::anyhow!("normal map is unbound")))?;
                let normal_map = self
                    .textures
                    .get(id.0 as usize)
                    .ok_or(BackendError::MissingTexture(id))?;
                let [first, second] = &mut self.buffers;
                let (src, dst) = match input {
                    BufferId::Read => (&*first, second),
                    BufferId::Write => (&*second, first),
                };
                effects::normal_displacement(src, dst, uniforms, normal_map);
            }
            EffectKind::Bloom => {
                let mut chain = self
                    .bloom
                    .remove(stage.name())
                    .unwrap_or_else(|| BloomChain::new(self.size));
                let (src, dst) = self.split(input, output);
                effects::bloom(src, dst, uniforms, &mut chain);
                self.bloom.insert(stage.name().to_string(), chain);
            }
            other => {
                let (src, dst) = self.split(input, output);
                match other {
                    EffectKind::DotScreen => effects::dot_screen(src, dst, uniforms),
                    EffectKind::Glitch => effects::glitch(src, dst, uniforms),
                    EffectKind::RgbShift => effects::rgb_shift(src, dst, uniforms),
                    EffectKind::Tint => effects::tint(src, dst, uniforms),
                    EffectKind::WaveDisplacement => effects::wave_displacement(src, dst, uniforms),
                    EffectKind::ColorCorrection => effects::color_correction(src, dst),
                    EffectKind::AntialiasFallback => effects::fxaa(src, dst),
                    EffectKind::NormalDisplacement | EffectKind::Bloom => {}
                }
            }
        }
        Ok(())
    }

    fn present(&mut self, source: BufferId) -> Result<(), BackendError> {
        self.presented = Some(self.buffer(source).clone());
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_never_aliases() {
        let mut backend = SoftwareBackend::new(&ViewportState::new(4, 4, 1.0));
        backend.buffers[0].put_pixel(0, 0, image::Rgba([1.0; 4]));
        let (src, dst) = backend.split(BufferId::Read, BufferId::Write);
        assert_eq!(src.get_pixel(0, 0).0, [1.0; 4]);
        assert_eq!(dst.get_pixel(0, 0).0, [0.0; 4]);
        let (src, _) = backend.split(BufferId::Write, BufferId::Read);
        assert_eq!(src.get_pixel(0, 0).0, [0.0; 4]);
    }

    #[test]
    fn bloom_chain_follows_resize() {
        let mut backend = SoftwareBackend::new(&ViewportState::default());
        let stages = [Stage::bloom()];
        backend.prepare_stage(&stages[0]).unwrap();
        backend
            .resize_buffers(BufferSize::new(1000, 500), &stages)
            .unwrap();
        let reports = backend.buffer_reports();
        let blur = reports
            .iter()
            .find(|report| report.label == "blur-v-2")
            .unwrap();
        assert_eq!(blur.size, BufferSize::new(125, 63));
        assert_eq!(blur.mip_level, Some(2));
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        let mut backend = SoftwareBackend::new(&ViewportState::default());
        let err = backend
            .resize_buffers(BufferSize::new(MAX_DIMENSION + 1, 16), &[])
            .unwrap_err();
        assert!(matches!(err, BackendError::BufferTooLarge { .. }));
    }

    #[test]
    fn surface_uses_clamped_density() {
        let mut backend = SoftwareBackend::new(&ViewportState::default());
        let viewport = ViewportState::new(100, 40, 3.0);
        backend.configure_surface(&viewport).unwrap();
        assert_eq!(backend.surface_size(), BufferSize::new(200, 80));
        assert_eq!(backend.surface_size(), viewport.buffer_size());
    }
}

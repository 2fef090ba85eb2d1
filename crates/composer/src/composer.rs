use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::assets::{AssetPoll, AssetTarget, PendingAsset};
use crate::backend::{BackendError, FrameBackend, FrameInputs};
use crate::camera::{OrbitControls, PerspectiveCamera};
use crate::clock::FrameClock;
use crate::params::{ParamValue, ParameterInfo, TextureId};
use crate::pipeline::{FrameReport, Pipeline, PipelineBuilder};
use crate::scene::Scene;
use crate::viewport::ViewportState;
use crate::ComposerError;

const STATS_INTERVAL: u64 = 600;

/// Owns everything a frame needs and drives the pipeline against a backend.
///
/// Hosts call [`Composer::render`] once per display refresh and
/// [`Composer::resize`] from their resize notification.
pub struct Composer<B: FrameBackend> {
    backend: B,
    pipeline: Pipeline,
    scene: Scene,
    camera: PerspectiveCamera,
    controls: OrbitControls,
    viewport: ViewportState,
    clock: FrameClock,
    rng: StdRng,
    pending: Vec<PendingAsset>,
    last_report: Option<FrameReport>,
}

impl<B: FrameBackend> Composer<B> {
    pub fn new(
        mut backend: B,
        builder: PipelineBuilder,
        scene: Scene,
        mut camera: PerspectiveCamera,
        viewport: ViewportState,
    ) -> Result<Self, ComposerError> {
        let capabilities = backend.capabilities();
        let pipeline = builder.build(&capabilities, &viewport)?;
        backend.configure_surface(&viewport)?;
        pipeline.prepare(&mut backend)?;

        camera.set_aspect(viewport.aspect());
        camera.update_projection();

        tracing::info!(
            width = viewport.width,
            height = viewport.height,
            pixel_ratio = viewport.pixel_ratio(),
            buffers = %pipeline.buffer_size(),
            "composer ready"
        );

        Ok(Self {
            backend,
            pipeline,
            scene,
            camera,
            controls: OrbitControls::new(),
            viewport,
            clock: FrameClock::new(),
            rng: StdRng::from_entropy(),
            pending: Vec::new(),
            last_report: None,
        })
    }

    pub fn with_controls(mut self, controls: OrbitControls) -> Self {
        self.controls = controls;
        self
    }

    pub fn with_clock(mut self, clock: FrameClock) -> Self {
        self.clock = clock;
        self
    }

    /// Seeds the RNG behind randomised effects so runs are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Registers a load whose result is bound once it arrives.
    pub fn attach_asset(&mut self, asset: PendingAsset) {
        tracing::debug!(asset = asset.handle.label(), target = ?asset.target, "waiting on asset");
        self.pending.push(asset);
    }

    pub fn pending_assets(&self) -> usize {
        self.pending.len()
    }

    fn poll_assets(&mut self) {
        for mut asset in std::mem::take(&mut self.pending) {
            match asset.handle.poll() {
                AssetPoll::Pending => self.pending.push(asset),
                AssetPoll::Ready(image) => {
                    let label = asset.handle.label().to_string();
                    match self.backend.upload_texture(&label, &image) {
                        Ok(texture) => self.bind(&asset.target, texture, &label),
                        Err(err) => tracing::error!(
                            asset = %label,
                            error = %err,
                            "failed to upload asset; feature stays absent"
                        ),
                    }
                }
                AssetPoll::Failed(err) => {
                    let error = format!("{err:#}");
                    tracing::error!(
                        asset = asset.handle.label(),
                        %error,
                        "asset load failed; feature stays absent"
                    );
                }
            }
        }
    }

    fn bind(&mut self, target: &AssetTarget, texture: TextureId, label: &str) {
        match target {
            AssetTarget::Environment => {
                self.scene.set_environment(texture);
                tracing::info!(asset = label, "environment map bound");
            }
            AssetTarget::StageTexture { stage, uniform } => {
                if self.pipeline.bind_texture(stage, uniform, texture) {
                    tracing::info!(asset = label, stage = %stage, uniform = %uniform, "stage texture bound");
                } else {
                    tracing::warn!(
                        asset = label,
                        stage = %stage,
                        uniform = %uniform,
                        "no texture uniform to bind asset to"
                    );
                }
            }
        }
    }

    /// Runs one frame: asset polling, control damping, the pipeline, present.
    ///
    /// Stage failures are absorbed into the report. Errors returned here are
    /// presentation or fatal backend errors for the host to act on.
    pub fn render(&mut self) -> Result<FrameReport, BackendError> {
        self.poll_assets();
        self.controls.update(&mut self.camera);
        let time = self.clock.tick();

        let inputs = FrameInputs {
            scene: &self.scene,
            camera: &self.camera,
            time,
            viewport: self.viewport,
        };
        let report = self
            .pipeline
            .execute(&mut self.backend, &inputs, &mut self.rng)?;

        if time.frame % STATS_INTERVAL == 0 {
            tracing::debug!(
                frame = time.frame,
                elapsed = time.elapsed,
                executed = report.executed.len(),
                bypassed = report.bypassed.len(),
                failures = report.failures.len(),
                pending_assets = self.pending.len(),
                "frame stats"
            );
        }
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Applies a new viewport before returning: camera reprojection, surface,
    /// then every pipeline buffer. Zero-sized viewports are ignored and
    /// `Ok(false)` is returned.
    pub fn resize(&mut self, viewport: ViewportState) -> Result<bool, BackendError> {
        if !viewport.is_drawable() {
            tracing::warn!(
                width = viewport.width,
                height = viewport.height,
                "ignoring zero-sized viewport"
            );
            return Ok(false);
        }
        let size = viewport.buffer_size();
        let limit = self.backend.capabilities().max_buffer_dimension;
        if size.width > limit || size.height > limit {
            return Err(BackendError::BufferTooLarge { size, limit });
        }

        let previous = self.viewport;
        self.apply_viewport(viewport);
        let resized = self
            .backend
            .configure_surface(&viewport)
            .and_then(|()| self.pipeline.resize(&mut self.backend, &viewport));
        if let Err(err) = resized {
            self.apply_viewport(previous);
            if let Err(restore) = self.backend.configure_surface(&previous) {
                tracing::warn!(error = %restore, "failed to restore surface after resize error");
            }
            return Err(err);
        }
        tracing::debug!(
            width = viewport.width,
            height = viewport.height,
            device_pixel_ratio = viewport.device_pixel_ratio,
            buffers = %self.pipeline.buffer_size(),
            "viewport resized"
        );
        Ok(true)
    }

    fn apply_viewport(&mut self, viewport: ViewportState) {
        self.viewport = viewport;
        self.camera.set_aspect(viewport.aspect());
        self.camera.update_projection();
    }

    /// Rebuilds the surface for the current viewport after it was lost.
    pub fn reconfigure_surface(&mut self) -> Result<(), BackendError> {
        self.backend.configure_surface(&self.viewport)
    }

    pub fn set_parameter(&mut self, key: &str, value: ParamValue) -> Result<ParamValue, ComposerError> {
        self.pipeline.set_parameter(key, value)
    }

    pub fn parameter(&self, key: &str) -> Result<ParamValue, ComposerError> {
        self.pipeline.parameter(key)
    }

    pub fn parameters(&self) -> Vec<ParameterInfo> {
        self.pipeline.parameters()
    }

    pub fn toggle(&mut self, stage: &str) -> Result<bool, ComposerError> {
        self.pipeline.toggle(stage)
    }

    pub fn set_enabled(&mut self, stage: &str, enabled: bool) -> Result<(), ComposerError> {
        self.pipeline.set_enabled(stage, enabled)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn controls_mut(&mut self) -> &mut OrbitControls {
        &mut self.controls
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetHandle;
    use crate::software::SoftwareBackend;
    use crate::stage::Stage;
    use std::time::Duration;

    fn composer(viewport: ViewportState) -> Composer<SoftwareBackend> {
        let backend = SoftwareBackend::new(&viewport);
        let builder = PipelineBuilder::new()
            .effect(Stage::bloom())
            .effect(Stage::normal_displacement(None));
        Composer::new(
            backend,
            builder,
            Scene::new(),
            PerspectiveCamera::default(),
            viewport,
        )
        .unwrap()
        .with_clock(FrameClock::fixed(Duration::from_millis(16)))
        .with_seed(3)
    }

    #[test]
    fn zero_sized_resize_keeps_previous_state() {
        let mut composer = composer(ViewportState::new(64, 48, 1.0));
        assert!(!composer.resize(ViewportState::new(0, 48, 1.0)).unwrap());
        assert_eq!(composer.viewport(), ViewportState::new(64, 48, 1.0));
        assert_eq!(composer.pipeline().buffer_size().width, 64);
    }

    #[test]
    fn resize_reprojects_camera() {
        let mut composer = composer(ViewportState::new(64, 48, 1.0));
        composer.resize(ViewportState::new(96, 48, 1.0)).unwrap();
        assert_eq!(composer.camera().aspect, 2.0);
        let mut expected = composer.camera().clone();
        expected.update_projection();
        assert_eq!(composer.camera().projection(), expected.projection());
    }

    #[test]
    fn stage_texture_binds_when_ready() {
        let mut composer = composer(ViewportState::new(32, 24, 1.0));
        let report = composer.render().unwrap();
        assert!(report.bypassed.contains(&"normal-displacement".to_string()));

        let map = image::Rgba32FImage::from_pixel(4, 4, image::Rgba([0.5, 0.5, 1.0, 1.0]));
        composer.attach_asset(PendingAsset::new(
            AssetTarget::StageTexture {
                stage: "normal-displacement".into(),
                uniform: "uNormalMap".into(),
            },
            AssetHandle::ready("flat-normals", map),
        ));
        let report = composer.render().unwrap();
        assert!(report.executed.contains(&"normal-displacement".to_string()));
        assert_eq!(composer.pending_assets(), 0);
    }

    #[test]
    fn failed_asset_is_dropped_without_failing_frames() {
        let mut composer = composer(ViewportState::new(32, 24, 1.0));
        composer.attach_asset(PendingAsset::new(
            AssetTarget::Environment,
            AssetHandle::failed("cockpit.hdr", anyhow::anyhow!("file not found")),
        ));
        let report = composer.render().unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(composer.pending_assets(), 0);
        assert!(composer.scene().environment.is_none());
    }
}

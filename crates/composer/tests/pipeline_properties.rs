use std::time::Duration;

use composer::software::linear_to_srgb;
use composer::{
    AssetHandle, AssetTarget, BackendCapabilities, BackendError, BufferId, BufferReport,
    BufferSize, Composer, EffectKind, FrameBackend, FrameClock, FrameInputs, ParamValue,
    PendingAsset, PerspectiveCamera, PipelineBuilder, PipelineVariant, Scene, SoftwareBackend,
    Sphere, Stage, TextureId, ViewportState,
};
use glam::Vec3;
use image::Rgba32FImage;

fn scene() -> Scene {
    let mut scene = Scene::new();
    scene
        .add_sphere(Sphere::new(Vec3::ZERO, 1.5, [0.8, 0.3, 0.2]).with_material(0.4, 0.1))
        .unwrap();
    scene
}

fn build<B: FrameBackend>(backend: B, builder: PipelineBuilder, viewport: ViewportState) -> Composer<B> {
    Composer::new(
        backend,
        builder,
        scene(),
        PerspectiveCamera::default(),
        viewport,
    )
    .unwrap()
    .with_clock(FrameClock::fixed(Duration::from_millis(16)))
    .with_seed(42)
}

fn software(builder: PipelineBuilder, viewport: ViewportState) -> Composer<SoftwareBackend> {
    build(SoftwareBackend::new(&viewport), builder, viewport)
}

fn full_chain() -> PipelineBuilder {
    PipelineBuilder::new()
        .effect(Stage::dot_screen())
        .effect(Stage::glitch())
        .effect(Stage::rgb_shift())
        .effect(Stage::bloom())
        .effect(Stage::tint())
        .effect(Stage::normal_displacement(None))
}

fn presented(composer: &Composer<SoftwareBackend>) -> Rgba32FImage {
    composer.backend().presented().cloned().unwrap()
}

/// Software backend that can pretend to multisample and fail chosen stages.
struct ScriptedBackend {
    inner: SoftwareBackend,
    native_multisample: bool,
    failing_stage: Option<String>,
}

impl ScriptedBackend {
    fn new(viewport: &ViewportState) -> Self {
        Self {
            inner: SoftwareBackend::new(viewport),
            native_multisample: false,
            failing_stage: None,
        }
    }
}

impl FrameBackend for ScriptedBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            native_multisample: self.native_multisample,
            ..self.inner.capabilities()
        }
    }

    fn configure_surface(&mut self, viewport: &ViewportState) -> Result<(), BackendError> {
        self.inner.configure_surface(viewport)
    }

    fn resize_buffers(&mut self, size: BufferSize, stages: &[Stage]) -> Result<(), BackendError> {
        self.inner.resize_buffers(size, stages)
    }

    fn prepare_stage(&mut self, stage: &Stage) -> Result<(), BackendError> {
        self.inner.prepare_stage(stage)
    }

    fn buffer_reports(&self) -> Vec<BufferReport> {
        self.inner.buffer_reports()
    }

    fn upload_texture(
        &mut self,
        label: &str,
        image: &Rgba32FImage,
    ) -> Result<TextureId, BackendError> {
        self.inner.upload_texture(label, image)
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        self.inner.begin_frame()
    }

    fn render_scene(
        &mut self,
        target: BufferId,
        inputs: &FrameInputs<'_>,
    ) -> Result<(), BackendError> {
        self.inner.render_scene(target, inputs)
    }

    fn apply_effect(
        &mut self,
        stage: &Stage,
        input: BufferId,
        output: BufferId,
    ) -> Result<(), BackendError> {
        if self.failing_stage.as_deref() == Some(stage.name()) {
            return Err(BackendError::Internal(anyhow::anyhow!("shader exploded")));
        }
        self.inner.apply_effect(stage, input, output)
    }

    fn present(&mut self, source: BufferId) -> Result<(), BackendError> {
        self.inner.present(source)
    }
}

fn assert_buffers_sized(reports: &[BufferReport], expected: BufferSize) {
    assert!(!reports.is_empty());
    for report in reports {
        let want = match report.mip_level {
            Some(level) => expected.mip(level),
            None => expected,
        };
        assert_eq!(report.size, want, "{} / {}", report.owner, report.label);
    }
}

#[test]
fn color_correction_follows_every_effect_and_precedes_fallback() {
    for (viewport, multisample) in [
        (ViewportState::new(64, 48, 1.0), false),
        (ViewportState::new(64, 48, 1.0), true),
        (ViewportState::new(32, 24, 2.0), false),
    ] {
        let mut backend = ScriptedBackend::new(&viewport);
        backend.native_multisample = multisample;
        let composer = build(backend, full_chain(), viewport);
        let pipeline = composer.pipeline();

        let correction = pipeline
            .position_of_kind(EffectKind::ColorCorrection)
            .unwrap();
        for (index, stage) in pipeline.stages().iter().enumerate() {
            match stage.effect_kind() {
                Some(EffectKind::ColorCorrection) | None => {}
                Some(EffectKind::AntialiasFallback) => assert!(index > correction),
                Some(_) => assert!(index < correction, "{} after correction", stage.name()),
            }
        }

        let fallback = pipeline.position_of_kind(EffectKind::AntialiasFallback);
        let expect_fallback = viewport.pixel_ratio() == 1.0 && !multisample;
        assert_eq!(fallback.is_some(), expect_fallback);
        assert_eq!(
            pipeline.variant() == PipelineVariant::WithAntialiasFallback,
            expect_fallback
        );
        if let Some(fallback) = fallback {
            assert_eq!(fallback, pipeline.stages().len() - 1);
        }
    }
}

#[test]
fn resize_to_dense_display_sizes_every_buffer() {
    let mut composer = software(full_chain(), ViewportState::new(800, 600, 1.0));
    assert_buffers_sized(
        &composer.backend().buffer_reports(),
        BufferSize::new(800, 600),
    );

    composer
        .resize(ViewportState::new(1920, 1080, 2.0))
        .unwrap();
    let expected = BufferSize::new(3840, 2160);
    assert_eq!(composer.pipeline().buffer_size(), expected);
    assert_buffers_sized(&composer.backend().buffer_reports(), expected);
}

#[test]
fn density_above_two_is_clamped() {
    let mut composer = software(full_chain(), ViewportState::new(64, 48, 1.0));
    composer.resize(ViewportState::new(160, 90, 3.0)).unwrap();
    let expected = BufferSize::new(320, 180);
    assert_eq!(composer.pipeline().buffer_size(), expected);
    assert_buffers_sized(&composer.backend().buffer_reports(), expected);
}

#[test]
fn rejected_resize_leaves_viewport_and_buffers_in_step() {
    let mut composer = software(full_chain(), ViewportState::new(64, 48, 1.0));
    let before = composer.viewport();
    let aspect = composer.camera().aspect;

    let err = composer
        .resize(ViewportState::new(9000, 100, 2.0))
        .unwrap_err();
    assert!(matches!(err, BackendError::BufferTooLarge { limit: 16_384, .. }));

    assert_eq!(composer.viewport(), before);
    assert_eq!(composer.camera().aspect, aspect);
    assert_eq!(composer.viewport().buffer_size(), composer.pipeline().buffer_size());
    assert_eq!(composer.backend().surface_size(), BufferSize::new(64, 48));
    assert_buffers_sized(&composer.backend().buffer_reports(), BufferSize::new(64, 48));
    composer.render().unwrap();
    assert_eq!(presented(&composer).dimensions(), (64, 48));
}

#[test]
fn buffers_are_fresh_on_the_frame_after_resize() {
    let mut composer = software(
        PipelineBuilder::new().effect(Stage::bloom()),
        ViewportState::new(40, 30, 1.0),
    );
    composer.render().unwrap();
    composer.resize(ViewportState::new(50, 20, 1.5)).unwrap();
    composer.render().unwrap();
    let frame = presented(&composer);
    assert_eq!(frame.dimensions(), (75, 30));
}

#[test]
fn bypass_toggle_round_trip_is_idempotent() {
    let viewport = ViewportState::new(48, 32, 1.0);
    let chain = || {
        PipelineBuilder::new()
            .effect(Stage::bloom())
            .effect(Stage::tint().with_uniform(
                "uTint",
                composer::UniformValue::Vec3([0.1, 0.0, -0.05]),
            ))
    };

    let mut reference = software(chain(), viewport);
    reference.render().unwrap();
    let before = presented(&reference);

    let mut toggled = software(chain(), viewport);
    toggled.render().unwrap();
    toggled.set_enabled("tint", false).unwrap();
    toggled.set_enabled("tint", true).unwrap();
    toggled.render().unwrap();
    assert_eq!(presented(&toggled), before);

    // A disabled stage contributes nothing at all.
    let mut disabled = software(chain(), viewport);
    disabled.set_enabled("tint", false).unwrap();
    disabled.render().unwrap();
    let mut without = software(PipelineBuilder::new().effect(Stage::bloom()), viewport);
    without.render().unwrap();
    assert_eq!(presented(&disabled), presented(&without));
}

#[test]
fn parameter_write_shows_on_the_next_frame() {
    let viewport = ViewportState::new(32, 24, 2.0);
    let mut composer = software(PipelineBuilder::new().effect(Stage::tint()), viewport);
    composer.render().unwrap();
    let before = presented(&composer);

    let stored = composer
        .set_parameter("tint.red-x", ParamValue::Float(0.5))
        .unwrap();
    assert_eq!(stored, ParamValue::Float(0.5));
    composer.render().unwrap();
    let after = presented(&composer);

    for (old, new) in before.pixels().zip(after.pixels()) {
        assert!(new.0[0] > old.0[0]);
        assert_eq!(new.0[1], old.0[1]);
        assert_eq!(new.0[2], old.0[2]);
    }
}

#[test]
fn base_plus_color_correction_is_exact_and_reproducible() {
    let viewport = ViewportState::new(40, 30, 2.0);
    let mut first = software(PipelineBuilder::new(), viewport);
    let report = first.render().unwrap();
    assert_eq!(report.executed, ["scene", "color-correction"]);
    assert_eq!(report.presented, BufferId::Write);

    let base = first.backend().buffer(BufferId::Read).clone();
    let output = presented(&first);
    for (raw, corrected) in base.pixels().zip(output.pixels()) {
        for channel in 0..3 {
            assert_eq!(corrected.0[channel], linear_to_srgb(raw.0[channel]));
        }
        assert_eq!(corrected.0[3], raw.0[3]);
    }

    let mut second = software(PipelineBuilder::new(), viewport);
    second.render().unwrap();
    assert_eq!(presented(&second), output);
}

#[test]
fn environment_failure_keeps_rendering_old_and_new_content() {
    let viewport = ViewportState::new(48, 36, 1.0);
    let mut composer = software(PipelineBuilder::new().effect(Stage::bloom()), viewport);
    composer.attach_asset(PendingAsset::new(
        AssetTarget::Environment,
        AssetHandle::failed("cockpit.hdr", anyhow::anyhow!("simulated decode failure")),
    ));

    for _ in 0..3 {
        let report = composer.render().unwrap();
        assert!(report.failures.is_empty());
    }
    assert!(composer.scene().environment.is_none());
    assert_eq!(composer.pending_assets(), 0);

    // The sphere present before the failure is still drawn in the centre.
    let frame = presented(&composer);
    let (width, height) = frame.dimensions();
    let centre = frame.get_pixel(width / 2, height / 2).0;
    let corner = frame.get_pixel(0, 0).0;
    assert_ne!(centre, corner);

    composer
        .scene_mut()
        .add_sphere(Sphere::new(Vec3::new(2.0, 0.0, -1.0), 0.75, [0.1, 0.9, 0.2]))
        .unwrap();
    composer.render().unwrap();
    assert_ne!(presented(&composer), frame);
    assert_eq!(composer.backend().frames_presented(), 4);
}

#[test]
fn failing_stage_passes_through_and_loop_continues() {
    let viewport = ViewportState::new(32, 24, 2.0);
    let mut backend = ScriptedBackend::new(&viewport);
    backend.failing_stage = Some("bloom".into());
    let mut composer = build(
        backend,
        PipelineBuilder::new().effect(Stage::bloom()).effect(Stage::tint()),
        viewport,
    );

    for _ in 0..2 {
        let report = composer.render().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, "bloom");
        assert_eq!(report.executed, ["scene", "tint", "color-correction"]);
    }

    let mut reference = software(PipelineBuilder::new().effect(Stage::tint()), viewport);
    reference.render().unwrap();
    assert_eq!(
        composer.backend().inner.presented(),
        reference.backend().presented()
    );
}

#[test]
fn registry_dump_serialises_for_a_panel() {
    let composer = software(full_chain(), ViewportState::new(16, 16, 1.0));
    let json = serde_json::to_value(composer.parameters()).unwrap();
    let keys: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["key"].as_str().unwrap())
        .collect();
    for key in [
        "bloom.enabled",
        "bloom.strength",
        "bloom.radius",
        "bloom.threshold",
        "tint.red-x",
        "tint.green-y",
        "tint.blue-z",
        "glitch.go_wild",
    ] {
        assert!(keys.contains(&key), "missing {key}");
    }
    assert!(!keys.iter().any(|key| key.starts_with("color-correction")));
}

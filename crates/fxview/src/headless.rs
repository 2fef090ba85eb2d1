use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use composer::{Composer, FrameClock, SoftwareBackend, ViewportState};

use crate::bindings::SceneParts;
use crate::run::Session;

/// Fixed step so exported frames do not depend on wall-clock speed.
const FRAME_STEP: Duration = Duration::from_millis(16);

/// Builds a composer over the CPU reference backend with every asset resident.
pub fn build(
    parts: SceneParts,
    session: &Session,
    viewport: ViewportState,
) -> Result<Composer<SoftwareBackend>> {
    let backend = SoftwareBackend::new(&viewport);
    let mut composer = Composer::new(
        backend,
        parts.builder,
        parts.scene,
        parts.camera,
        viewport,
    )
    .context("failed to construct headless composer")?
    .with_controls(parts.controls)
    .with_clock(FrameClock::fixed(FRAME_STEP));
    if let Some(seed) = session.seed {
        composer = composer.with_seed(seed);
    }
    for request in parts.assets {
        composer.attach_asset(request.load_now());
    }
    session.apply_overrides(|key, value| composer.set_parameter(key, value).map_err(Into::into))?;
    Ok(composer)
}

/// Renders `frames` frames and writes the last one to `output`.
pub fn export(composer: &mut Composer<SoftwareBackend>, frames: u64, output: &Path) -> Result<()> {
    let frames = frames.max(1);
    for _ in 0..frames {
        let report = composer.render().context("headless frame failed")?;
        for failure in &report.failures {
            tracing::warn!(stage = %failure.stage, error = %failure.error, "stage passed through");
        }
    }

    let image = composer
        .backend()
        .presented_rgba8()
        .context("no frame was presented")?;
    image
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(
        path = %output.display(),
        width = image.width(),
        height = image.height(),
        frames,
        "wrote headless frame"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::scene_parts;
    use crate::cli::Displacement;
    use composer::ParamValue;
    use fxconfig::ViewerConfig;
    use tempfile::TempDir;

    fn session() -> Session {
        Session {
            seed: Some(3),
            overrides: vec![("bloom.strength".into(), ParamValue::Float(0.9))],
        }
    }

    #[test]
    fn export_writes_png_at_buffer_size() {
        let mut config = ViewerConfig::default();
        config.scene.environment = None;
        config.effects.retain(|effect| effect.normal_map.is_none());
        let parts = scene_parts(&config, Displacement::Static).unwrap();

        let mut composer = build(parts, &session(), ViewportState::new(24, 16, 1.0)).unwrap();
        assert_eq!(
            composer.parameter("bloom.strength").unwrap(),
            ParamValue::Float(0.9)
        );

        let dir = TempDir::new().unwrap();
        let output = dir.path().join("frame.png");
        export(&mut composer, 2, &output).unwrap();

        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (24, 16));
        assert_eq!(composer.backend().frames_presented(), 2);
    }

    #[test]
    fn bad_override_fails_construction() {
        let parts = scene_parts(&ViewerConfig::default(), Displacement::Static).unwrap();
        let session = Session {
            seed: None,
            overrides: vec![("bloom.missing".into(), ParamValue::Float(1.0))],
        };
        assert!(build(parts, &session, ViewportState::new(8, 8, 1.0)).is_err());
    }
}

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, Rgba32FImage};

/// Result of a non-blocking poll on an [`AssetHandle`].
#[derive(Debug)]
pub enum AssetPoll<T> {
    Pending,
    Ready(T),
    Failed(anyhow::Error),
}

enum HandleState<T> {
    Ready(T),
    Failed(anyhow::Error),
    Threaded { receiver: Receiver<Result<T>> },
    Taken,
}

/// One-shot load running on a worker thread.
///
/// `poll` never blocks. It yields `Ready` or `Failed` exactly once, then
/// reports `Pending` forever; check `is_resolved` to tell the two apart.
pub struct AssetHandle<T> {
    label: String,
    state: HandleState<T>,
}

impl<T: Send + 'static> AssetHandle<T> {
    pub fn spawn<F>(label: impl Into<String>, load: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(load());
        });
        Self {
            label: label.into(),
            state: HandleState::Threaded { receiver },
        }
    }
}

impl<T> AssetHandle<T> {
    pub fn ready(label: impl Into<String>, value: T) -> Self {
        Self {
            label: label.into(),
            state: HandleState::Ready(value),
        }
    }

    pub fn failed(label: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            label: label.into(),
            state: HandleState::Failed(error),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, HandleState::Taken)
    }

    pub fn poll(&mut self) -> AssetPoll<T> {
        let received = match &self.state {
            HandleState::Threaded { receiver } => Some(receiver.try_recv()),
            _ => None,
        };
        match received {
            Some(Ok(Ok(value))) => self.state = HandleState::Ready(value),
            Some(Ok(Err(err))) => self.state = HandleState::Failed(err),
            Some(Err(TryRecvError::Empty)) => return AssetPoll::Pending,
            Some(Err(TryRecvError::Disconnected)) => {
                self.state = HandleState::Failed(anyhow!(
                    "asset worker for '{}' exited before returning a result",
                    self.label
                ))
            }
            None => {}
        }
        match std::mem::replace(&mut self.state, HandleState::Taken) {
            HandleState::Ready(value) => AssetPoll::Ready(value),
            HandleState::Failed(err) => AssetPoll::Failed(err),
            HandleState::Threaded { .. } | HandleState::Taken => AssetPoll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            HandleState::Ready(_) => "ready",
            HandleState::Failed(_) => "failed",
            HandleState::Threaded { .. } => "pending",
            HandleState::Taken => "resolved",
        };
        f.debug_struct("AssetHandle")
            .field("label", &self.label)
            .field("state", &state)
            .finish()
    }
}

/// Where a loaded image lands once it is resident on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetTarget {
    /// Scene background and image-based lighting.
    Environment,
    /// A texture uniform of a named stage.
    StageTexture { stage: String, uniform: String },
}

#[derive(Debug)]
pub struct PendingAsset {
    pub target: AssetTarget,
    pub handle: AssetHandle<Rgba32FImage>,
}

impl PendingAsset {
    pub fn new(target: AssetTarget, handle: AssetHandle<Rgba32FImage>) -> Self {
        Self { target, handle }
    }
}

/// How 8-bit texel values should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureEncoding {
    /// Colour data stored with the sRGB transfer curve; decoded to linear.
    Color,
    /// Non-colour data such as normal maps; kept as-is.
    Data,
}

/// Starts decoding `path` into a linear float image on a worker thread.
pub fn load_image(path: impl AsRef<Path>, encoding: TextureEncoding) -> AssetHandle<Rgba32FImage> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let label = path.display().to_string();
    AssetHandle::spawn(label, move || decode_image(&path, encoding))
}

pub fn decode_image(path: &Path, encoding: TextureEncoding) -> Result<Rgba32FImage> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?;
    let is_float = matches!(
        decoded,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)
    );
    let mut rgba = decoded.to_rgba32f();
    if encoding == TextureEncoding::Color && !is_float {
        for pixel in rgba.pixels_mut() {
            for channel in &mut pixel.0[..3] {
                *channel = srgb_to_linear(*channel);
            }
        }
    }
    Ok(rgba)
}

fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.04045 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait<T>(handle: &mut AssetHandle<T>) -> AssetPoll<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match handle.poll() {
                AssetPoll::Pending if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(5))
                }
                other => return other,
            }
        }
    }

    #[test]
    fn threaded_result_is_delivered_once() {
        let mut handle = AssetHandle::spawn("answer", || Ok(42));
        assert!(matches!(wait(&mut handle), AssetPoll::Ready(42)));
        assert!(handle.is_resolved());
        assert!(matches!(handle.poll(), AssetPoll::Pending));
    }

    #[test]
    fn worker_error_surfaces_as_failure() {
        let mut handle: AssetHandle<u32> = AssetHandle::spawn("broken", || anyhow::bail!("boom"));
        match wait(&mut handle) {
            AssetPoll::Failed(err) => assert!(err.to_string().contains("boom")),
            other => panic!("unexpected poll result {other:?}"),
        }
    }

    #[test]
    fn missing_file_fails_without_panicking() {
        let mut handle = load_image("/definitely/not/here.hdr", TextureEncoding::Color);
        assert!(matches!(wait(&mut handle), AssetPoll::Failed(_)));
    }

    #[test]
    fn color_pngs_are_linearised_and_data_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grey.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([128, 128, 128, 255]))
            .save(&path)
            .unwrap();

        let color = decode_image(&path, TextureEncoding::Color).unwrap();
        let data = decode_image(&path, TextureEncoding::Data).unwrap();
        let linear = color.get_pixel(0, 0).0[0];
        let raw = data.get_pixel(0, 0).0[0];
        assert!((raw - 128.0 / 255.0).abs() < 1.0e-6);
        assert!((linear - 0.2158).abs() < 1.0e-3, "{linear}");
        assert_eq!(color.get_pixel(0, 0).0[3], 1.0);
    }
}

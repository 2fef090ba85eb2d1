use image::Rgba32FImage;
use serde::Serialize;

use crate::camera::PerspectiveCamera;
use crate::clock::FrameTime;
use crate::params::TextureId;
use crate::scene::Scene;
use crate::stage::Stage;
use crate::viewport::{BufferSize, ViewportState};

/// What the active backend can do natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub name: String,
    /// Hardware multisample resolve on the intermediate target format.
    pub native_multisample: bool,
    pub max_buffer_dimension: u32,
}

/// One of the two intermediate buffers the pipeline ping-pongs between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BufferId {
    Read,
    Write,
}

impl BufferId {
    pub fn other(self) -> Self {
        match self {
            BufferId::Read => BufferId::Write,
            BufferId::Write => BufferId::Read,
        }
    }
}

/// Size of one backend-owned buffer, for resize verification and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferReport {
    /// Stage name, or `"pipeline"` for the shared ping-pong pair.
    pub owner: String,
    pub label: String,
    pub size: BufferSize,
    /// Set for downscaled buffers such as bloom mips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mip_level: Option<u32>,
}

/// Fixed inputs of the base render stage for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub scene: &'a Scene,
    pub camera: &'a PerspectiveCamera,
    pub time: FrameTime,
    pub viewport: ViewportState,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("surface lost")]
    SurfaceLost,
    #[error("surface outdated")]
    SurfaceOutdated,
    #[error("timed out waiting for the next surface texture")]
    Timeout,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("texture {0:?} is not resident")]
    MissingTexture(TextureId),
    #[error("stage '{stage}' is not prepared")]
    UnpreparedStage { stage: String },
    #[error("buffer size {size} exceeds backend limit {limit}")]
    BufferTooLarge { size: BufferSize, limit: u32 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BackendError {
    /// Errors after which the frame loop cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::OutOfMemory)
    }

    /// Errors cured by reconfiguring the surface.
    pub fn needs_reconfigure(&self) -> bool {
        matches!(self, BackendError::SurfaceLost | BackendError::SurfaceOutdated)
    }
}

/// Executes stages and owns every sized image buffer.
///
/// The pipeline drives a backend in a fixed per-frame order:
/// `begin_frame`, `render_scene` into [`BufferId::Read`], `apply_effect` for
/// each enabled stage, `present`.
pub trait FrameBackend {
    fn capabilities(&self) -> BackendCapabilities;

    /// Resizes the display surface to the viewport's physical size.
    fn configure_surface(&mut self, viewport: &ViewportState) -> Result<(), BackendError>;

    /// Resizes the ping-pong pair and every stage-owned buffer to `size`.
    fn resize_buffers(&mut self, size: BufferSize, stages: &[Stage]) -> Result<(), BackendError>;

    /// Builds whatever the stage needs (programs, bind layouts). Called once per stage at construction.
    fn prepare_stage(&mut self, stage: &Stage) -> Result<(), BackendError>;

    fn buffer_reports(&self) -> Vec<BufferReport>;

    /// Uploads a linear float image and returns a handle for texture uniforms.
    fn upload_texture(&mut self, label: &str, image: &Rgba32FImage)
        -> Result<TextureId, BackendError>;

    fn begin_frame(&mut self) -> Result<(), BackendError>;

    fn render_scene(&mut self, target: BufferId, inputs: &FrameInputs<'_>)
        -> Result<(), BackendError>;

    fn apply_effect(
        &mut self,
        stage: &Stage,
        input: BufferId,
        output: BufferId,
    ) -> Result<(), BackendError>;

    fn present(&mut self, source: BufferId) -> Result<(), BackendError>;
}

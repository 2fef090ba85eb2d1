//! Frame pipeline composition for post-processed scene rendering.
//!
//! The crate is split along the lines of what mutates when:
//! - `stage` describes each effect: shader reference, ordered uniforms and the
//!   tunable parameters bound to them.
//! - `pipeline` fixes the stage order at construction (base render, effects,
//!   colour correction, optional antialias fallback) and runs it per frame.
//! - `viewport` owns logical size plus the clamped device pixel ratio every
//!   intermediate buffer is derived from.
//! - `camera`, `scene`, `assets` and `clock` are the collaborators a frame
//!   needs; assets are polled through handles so frames never wait.
//! - `backend` is the seam between composition and pixels. `software` is the
//!   CPU reference rasterizer used for headless export and tests; the wgpu
//!   implementation lives in the `renderer` crate.
//! - `composer` glues everything into the `Composer` that hosts drive.

mod assets;
mod backend;
mod camera;
mod clock;
mod composer;
mod params;
mod pipeline;
mod scene;
pub mod software;
mod stage;
mod viewport;

pub use assets::{
    decode_image, load_image, AssetHandle, AssetPoll, AssetTarget, PendingAsset, TextureEncoding,
};
pub use backend::{
    BackendCapabilities, BackendError, BufferId, BufferReport, FrameBackend, FrameInputs,
};
pub use camera::{OrbitControls, PerspectiveCamera};
pub use clock::{FrameClock, FrameRequest, FrameTime};
pub use composer::Composer;
pub use params::{
    ParamBinding, ParamValue, ParameterInfo, TextureId, TunableParameter, UniformValue, Uniforms,
};
pub use pipeline::{FrameReport, Pipeline, PipelineBuilder, PipelineVariant, StageFailure};
pub use scene::{DirectionalLight, Scene, Sphere, ToneMapping, MAX_SPHERES};
pub use software::SoftwareBackend;
pub use stage::{EffectKind, GlitchState, ShaderRef, Stage, StageKind};
pub use viewport::{BufferSize, ViewportState, MAX_PIXEL_RATIO};

/// Errors surfaced by pipeline construction and the parameter registry.
#[derive(Debug, thiserror::Error)]
pub enum ComposerError {
    #[error("stage name '{0}' is declared more than once")]
    DuplicateStage(String),
    #[error("{0} is appended by the pipeline itself and cannot be declared as an effect")]
    ReservedStage(EffectKind),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("stage '{0}' is mandatory and cannot be toggled")]
    MandatoryStage(String),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("too many spheres in scene (max {max})")]
    TooManySpheres { max: usize },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

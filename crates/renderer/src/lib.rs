//! wgpu renderer and window host for the frame pipeline.
//!
//! ```text
//!   fxview
//!      │ RendererConfig + ComposerSetup
//!      ▼
//!   WindowRuntime::spawn ──▶ GpuContext ──▶ GpuBackend ──▶ Composer
//!      │                                                      │
//!      └─ ControlHandle ──▶ winit event loop ──▶ redraw ──▶ Composer::render
//! ```
//!
//! `compile` generates GLSL for every stage from its ordered uniforms; the
//! `gpu` module turns those programs into wgpu pipelines and implements
//! `composer::FrameBackend`. The window thread owns the composer; other
//! threads reach it through `ControlHandle`.

mod compile;
mod gpu;
mod types;
mod window;

pub use gpu::GpuBackend;
pub use types::{AdapterProfile, Antialiasing, GpuPowerPreference, RendererConfig};
pub use window::{ComposerSetup, ControlCommand, ControlHandle, WindowRuntime};

//! wgpu backend for the frame pipeline.
//!
//! - `context` owns instance/device/surface wiring, picks a linear surface
//!   format and decides whether the scene pass can multisample.
//! - `pass` compiles generated GLSL into full-screen pipelines sharing one
//!   uniform layout and vertex module.
//! - `uniforms` packs each stage's ordered uniforms into its std140 block.
//! - `targets` holds the Rgba16Float ping-pong pair and MSAA attachment.
//! - `textures` uploads decoded images as half-float textures.
//! - `scene` ray-casts the base render; `effects` runs every other stage,
//!   bloom as a chain of passes over its own mip buffers.
//! - `state` glues everything into `GpuBackend`, the `FrameBackend` the
//!   window host drives.

mod context;
mod effects;
mod pass;
mod scene;
mod state;
mod targets;
mod textures;
mod uniforms;

pub(crate) use context::GpuContext;
pub use state::GpuBackend;
pub(crate) use state::surface_extent;

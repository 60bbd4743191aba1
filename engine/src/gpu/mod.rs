//! GPU Backend
//!
//! wgpu implementation of the evaluation chain:
//!
//! - [`context`] - headless device and buffer helpers
//! - [`shaders`] - WGSL sources and kernel composition
//! - [`pipelines`] - compute pipelines and bind group layouts
//! - [`buffers`] - uniform blocks, shared and per-surface resources
//! - [`dispatch`] - per-chunk kernel chain and seal pass
//! - [`readback`] - blocking and background buffer reads
//! - [`backend`] - [`WgpuBackend`], the [`ComputeBackend`](crate::backend::ComputeBackend) impl

pub mod backend;
pub mod buffers;
pub mod context;
pub mod dispatch;
pub mod pipelines;
pub mod readback;
pub mod shaders;

pub use backend::WgpuBackend;
pub use buffers::{ChunkParams, SealParams, SharedResources, SurfaceBuffers};
pub use context::{GpuContext, GpuContextConfig};
pub use pipelines::ClayPipelines;
pub use shaders::{Kernel, ShaderLibrary, ShaderSource};

//! Clay Engine Library
//!
//! Chunked signed-distance-field evaluation and surface extraction. A scene owns
//! containers; each container holds an ordered list of solids, splits its work
//! volume into up to 3 × 3 × 3 chunks and turns the blended field into render
//! data with one of three strategies (point splat, sparse voxels, marching-cubes
//! mesh). Evaluation runs on a wgpu device or on the CPU mirror of the same
//! passes.
//!
//! # Modules
//!
//! - [`solid`] - solid records, the per-container registry and the primitive catalogue
//! - [`field`] - distance functions and the blend/subtract/paint combination rules
//! - [`chunk`] - chunk grid, auto-bounds planning and per-chunk solid filtering
//! - [`grid`] - two-level grid evaluation of one chunk
//! - [`extract`] - surface extraction strategies and mesh materialization
//! - [`arena`] - surface memory layouts and the shared arena
//! - [`instance`] - instance broadcasting of one container's surface
//! - [`backend`] - the compute backend trait and the CPU backend
//! - [`gpu`] - the wgpu backend and WGSL kernels
//! - [`scene`] - the host-facing scene
//!
//! # Example
//!
//! ```ignore
//! use sdf_clay_engine::{ClayScene, CpuBackend, EngineConfig, Solid};
//! use sdf_clay_engine::field::PRIM_SPHERE;
//!
//! let mut scene = ClayScene::new(CpuBackend::new(), EngineConfig::default())?;
//! let id = scene.create_default_container()?;
//! scene.add_solid(id, Solid::new(PRIM_SPHERE))?;
//! scene.tick()?;
//! let snapshot = scene.surface_snapshot(id)?;
//! ```

pub mod arena;
pub mod backend;
pub mod chunk;
pub mod config;
pub mod container;
pub mod error;
pub mod extract;
pub mod field;
pub mod gpu;
pub mod grid;
pub mod instance;
pub mod scene;
pub mod scheduler;
pub mod solid;

pub use arena::{ArenaManager, Placement, SurfaceLayout};
pub use backend::{ComputeBackend, CpuBackend, SurfaceSnapshot, SurfaceStatus};
pub use chunk::{ChunkGrid, ChunkRecord};
pub use config::{ContainerOptions, DetailCurve, EngineConfig, EngineLimits, GridResolution, MeshOptions};
pub use container::ContainerId;
pub use error::{EngineError, EngineResult};
pub use extract::{MeshData, Strategy};
pub use gpu::{GpuContext, GpuContextConfig, WgpuBackend};
pub use instance::{AttachOutcome, InstanceTransform};
pub use scene::ClayScene;
pub use solid::{Catalogue, Solid, SolidFlags, SolidId};

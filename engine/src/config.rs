//! Engine Configuration
//!
//! Global caps, grid resolution, the detail → chunk size curve and the per-container
//! options. Everything here is plain data with `Default` and serde support so a
//! host can keep it in a JSON file next to its scenes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::extract::Strategy;

/// Hard ceiling for chunks along one axis (3 × 3 × 3 = 27 chunks).
pub const MAX_CHUNKS_PER_AXIS: u32 = 3;

/// Largest number of chunks a container can have.
pub const MAX_CHUNKS: u32 = MAX_CHUNKS_PER_AXIS * MAX_CHUNKS_PER_AXIS * MAX_CHUNKS_PER_AXIS;

/// Default container detail (0..100 scale).
pub const DEFAULT_DETAIL: i32 = 88;

/// Global caps shared by every container in a scene.
///
/// Values are clamped by [`EngineLimits::sanitized`] whenever they are applied,
/// so a host can deserialize arbitrary numbers without breaking invariants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Solids per container; extra solids are excluded with a warning
    pub max_solids: u32,
    /// Capacity of each chunk's filtered solid list
    pub max_solids_per_voxel: u32,
    /// Point records per container (point-splat strategy)
    pub max_point_count: u32,
    /// Mesh vertices per container (mesh strategy)
    pub max_mesh_vertices: u32,
    /// Fraction of the dense sparse-voxel capacity actually allocated
    pub buffer_reduce_factor: f32,
    /// Instances per source container
    pub max_instances: u32,
    /// Upper bound for chunks along each axis ("max bounds")
    pub max_chunks_per_axis: u32,
    /// Caps the mesh strategy at 2 chunks per axis
    pub limit_mesh_memory: bool,
    /// Multiplies every solid's blend factor
    pub global_blend: f32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_solids: 512,
            max_solids_per_voxel: 128,
            max_point_count: 256 * 256 * 256,
            max_mesh_vertices: 4_194_304,
            buffer_reduce_factor: 0.1,
            max_instances: 200,
            max_chunks_per_axis: MAX_CHUNKS_PER_AXIS,
            limit_mesh_memory: true,
            global_blend: 1.0,
        }
    }
}

impl EngineLimits {
    pub const MIN_SOLIDS: u32 = 64;
    pub const MAX_SOLIDS: u32 = 16384;
    pub const MIN_POINT_COUNT: u32 = 1024;
    pub const MAX_POINT_COUNT: u32 = 256 * 256 * 256 * 27;
    pub const MIN_MESH_VERTICES: u32 = 3072;
    pub const MAX_MESH_VERTICES: u32 = 16_777_216;

    /// Return a copy with every field clamped to its valid range.
    pub fn sanitized(&self) -> Self {
        let max_solids = self.max_solids.clamp(Self::MIN_SOLIDS, Self::MAX_SOLIDS);
        Self {
            max_solids,
            max_solids_per_voxel: self.max_solids_per_voxel.clamp(1, 4096),
            max_point_count: self
                .max_point_count
                .clamp(Self::MIN_POINT_COUNT, Self::MAX_POINT_COUNT),
            max_mesh_vertices: self
                .max_mesh_vertices
                .clamp(Self::MIN_MESH_VERTICES, Self::MAX_MESH_VERTICES),
            buffer_reduce_factor: if self.buffer_reduce_factor.is_finite() {
                self.buffer_reduce_factor.clamp(0.01, 1.0)
            } else {
                0.1
            },
            max_instances: self.max_instances.min(4096),
            max_chunks_per_axis: self.max_chunks_per_axis.clamp(1, MAX_CHUNKS_PER_AXIS),
            limit_mesh_memory: self.limit_mesh_memory,
            global_blend: if self.global_blend.is_finite() {
                self.global_blend.max(0.0)
            } else {
                1.0
            },
        }
    }

    /// Largest chunk count per axis allowed for `strategy` under these limits.
    pub fn axis_limit(&self, strategy: Strategy) -> u32 {
        let limit = self.max_chunks_per_axis.clamp(1, MAX_CHUNKS_PER_AXIS);
        if strategy == Strategy::Mesh && self.limit_mesh_memory {
            limit.min(2)
        } else {
            limit
        }
    }
}

/// Fine and coarse grid resolution (nodes per chunk edge).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridResolution {
    /// Fine working grid resolution (256 in production)
    pub fine: u32,
    /// Coarse aggregate grid resolution (64 in production)
    pub coarse: u32,
}

impl Default for GridResolution {
    fn default() -> Self {
        Self {
            fine: 256,
            coarse: 64,
        }
    }
}

impl GridResolution {
    pub const fn new(fine: u32, coarse: u32) -> Self {
        Self { fine, coarse }
    }

    /// Validate the fine/coarse relationship.
    pub fn validate(&self) -> EngineResult<()> {
        if self.coarse == 0 || self.fine % self.coarse != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "fine resolution {} is not a multiple of coarse resolution {}",
                self.fine, self.coarse
            )));
        }
        let edge = self.fine / self.coarse;
        if !(2..=8).contains(&edge) {
            return Err(EngineError::InvalidConfig(format!(
                "block edge {} (fine / coarse) must be within 2..=8",
                edge
            )));
        }
        if self.fine > 1024 {
            return Err(EngineError::InvalidConfig(format!(
                "fine resolution {} exceeds 1024",
                self.fine
            )));
        }
        Ok(())
    }

    /// Fine nodes per coarse cell edge.
    #[inline]
    pub fn block_edge(&self) -> u32 {
        self.fine / self.coarse
    }

    /// Fine nodes per coarse cell (`block_edge³`).
    #[inline]
    pub fn block_size(&self) -> u32 {
        let e = self.block_edge();
        e * e * e
    }

    /// Nodes along one axis of the fine lattice (shared boundary included).
    #[inline]
    pub fn fine_nodes_per_axis(&self) -> u32 {
        self.fine + 1
    }

    /// Total nodes in the fine lattice.
    #[inline]
    pub fn fine_node_count(&self) -> usize {
        let n = self.fine_nodes_per_axis() as usize;
        n * n * n
    }

    /// Total coarse cells.
    #[inline]
    pub fn coarse_cell_count(&self) -> usize {
        let c = self.coarse as usize;
        c * c * c
    }
}

/// Maps the user-facing detail value to a chunk edge length.
///
/// Three segments: an extrapolation below 0, a linear segment from
/// `coarse_size` to `mid_size` over `0..=mid_detail`, and a clamped segment
/// from `mid_size` to `fine_size` over `mid_detail..=fine_detail`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailCurve {
    pub coarse_size: f32,
    pub mid_size: f32,
    pub fine_size: f32,
    pub mid_detail: f32,
    pub fine_detail: f32,
}

impl Default for DetailCurve {
    fn default() -> Self {
        Self {
            coarse_size: 40.0,
            mid_size: 4.0,
            fine_size: 1.0,
            mid_detail: 100.0,
            fine_detail: 200.0,
        }
    }
}

impl DetailCurve {
    /// Chunk edge length for `detail`. Never fails and never returns less than 1.
    pub fn chunk_size(&self, detail: i32) -> f32 {
        let d = detail as f32;
        let mid = self.mid_detail.max(1.0);
        let size = if d < 0.0 {
            (self.coarse_size * (1.0 - d / mid)).round()
        } else if d <= mid {
            lerp(self.coarse_size, self.mid_size, d / mid).trunc()
        } else {
            let span = (self.fine_detail - mid).max(1.0);
            let t = ((d - mid) / span).clamp(0.0, 1.0);
            lerp(self.mid_size, self.fine_size, t).trunc()
        };
        size.max(1.0)
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Options for turning a mesh container into a CPU-side mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshOptions {
    /// Normals are averaged across edges with a dihedral angle below this (degrees)
    pub normal_smooth_angle: f32,
    /// 0 = smooth normals, 1 = faceted normals
    pub voxelize: f32,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            normal_smooth_angle: 180.0,
            voxelize: 0.0,
        }
    }
}

/// User-facing options of a single container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Detail value (0..100 nominal, extrapolated outside)
    pub detail: i32,
    /// Chunks along x, y, z (manual bounds)
    pub chunks: [u32; 3],
    /// Active surface extraction strategy
    pub strategy: Strategy,
    /// Interactive containers own their buffers instead of borrowing the shared arena
    pub interactive: bool,
    /// Size the chunk grid from the solids' extents
    pub auto_bounds: bool,
    /// Upper chunk count per axis for auto bounds
    pub auto_bounds_limit: u32,
    /// Extra frames to skip between evaluations
    pub frame_skip: u32,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            detail: DEFAULT_DETAIL,
            chunks: [1, 1, 1],
            strategy: Strategy::PointSplat,
            interactive: false,
            auto_bounds: false,
            auto_bounds_limit: MAX_CHUNKS_PER_AXIS,
            frame_skip: 0,
        }
    }
}

/// Everything a host may want to persist about the engine setup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: EngineLimits,
    pub grid: GridResolution,
    pub detail_curve: DetailCurve,
    /// Options applied to newly created containers
    pub container_defaults: ContainerOptions,
    pub mesh: MeshOptions,
}

impl EngineConfig {
    /// Parse a config from JSON text. Limits are sanitized, the grid is validated.
    pub fn from_json_str(text: &str) -> EngineResult<Self> {
        let mut config: EngineConfig = serde_json::from_str(text)?;
        config.limits = config.limits.sanitized();
        config.grid.validate()?;
        Ok(config)
    }

    /// Load a config file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

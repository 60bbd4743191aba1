//! Surface Extraction
//!
//! Three interchangeable strategies turn an evaluated chunk grid into GPU
//! surface data. Each strategy writes up to three record streams:
//!
//! | strategy     | stream A          | stream B              | stream C              |
//! |--------------|-------------------|-----------------------|-----------------------|
//! | PointSplat   | point records     | -                     | -                     |
//! | SparseVoxel  | point records     | block entries         | coarse cell pointers  |
//! | Mesh         | vertices          | chunk-local indices   | -                     |
//!
//! The CPU versions here are the reference for the WGSL kernels and back the
//! software compute backend.

pub mod marching_cubes;
pub mod mc_tables;
pub mod mesh_post;
pub mod point_splat;
pub mod skin;
pub mod sparse_voxel;

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::{EngineLimits, GridResolution};

pub use marching_cubes::{extract_mesh, vertices_from_words};
pub use mesh_post::{MeshData, materialize};
pub use point_splat::extract_points;
pub use skin::{SkinWeights, project_skin};
pub use sparse_voxel::{SparseVoxelCounts, extract_sparse_voxels};

/// Surface representation of a container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    #[default]
    PointSplat,
    SparseVoxel,
    Mesh,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::PointSplat => "point splat",
            Strategy::SparseVoxel => "sparse voxel",
            Strategy::Mesh => "mesh",
        }
    }

    /// Size of one record of each stream, in 32-bit words.
    pub fn record_words(self) -> [u32; 3] {
        match self {
            Strategy::PointSplat => [2, 0, 0],
            Strategy::SparseVoxel => [2, 1, 1],
            Strategy::Mesh => [8, 1, 0],
        }
    }

    /// Expanded per-chunk capacity of each stream, in records.
    pub fn chunk_capacity(self, limits: &EngineLimits, res: GridResolution, chunk_count: u32) -> [u32; 3] {
        let chunks = chunk_count.max(1);
        match self {
            Strategy::PointSplat => [limits.max_point_count / chunks, 0, 0],
            Strategy::SparseVoxel => {
                let reduce = limits.buffer_reduce_factor as f64;
                let fine = res.fine as f64;
                let points = (fine * fine * fine * reduce).ceil() as u32;
                let blocks = (res.coarse_cell_count() as f64 * reduce).ceil() as u32;
                [points, blocks * res.block_size(), res.coarse_cell_count() as u32]
            }
            Strategy::Mesh => {
                // Whole triangles only
                let verts = limits.max_mesh_vertices / chunks / 3 * 3;
                [verts, verts, 0]
            }
        }
    }

    /// Draw argument words per chunk (indexed draws carry a base vertex).
    pub fn draw_args_words(self) -> u32 {
        match self {
            Strategy::Mesh => 5,
            _ => 4,
        }
    }
}

/// Per-container extraction state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtractState {
    #[default]
    Idle,
    /// Chunks were dispatched; the outcome is not known yet
    Evaluating,
    /// Every dispatched chunk fit its region
    Compacted,
    /// A chunk exceeded its capacity; its draw count is zero
    Overflowed,
}

/// Inputs of the extraction state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractEvent {
    /// Dirty chunks were dispatched for evaluation
    Dispatched,
    /// Evaluation finished; `overflowed` if any chunk did not fit
    Finished { overflowed: bool },
    /// A full recompute was requested
    Recompute,
}

impl ExtractState {
    pub fn on(self, event: ExtractEvent) -> Self {
        match (self, event) {
            (_, ExtractEvent::Recompute) => ExtractState::Idle,
            (ExtractState::Idle, ExtractEvent::Dispatched) => ExtractState::Evaluating,
            // Results are replaced by the next evaluation
            (ExtractState::Compacted | ExtractState::Overflowed, ExtractEvent::Dispatched) => {
                ExtractState::Evaluating
            }
            (ExtractState::Evaluating, ExtractEvent::Dispatched) => ExtractState::Evaluating,
            (ExtractState::Evaluating, ExtractEvent::Finished { overflowed: true }) => {
                ExtractState::Overflowed
            }
            (ExtractState::Evaluating, ExtractEvent::Finished { overflowed: false }) => {
                ExtractState::Compacted
            }
            (state, ExtractEvent::Finished { .. }) => state,
        }
    }
}

/// A surface node in a chunk: packed lattice coordinates and grid attribute.
///
/// Layout (8 bytes):
/// - coords: u32   x | y << 10 | z << 20
/// - attr: u32     RGB565 colour << 16 | solid id
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointRecord {
    pub coords: u32,
    pub attr: u32,
}

const _: () = assert!(std::mem::size_of::<PointRecord>() == 8);

impl PointRecord {
    pub fn new(node: UVec3, attr: u32) -> Self {
        Self {
            coords: (node.x & 0x3FF) | ((node.y & 0x3FF) << 10) | ((node.z & 0x3FF) << 20),
            attr,
        }
    }

    pub fn node(&self) -> UVec3 {
        UVec3::new(
            self.coords & 0x3FF,
            (self.coords >> 10) & 0x3FF,
            (self.coords >> 20) & 0x3FF,
        )
    }
}

/// Marching-cubes output vertex.
///
/// Layout (32 bytes):
/// - position: vec3<f32> + color: u32 (RGBA8)   (16 bytes)
/// - normal: vec3<f32> + solid: u32             (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub color: u32,
    pub normal: [f32; 3],
    pub solid: u32,
}

const _: () = assert!(std::mem::size_of::<MeshVertex>() == 32);

/// Pack a linear colour into RGBA8 (alpha = 255).
pub fn pack_rgba8(color: Vec3) -> u32 {
    let c = (color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
    (c.x as u32) | ((c.y as u32) << 8) | ((c.z as u32) << 16) | (255 << 24)
}

pub fn unpack_rgba8(packed: u32) -> [u8; 4] {
    packed.to_le_bytes()
}

/// Strategy output of one chunk, before it is committed to the container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkStreams {
    pub words: [Vec<u32>; 3],
    /// Record counts per stream
    pub counts: [u32; 3],
}

impl ChunkStreams {
    pub fn clear(&mut self) {
        for w in &mut self.words {
            w.clear();
        }
        self.counts = [0; 3];
    }

    /// True when every stream fits the given per-chunk capacity.
    pub fn fits(&self, capacity: [u32; 3]) -> bool {
        self.counts.iter().zip(capacity).all(|(&n, cap)| n <= cap)
    }
}

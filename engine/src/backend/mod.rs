//! Compute backends
//!
//! The scene drives evaluation through [`ComputeBackend`]. [`WgpuBackend`]
//! (in `gpu`) runs the WGSL kernels; [`CpuBackend`] mirrors the same passes in
//! software and is what the tests run against.
//!
//! [`WgpuBackend`]: crate::gpu::WgpuBackend

pub mod cpu;

pub use cpu::CpuBackend;

use crate::arena::SurfaceLayout;
use crate::chunk::{ChunkGrid, ChunkRecord};
use crate::config::{EngineLimits, GridResolution};
use crate::error::EngineResult;
use crate::instance::InstanceTransform;
use crate::solid::{GpuSolid, SolidBounds};

/// Backend handle of a container's surface buffers.
pub type SurfaceId = u32;

/// Chunk status bit: the chunk's output did not fit its region.
pub const STATUS_OVERFLOW: u32 = 1;
/// Chunk status bit: the chunk's filtered solid list was truncated.
pub const STATUS_DROPPED_SOLIDS: u32 = 2;

/// One evaluation of a container's dirty chunks.
#[derive(Clone, Copy, Debug)]
pub struct EvalRequest<'a> {
    pub grid: ChunkGrid,
    /// Chunks to evaluate, ascending
    pub chunks: &'a [u32],
    pub max_solids_per_voxel: u32,
}

/// Per-chunk status words after an evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfaceStatus {
    pub chunk_status: Vec<u32>,
}

impl SurfaceStatus {
    pub fn from_records(records: &[ChunkRecord]) -> Self {
        Self {
            chunk_status: records.iter().map(|r| r.status).collect(),
        }
    }

    pub fn overflowed(&self) -> bool {
        self.chunk_status.iter().any(|s| s & STATUS_OVERFLOW != 0)
    }

    pub fn dropped_solids(&self) -> bool {
        self.chunk_status.iter().any(|s| s & STATUS_DROPPED_SOLIDS != 0)
    }

    pub fn overflowed_chunks(&self) -> Vec<u32> {
        self.chunk_status
            .iter()
            .enumerate()
            .filter(|(_, s)| *s & STATUS_OVERFLOW != 0)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

/// Host copy of a container's surface buffers (blocking read-back).
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceSnapshot {
    pub layout: SurfaceLayout,
    pub records: Vec<ChunkRecord>,
    /// Stream words as laid out in the container's buffers
    pub streams: [Vec<u32>; 3],
    pub draw_args: Vec<u32>,
}

impl SurfaceSnapshot {
    /// Committed words of one chunk in one stream.
    pub fn chunk_stream(&self, chunk: u32, stream: usize) -> &[u32] {
        let Some(record) = self.records.get(chunk as usize) else {
            return &[];
        };
        let words = self.layout.record_words[stream] as usize;
        let start = record.bases[stream] as usize * words;
        let end = start + record.counts[stream] as usize * words;
        self.streams[stream].get(start..end).unwrap_or(&[])
    }

    /// Total committed records of a stream.
    pub fn total_count(&self, stream: usize) -> u32 {
        self.records.iter().map(|r| r.counts[stream]).sum()
    }

    /// Draw argument words of one chunk.
    pub fn chunk_draw_args(&self, chunk: u32) -> &[u32] {
        let words = self.layout.strategy.draw_args_words() as usize;
        let start = chunk as usize * words;
        self.draw_args.get(start..start + words).unwrap_or(&[])
    }
}

/// Draw argument record of one chunk. Zero counts when the container overflowed.
pub fn draw_args(layout: &SurfaceLayout, record: &ChunkRecord, instance_count: u32, overflowed: bool) -> Vec<u32> {
    use crate::extract::Strategy;
    let instances = instance_count + 1;
    match layout.strategy {
        Strategy::Mesh => {
            let indices = if overflowed { 0 } else { record.counts[1] };
            vec![indices, instances, record.bases[1], record.bases[0], 0]
        }
        Strategy::PointSplat | Strategy::SparseVoxel => {
            let points = if overflowed { 0 } else { record.counts[0] };
            vec![points * 3, instances, record.bases[0] * 3, 0]
        }
    }
}

/// Evaluation and surface storage for containers.
///
/// Evaluation never blocks: results are committed on the device and their
/// status is picked up later through [`ComputeBackend::poll_status`]. Only
/// [`read_chunk_records`](ComputeBackend::read_chunk_records),
/// [`relayout`](ComputeBackend::relayout) and
/// [`read_surface`](ComputeBackend::read_surface) wait for the device.
pub trait ComputeBackend {
    fn name(&self) -> &'static str;

    /// Create the grids, scratch streams and lookup tables shared by all containers.
    fn init_shared(&mut self, res: GridResolution, limits: &EngineLimits) -> EngineResult<()>;

    /// Release everything `init_shared` created, plus the shared arena.
    fn release_shared(&mut self);

    /// Allocate surface buffers for a container.
    fn create_surface(&mut self, layout: &SurfaceLayout, grid: &ChunkGrid) -> EngineResult<SurfaceId>;

    fn destroy_surface(&mut self, surface: SurfaceId);

    /// Replace the container's solids and their influence spheres.
    fn upload_solids(&mut self, surface: SurfaceId, solids: &[GpuSolid], bounds: &[SolidBounds]) -> EngineResult<()>;

    /// Evaluate the requested chunks and reseal the draw arguments.
    fn evaluate(&mut self, surface: SurfaceId, request: &EvalRequest<'_>) -> EngineResult<()>;

    /// Status of the last evaluation if it is available yet.
    fn poll_status(&mut self, surface: SurfaceId) -> EngineResult<Option<SurfaceStatus>>;

    /// Blocking read of the chunk table.
    fn read_chunk_records(&mut self, surface: SurfaceId) -> EngineResult<Vec<ChunkRecord>>;

    /// Blocking move of every committed region to `bases` under `layout`.
    fn relayout(&mut self, surface: SurfaceId, layout: &SurfaceLayout, bases: &[[u32; 3]]) -> EngineResult<()>;

    /// Blocking copy of the whole surface.
    fn read_surface(&mut self, surface: SurfaceId) -> EngineResult<SurfaceSnapshot>;

    /// Rewrite the draw arguments for `instance_count` extra instances.
    fn seal(&mut self, surface: SurfaceId, instance_count: u32) -> EngineResult<()>;

    /// Upload instance transforms and the chunk owner table.
    fn upload_instances(
        &mut self,
        surface: SurfaceId,
        transforms: &[InstanceTransform],
        chunk_owner: &[u32],
    ) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Strategy;
    use glam::Vec3;

    #[test]
    fn test_draw_args_shapes() {
        let layout = SurfaceLayout::empty(Strategy::PointSplat, 1);
        let mut record = ChunkRecord::new(Vec3::ZERO, 1.0, [10, 0, 0]);
        record.counts = [7, 0, 0];
        assert_eq!(draw_args(&layout, &record, 0, false), vec![21, 1, 30, 0]);
        assert_eq!(draw_args(&layout, &record, 2, true), vec![0, 3, 30, 0]);

        let mesh = SurfaceLayout::empty(Strategy::Mesh, 1);
        record.counts = [6, 6, 0];
        record.bases = [12, 12, 0];
        assert_eq!(draw_args(&mesh, &record, 0, false), vec![6, 1, 12, 12, 0]);
    }

    #[test]
    fn test_status_bits() {
        let status = SurfaceStatus {
            chunk_status: vec![0, STATUS_OVERFLOW, STATUS_DROPPED_SOLIDS],
        };
        assert!(status.overflowed());
        assert!(status.dropped_solids());
        assert_eq!(status.overflowed_chunks(), vec![1]);
    }
}

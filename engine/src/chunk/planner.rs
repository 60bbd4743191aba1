//! Chunk Planner
//!
//! Decides a container's chunk grid. In manual mode the user's per-axis chunk
//! counts are clamped to the limits. In auto mode the grid follows the solids'
//! extent with hysteresis: the chunk count only changes when the estimate for it
//! changes, otherwise only the chunk edge grows, so topology does not thrash
//! while a solid is dragged around.

use super::layout::ChunkGrid;
use crate::config::{ContainerOptions, DetailCurve, EngineLimits};
use crate::solid::Solid;

/// Safety margin around the solids, as a fraction of the detail chunk size.
const AUTO_BOUNDS_MARGIN: f32 = 16.0 / 256.0;

/// Auto-bounds memory carried between planner calls.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AutoBoundsState {
    /// Last chunk size required by the solids' extent
    pub required_chunk_size: f32,
    /// Frames to skip between evaluations because of the auto-sized grid
    pub auto_frame_skip: u32,
}

/// Result of an auto-bounds update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanChange {
    /// Grid unchanged
    None,
    /// Chunk count changed; buffers must be reallocated and all solids re-marked
    Resized,
    /// Only the chunk edge changed; all solids re-marked, buffers kept
    Enlarged,
}

/// Computes chunk grids from container options.
#[derive(Clone, Debug, Default)]
pub struct ChunkPlanner {
    pub curve: DetailCurve,
}

impl ChunkPlanner {
    pub fn new(curve: DetailCurve) -> Self {
        Self { curve }
    }

    /// Chunk edge length for the container's detail value.
    pub fn detail_chunk_size(&self, detail: i32) -> f32 {
        self.curve.chunk_size(detail)
    }

    /// Manual grid: user dims clamped per axis (mesh may be capped at 2).
    pub fn plan_chunks(&self, options: &ContainerOptions, limits: &EngineLimits) -> ChunkGrid {
        let axis_limit = limits.axis_limit(options.strategy);
        let dims = options.chunks.map(|d| d.clamp(1, axis_limit));
        ChunkGrid::new(dims, self.detail_chunk_size(options.detail))
    }

    /// Width of the cube needed to contain the first `max_solids` solids.
    pub fn required_extent(&self, solids: &[Solid], detail_size: f32, max_solids: usize) -> f32 {
        let margin = detail_size * AUTO_BOUNDS_MARGIN;
        solids
            .iter()
            .take(max_solids)
            .map(|solid| {
                let radius = solid.bounding_radius();
                let p = solid.position.abs() * 2.0;
                p.max_element() + radius + margin
            })
            .fold(0.0f32, f32::max)
    }

    /// Update an auto-bounds grid in place. Idempotent for a static solid set.
    pub fn compute_auto_bounds(
        &self,
        grid: &mut ChunkGrid,
        state: &mut AutoBoundsState,
        options: &ContainerOptions,
        limits: &EngineLimits,
        solids: &[Solid],
    ) -> PlanChange {
        let detail_size = self.detail_chunk_size(options.detail);
        let max_chunk = limits
            .axis_limit(options.strategy)
            .min(options.auto_bounds_limit.max(1));

        let extent = self.required_extent(solids, detail_size, limits.max_solids as usize);
        let required = (extent / max_chunk as f32).ceil().max(1.0);
        let estimated = ((extent / detail_size).ceil() as u32).clamp(1, max_chunk);
        state.auto_frame_skip = estimated - 1;

        let uniform = grid.dims == [grid.dims[0]; 3];
        if !uniform || estimated != grid.dims[0] {
            state.required_chunk_size = required;
            *grid = ChunkGrid::new([estimated; 3], detail_size.max(required));
            log::debug!(
                "[Planner] auto bounds resized to {}³ chunks of {}",
                estimated,
                grid.chunk_size
            );
            return PlanChange::Resized;
        }

        let effective = detail_size.max(required);
        state.required_chunk_size = required;
        if effective != grid.chunk_size {
            grid.chunk_size = effective;
            log::debug!("[Planner] auto bounds chunk size now {}", effective);
            return PlanChange::Enlarged;
        }
        PlanChange::None
    }
}

//! CPU Compute Backend
//!
//! Software mirror of the GPU pass chain: the
//! same filter → coarse → fine → extract → finalize → commit → seal sequence,
//! run on host memory. Used by the tests and as a fallback when no adapter is
//! available. Slow at production resolution; meant for small grids.

use std::collections::HashMap;

use super::{
    ComputeBackend, EvalRequest, STATUS_DROPPED_SOLIDS, STATUS_OVERFLOW, SurfaceId, SurfaceSnapshot,
    SurfaceStatus, draw_args,
};
use crate::arena::{Placement, SurfaceLayout, plan_moves};
use crate::chunk::{ChunkGrid, ChunkRecord, filter_chunk};
use crate::config::{EngineLimits, GridResolution};
use crate::error::{EngineError, EngineResult};
use crate::extract::{ChunkStreams, Strategy, extract_mesh, extract_points, extract_sparse_voxels};
use crate::grid::GridEvaluator;
use crate::instance::InstanceTransform;
use crate::solid::{GpuSolid, SolidBounds};

type Streams = [Vec<u32>; 3];

struct CpuSurface {
    layout: SurfaceLayout,
    records: Vec<ChunkRecord>,
    /// Own stream storage (empty while the surface lives in the shared arena)
    own: Streams,
    draw_args: Vec<u32>,
    solids: Vec<GpuSolid>,
    bounds: Vec<SolidBounds>,
    instance_count: u32,
    transforms: Vec<InstanceTransform>,
    chunk_owner: Vec<u32>,
    pending_status: Option<SurfaceStatus>,
}

impl CpuSurface {
    fn reseal(&mut self) {
        let overflowed = self.records.iter().any(|r| r.status & STATUS_OVERFLOW != 0);
        self.draw_args = self
            .records
            .iter()
            .flat_map(|r| draw_args(&self.layout, r, self.instance_count, overflowed))
            .collect();
    }
}

struct CpuShared {
    grid: GridEvaluator,
    scratch: ChunkStreams,
    arena: Streams,
    borrower: Option<SurfaceId>,
}

/// Host-memory implementation of [`ComputeBackend`].
#[derive(Default)]
pub struct CpuBackend {
    shared: Option<CpuShared>,
    surfaces: HashMap<SurfaceId, CpuSurface>,
    next_surface: SurfaceId,
}

fn allocate(layout: &SurfaceLayout) -> Streams {
    [0, 1, 2].map(|s| vec![0u32; layout.stream_words(s) as usize])
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.is_some()
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Surface currently stored in the shared arena.
    pub fn shared_borrower(&self) -> Option<SurfaceId> {
        self.shared.as_ref().and_then(|s| s.borrower)
    }

    /// Transforms and chunk owner table last uploaded for a surface.
    pub fn instances(&self, surface: SurfaceId) -> Option<(&[InstanceTransform], &[u32])> {
        self.surfaces
            .get(&surface)
            .map(|s| (s.transforms.as_slice(), s.chunk_owner.as_slice()))
    }

    fn surface(&self, surface: SurfaceId) -> EngineResult<&CpuSurface> {
        self.surfaces
            .get(&surface)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown surface {}", surface)))
    }

    fn surface_mut(&mut self, surface: SurfaceId) -> EngineResult<&mut CpuSurface> {
        self.surfaces
            .get_mut(&surface)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown surface {}", surface)))
    }
}

fn not_initialized() -> EngineError {
    EngineError::InvalidConfig("backend shared resources are not initialized".to_string())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn init_shared(&mut self, res: GridResolution, _limits: &EngineLimits) -> EngineResult<()> {
        res.validate()?;
        self.shared = Some(CpuShared {
            grid: GridEvaluator::new(res),
            scratch: ChunkStreams::default(),
            arena: Default::default(),
            borrower: None,
        });
        Ok(())
    }

    fn release_shared(&mut self) {
        self.shared = None;
    }

    fn create_surface(&mut self, layout: &SurfaceLayout, grid: &ChunkGrid) -> EngineResult<SurfaceId> {
        if layout.placement == Placement::Shared {
            return Err(EngineError::InvalidConfig(
                "surfaces are created in their own buffers".to_string(),
            ));
        }
        let bases = if layout.is_evaluable() {
            layout.expanded_bases()
        } else {
            vec![[0; 3]; grid.count() as usize]
        };
        let records = grid
            .indices()
            .zip(bases)
            .map(|(i, b)| ChunkRecord::new(grid.center(i), grid.chunk_size, b))
            .collect();
        let id = self.next_surface;
        self.next_surface += 1;
        let mut surface = CpuSurface {
            layout: *layout,
            records,
            own: allocate(layout),
            draw_args: Vec::new(),
            solids: Vec::new(),
            bounds: Vec::new(),
            instance_count: 0,
            transforms: Vec::new(),
            chunk_owner: Vec::new(),
            pending_status: None,
        };
        surface.reseal();
        self.surfaces.insert(id, surface);
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
        if let Some(shared) = self.shared.as_mut() {
            if shared.borrower == Some(surface) {
                shared.borrower = None;
            }
        }
    }

    fn upload_solids(&mut self, surface: SurfaceId, solids: &[GpuSolid], bounds: &[SolidBounds]) -> EngineResult<()> {
        let surface = self.surface_mut(surface)?;
        surface.solids = solids.to_vec();
        surface.bounds = bounds.to_vec();
        Ok(())
    }

    fn evaluate(&mut self, id: SurfaceId, request: &EvalRequest<'_>) -> EngineResult<()> {
        let Self { shared, surfaces, .. } = self;
        let shared = shared.as_mut().ok_or_else(not_initialized)?;
        let surface = surfaces
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown surface {}", id)))?;
        if !surface.layout.is_evaluable() {
            return Err(EngineError::InvalidConfig(
                "cannot evaluate into a trimmed surface".to_string(),
            ));
        }
        if request.grid.count() as usize != surface.records.len() {
            return Err(EngineError::InvalidConfig(format!(
                "chunk grid has {} chunks, surface has {}",
                request.grid.count(),
                surface.records.len()
            )));
        }

        let CpuShared {
            grid,
            scratch,
            arena,
            ..
        } = shared;
        let storage = if surface.layout.placement == Placement::Shared {
            arena
        } else {
            &mut surface.own
        };
        let layout = surface.layout;

        for &chunk in request.chunks {
            let Some(record) = surface.records.get_mut(chunk as usize) else {
                continue;
            };
            // filter
            let list = filter_chunk(&request.grid, chunk, &surface.bounds, request.max_solids_per_voxel);
            // coarse + fine
            let (min, _) = request.grid.aabb(chunk);
            grid.evaluate_chunk(&surface.solids, list.ids(), min, request.grid.chunk_size);
            // extract into scratch
            match layout.strategy {
                Strategy::PointSplat => extract_points(grid, scratch),
                Strategy::SparseVoxel => {
                    extract_sparse_voxels(grid, scratch);
                }
                Strategy::Mesh => extract_mesh(grid, scratch),
            }

            record.center = request.grid.center(chunk).to_array().map(f32::to_bits);
            record.size = request.grid.chunk_size.to_bits();
            record.solid_count = list.len() as u32;
            let mut status = if list.dropped() > 0 { STATUS_DROPPED_SOLIDS } else { 0 };

            // finalize + commit
            if scratch.fits(layout.chunk_capacity) {
                for s in 0..3 {
                    let words = layout.record_words[s] as usize;
                    if words == 0 {
                        continue;
                    }
                    let start = record.bases[s] as usize * words;
                    let len = scratch.words[s].len();
                    storage[s][start..start + len].copy_from_slice(&scratch.words[s]);
                }
                record.counts = scratch.counts;
            } else {
                log::debug!(
                    "[CPU] chunk {} overflowed: {:?} > {:?}",
                    chunk,
                    scratch.counts,
                    layout.chunk_capacity
                );
                status |= STATUS_OVERFLOW;
            }
            record.status = status;
        }

        // seal
        surface.reseal();
        surface.pending_status = Some(SurfaceStatus::from_records(&surface.records));
        Ok(())
    }

    fn poll_status(&mut self, surface: SurfaceId) -> EngineResult<Option<SurfaceStatus>> {
        Ok(self.surface_mut(surface)?.pending_status.take())
    }

    fn read_chunk_records(&mut self, surface: SurfaceId) -> EngineResult<Vec<ChunkRecord>> {
        Ok(self.surface(surface)?.records.clone())
    }

    fn relayout(&mut self, id: SurfaceId, layout: &SurfaceLayout, bases: &[[u32; 3]]) -> EngineResult<()> {
        let Self { shared, surfaces, .. } = self;
        let shared = shared.as_mut().ok_or_else(not_initialized)?;
        let surface = surfaces
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown surface {}", id)))?;
        if bases.len() != surface.records.len() {
            return Err(EngineError::InvalidConfig(format!(
                "{} region bases for {} chunks",
                bases.len(),
                surface.records.len()
            )));
        }
        if layout.is_evaluable() {
            for record in &surface.records {
                if (0..3).any(|s| record.counts[s] > layout.chunk_capacity[s]) {
                    return Err(EngineError::InvalidConfig(
                        "committed data does not fit the new region capacity".to_string(),
                    ));
                }
            }
        }
        if layout.placement == Placement::Shared && shared.borrower.is_some_and(|b| b != id) {
            return Err(EngineError::InvalidConfig(
                "shared arena is borrowed by another surface".to_string(),
            ));
        }

        let was_shared = surface.layout.placement == Placement::Shared;
        let old = if was_shared {
            std::mem::take(&mut shared.arena)
        } else {
            std::mem::take(&mut surface.own)
        };
        let mut new = allocate(layout);
        for m in plan_moves(&surface.records, bases, layout.record_words) {
            let words = layout.record_words[m.stream] as usize;
            let from = m.from as usize * words;
            let to = m.to as usize * words;
            let len = m.count as usize * words;
            new[m.stream][to..to + len].copy_from_slice(&old[m.stream][from..from + len]);
        }
        for (record, base) in surface.records.iter_mut().zip(bases) {
            record.bases = *base;
        }

        if was_shared {
            shared.borrower = None;
        }
        if layout.placement == Placement::Shared {
            shared.arena = new;
            shared.borrower = Some(id);
        } else {
            surface.own = new;
        }
        surface.layout = *layout;
        surface.reseal();
        Ok(())
    }

    fn read_surface(&mut self, id: SurfaceId) -> EngineResult<SurfaceSnapshot> {
        let surface = self.surface(id)?;
        let streams = if surface.layout.placement == Placement::Shared {
            self.shared.as_ref().ok_or_else(not_initialized)?.arena.clone()
        } else {
            surface.own.clone()
        };
        Ok(SurfaceSnapshot {
            layout: surface.layout,
            records: surface.records.clone(),
            streams,
            draw_args: surface.draw_args.clone(),
        })
    }

    fn seal(&mut self, surface: SurfaceId, instance_count: u32) -> EngineResult<()> {
        let surface = self.surface_mut(surface)?;
        surface.instance_count = instance_count;
        surface.reseal();
        Ok(())
    }

    fn upload_instances(
        &mut self,
        surface: SurfaceId,
        transforms: &[InstanceTransform],
        chunk_owner: &[u32],
    ) -> EngineResult<()> {
        let surface = self.surface_mut(surface)?;
        surface.transforms = transforms.to_vec();
        surface.chunk_owner = chunk_owner.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PRIM_SPHERE;
    use crate::solid::{Solid, influence_spheres};
    use glam::Vec3;

    fn setup(strategy: Strategy) -> (CpuBackend, SurfaceId, ChunkGrid, SurfaceLayout) {
        let mut backend = CpuBackend::new();
        let res = GridResolution::new(32, 8);
        let limits = EngineLimits::default();
        backend.init_shared(res, &limits).unwrap();
        let grid = ChunkGrid::new([2, 1, 1], 4.0);
        let layout = SurfaceLayout::expanded(strategy, &limits, res, grid.count(), Placement::Expanded);
        let id = backend.create_surface(&layout, &grid).unwrap();
        let solids = vec![Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(1.5))];
        let gpu: Vec<_> = solids.iter().map(|s| s.to_gpu(1.0)).collect();
        backend
            .upload_solids(id, &gpu, &influence_spheres(&solids, 1.0))
            .unwrap();
        (backend, id, grid, layout)
    }

    fn evaluate_all(backend: &mut CpuBackend, id: SurfaceId, grid: ChunkGrid) {
        let chunks: Vec<u32> = grid.indices().collect();
        let request = EvalRequest {
            grid,
            chunks: &chunks,
            max_solids_per_voxel: 128,
        };
        backend.evaluate(id, &request).unwrap();
    }

    #[test]
    fn test_evaluate_commits_and_seals() {
        let (mut backend, id, grid, layout) = setup(Strategy::PointSplat);
        evaluate_all(&mut backend, id, grid);
        let status = backend.poll_status(id).unwrap().unwrap();
        assert!(!status.overflowed());
        assert!(backend.poll_status(id).unwrap().is_none());

        let snap = backend.read_surface(id).unwrap();
        for chunk in 0..2 {
            let rec = snap.records[chunk as usize];
            assert!(rec.counts[0] > 0);
            assert_eq!(rec.solid_count, 1);
            assert_eq!(rec.bases[0], chunk * layout.chunk_capacity[0]);
            assert_eq!(snap.chunk_draw_args(chunk)[0], rec.counts[0] * 3);
            assert_eq!(snap.chunk_stream(chunk, 0).len() as u32, rec.counts[0] * 2);
        }
    }

    #[test]
    fn test_trimmed_surface_refuses_evaluation() {
        let mut backend = CpuBackend::new();
        backend
            .init_shared(GridResolution::new(32, 8), &EngineLimits::default())
            .unwrap();
        let grid = ChunkGrid::default();
        let id = backend
            .create_surface(&SurfaceLayout::empty(Strategy::Mesh, 1), &grid)
            .unwrap();
        let request = EvalRequest {
            grid,
            chunks: &[0],
            max_solids_per_voxel: 8,
        };
        assert!(backend.evaluate(id, &request).is_err());
    }

    #[test]
    fn test_relayout_roundtrip_preserves_data() {
        let (mut backend, id, grid, layout) = setup(Strategy::SparseVoxel);
        evaluate_all(&mut backend, id, grid);
        let before = backend.read_surface(id).unwrap();

        let (trimmed, bases) = layout.trimmed_from(&before.records);
        backend.relayout(id, &trimmed, &bases).unwrap();
        let small = backend.read_surface(id).unwrap();
        assert!(trimmed.total_words() < layout.total_words());

        backend.relayout(id, &layout, &layout.expanded_bases()).unwrap();
        let after = backend.read_surface(id).unwrap();
        assert_eq!(after.streams, before.streams);
        for chunk in 0..2 {
            for s in 0..3 {
                assert_eq!(small.chunk_stream(chunk, s), before.chunk_stream(chunk, s));
            }
        }
    }

    #[test]
    fn test_shared_arena_single_borrower() {
        let (mut backend, id, grid, layout) = setup(Strategy::SparseVoxel);
        let shared = SurfaceLayout {
            placement: Placement::Shared,
            ..layout
        };
        backend.relayout(id, &shared, &shared.expanded_bases()).unwrap();
        assert_eq!(backend.shared_borrower(), Some(id));
        evaluate_all(&mut backend, id, grid);

        let other = backend.create_surface(&SurfaceLayout::empty(Strategy::SparseVoxel, 2), &grid).unwrap();
        let bases = vec![[0; 3]; 2];
        assert!(backend.relayout(other, &shared, &bases).is_err());

        backend.destroy_surface(id);
        assert_eq!(backend.shared_borrower(), None);
    }
}

//! Containers
//!
//! A container owns an ordered solid list, its chunk grid and the handle of its
//! surface buffers on the backend. It turns pending solid edits into an
//! evaluation plan: which chunks to run and what to upload.

use glam::Mat4;

use crate::arena::SurfaceLayout;
use crate::backend::{STATUS_DROPPED_SOLIDS, SurfaceId, SurfaceStatus};
use crate::chunk::{AutoBoundsState, ChunkGrid, ChunkPlanner, PlanChange, dirty_chunks};
use crate::config::{ContainerOptions, EngineLimits};
use crate::extract::{ExtractEvent, ExtractState};
use crate::solid::{DirtySolids, GpuSolid, SolidBounds, SolidRegistry, influence_spheres};

/// Opaque container handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub u32);

/// Work for one evaluation of a container.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalPlan {
    /// Chunks to evaluate, ascending
    pub chunks: Vec<u32>,
    pub solids: Vec<GpuSolid>,
    pub bounds: Vec<SolidBounds>,
    pub change: PlanChange,
}

pub struct Container {
    pub id: ContainerId,
    pub options: ContainerOptions,
    pub registry: SolidRegistry,
    pub grid: ChunkGrid,
    pub auto_state: AutoBoundsState,
    pub surface: SurfaceId,
    pub layout: SurfaceLayout,
    pub state: ExtractState,
    /// Container space -> world
    pub transform: Mat4,
    /// Set between begin_edit and end_edit
    pub editing: bool,
    /// Influence spheres of the last upload, for dirty-chunk detection
    uploaded_bounds: Vec<SolidBounds>,
    force_all: bool,
    warning: Option<String>,
}

impl Container {
    pub fn new(
        id: ContainerId,
        options: ContainerOptions,
        limits: &EngineLimits,
        grid: ChunkGrid,
        surface: SurfaceId,
        layout: SurfaceLayout,
    ) -> Self {
        Self {
            id,
            options,
            registry: SolidRegistry::new(limits.max_solids),
            grid,
            auto_state: AutoBoundsState::default(),
            surface,
            layout,
            state: ExtractState::Idle,
            transform: Mat4::IDENTITY,
            editing: false,
            uploaded_bounds: Vec::new(),
            force_all: true,
            warning: None,
        }
    }

    /// Frames skipped between evaluations.
    pub fn interval(&self) -> u32 {
        self.options.frame_skip + self.auto_state.auto_frame_skip
    }

    /// Evaluate every chunk next time, whatever the dirty set says.
    pub fn force_full_evaluation(&mut self) {
        self.force_all = true;
        self.registry.mark_all_dirty();
    }

    /// Point the container at a freshly allocated surface.
    pub fn replace_surface(&mut self, surface: SurfaceId, layout: SurfaceLayout) {
        self.surface = surface;
        self.layout = layout;
        self.state = self.state.on(ExtractEvent::Recompute);
        self.uploaded_bounds.clear();
        self.force_full_evaluation();
    }

    pub fn has_pending_work(&self) -> bool {
        self.force_all || self.registry.has_pending()
    }

    /// Warning shown to the user: extraction problems first, then registry limits.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref().or(self.registry.warning())
    }

    pub fn set_warning(&mut self, message: String) {
        if self.warning.as_deref() != Some(message.as_str()) {
            log::warn!("[Container {}] {}", self.id.0, message);
        }
        self.warning = Some(message);
    }

    pub fn clear_warning(&mut self) {
        self.warning = None;
    }

    /// Turn pending edits into an evaluation plan. `None` when nothing changed.
    pub fn prepare(&mut self, planner: &ChunkPlanner, limits: &EngineLimits) -> Option<EvalPlan> {
        let dirty = self.registry.take_dirty();
        if dirty.is_none() && !self.force_all {
            return None;
        }

        let solids = self.registry.solids();
        let change = if self.options.auto_bounds {
            planner.compute_auto_bounds(&mut self.grid, &mut self.auto_state, &self.options, limits, &solids)
        } else {
            PlanChange::None
        };

        let bounds = influence_spheres(&solids, limits.global_blend);
        let chunks: Vec<u32> = match dirty {
            DirtySolids::Some(ids) if !self.force_all && change == PlanChange::None => {
                dirty_chunks(&self.grid, &self.uploaded_bounds, &bounds, &ids)
                    .into_iter()
                    .collect()
            }
            _ => self.grid.indices().collect(),
        };

        self.force_all = false;
        self.uploaded_bounds = bounds.clone();
        Some(EvalPlan {
            chunks,
            solids: solids.iter().map(|s| s.to_gpu(limits.global_blend)).collect(),
            bounds,
            change,
        })
    }

    /// Record a finished evaluation.
    pub fn apply_status(&mut self, status: &SurfaceStatus) {
        let overflowed = status.overflowed();
        self.state = self.state.on(ExtractEvent::Finished { overflowed });
        if overflowed {
            self.set_warning(format!(
                "{} capacity exceeded in chunks {:?}; drawing is disabled until the surface fits",
                self.options.strategy.name(),
                status.overflowed_chunks()
            ));
        } else if status.dropped_solids() {
            self.set_warning(format!(
                "more solids overlap a chunk than max solids per voxel allows; extra solids are ignored (status bit {})",
                STATUS_DROPPED_SOLIDS
            ));
        } else {
            self.clear_warning();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::STATUS_OVERFLOW;
    use crate::solid::Solid;
    use glam::Vec3;

    fn container(options: ContainerOptions) -> Container {
        let limits = EngineLimits::default();
        let grid = ChunkPlanner::default().plan_chunks(&options, &limits);
        let layout = SurfaceLayout::empty(options.strategy, grid.count());
        Container::new(ContainerId(1), options, &limits, grid, 0, layout)
    }

    #[test]
    fn test_first_plan_covers_every_chunk() {
        let mut c = container(ContainerOptions {
            chunks: [3, 1, 1],
            ..Default::default()
        });
        let planner = ChunkPlanner::default();
        let limits = EngineLimits::default();
        c.registry.add_solid(Solid::new(1));
        let plan = c.prepare(&planner, &limits).unwrap();
        assert_eq!(plan.chunks, vec![0, 1, 2]);
        assert_eq!(plan.solids.len(), 1);
        assert!(c.prepare(&planner, &limits).is_none());
    }

    #[test]
    fn test_moving_a_solid_dirties_old_and_new_chunks() {
        let mut c = container(ContainerOptions {
            chunks: [3, 1, 1],
            detail: 100,
            ..Default::default()
        });
        let planner = ChunkPlanner::default();
        let limits = EngineLimits::default();
        // Chunks are 4 wide: [-6,-2], [-2,2], [2,6]
        let id = c
            .registry
            .add_solid(Solid::new(1).with_position(Vec3::new(-4.0, 0.0, 0.0)).with_scale(Vec3::splat(0.2)))
            .unwrap();
        c.prepare(&planner, &limits);

        c.registry.update_solid(id, |s| s.position.x = 4.0);
        let plan = c.prepare(&planner, &limits).unwrap();
        assert_eq!(plan.chunks, vec![0, 2]);
    }

    #[test]
    fn test_status_sets_and_clears_warning() {
        let mut c = container(ContainerOptions::default());
        c.state = ExtractState::Evaluating;
        c.apply_status(&SurfaceStatus {
            chunk_status: vec![STATUS_OVERFLOW],
        });
        assert_eq!(c.state, ExtractState::Overflowed);
        assert!(c.warning().unwrap().contains("capacity"));

        c.state = ExtractState::Evaluating;
        c.apply_status(&SurfaceStatus { chunk_status: vec![0] });
        assert_eq!(c.state, ExtractState::Compacted);
        assert!(c.warning().is_none());
    }
}

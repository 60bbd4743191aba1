//! Clay Scene
//!
//! Host binding API. Owns the containers and every piece of cross-container
//! state (arena manager, scheduler, instance broadcaster) and drives a
//! [`ComputeBackend`] with them.
//!
//! Evaluation is asynchronous: [`ClayScene::tick`] dispatches due containers
//! and picks up finished statuses. The blocking calls are [`ClayScene::end_edit`],
//! [`ClayScene::trim_container`], [`ClayScene::wait_idle`],
//! [`ClayScene::materialize_mesh`] and [`ClayScene::surface_snapshot`].

use std::collections::{BTreeMap, HashMap};

use glam::Mat4;

use crate::arena::{ArenaManager, ArenaPlan, SurfaceLayout};
use crate::backend::{ComputeBackend, EvalRequest, SurfaceSnapshot, SurfaceStatus};
use crate::chunk::{ChunkPlanner, PlanChange};
use crate::config::{ContainerOptions, EngineConfig, EngineLimits};
use crate::container::{Container, ContainerId};
use crate::error::{EngineError, EngineResult};
use crate::extract::{
    ExtractEvent, ExtractState, MeshData, Strategy, materialize, project_skin, vertices_from_words,
};
use crate::instance::{AttachOutcome, InstanceBroadcaster};
use crate::scheduler::Scheduler;
use crate::solid::{Catalogue, Solid, SolidId};

pub struct ClayScene<B: ComputeBackend> {
    backend: B,
    config: EngineConfig,
    planner: ChunkPlanner,
    arena: ArenaManager,
    scheduler: Scheduler,
    instances: InstanceBroadcaster,
    containers: BTreeMap<ContainerId, Container>,
    next_id: u32,
    catalogue: Catalogue,
    global_warning: Option<String>,
}

impl<B: ComputeBackend> ClayScene<B> {
    /// Create a scene. Limits are sanitized, the grid resolution validated.
    pub fn new(backend: B, mut config: EngineConfig) -> EngineResult<Self> {
        config.grid.validate()?;
        config.limits = config.limits.sanitized();
        let catalogue = Catalogue::builtin();
        let mut scene = Self {
            backend,
            planner: ChunkPlanner::new(config.detail_curve.clone()),
            arena: ArenaManager::new(config.limits.clone(), config.grid),
            scheduler: Scheduler::new(),
            instances: InstanceBroadcaster::new(config.limits.max_instances),
            containers: BTreeMap::new(),
            next_id: 1,
            catalogue,
            global_warning: None,
            config,
        };
        if scene.catalogue.is_empty() {
            scene.set_global_warning("primitive catalogue is empty".to_string());
        }
        log::info!(
            "[Scene] created on the {} backend ({} primitive types)",
            scene.backend.name(),
            scene.catalogue.len()
        );
        Ok(scene)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.config.limits
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn arena(&self) -> &ArenaManager {
        &self.arena
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(&id)
    }

    pub fn container_ids(&self) -> impl Iterator<Item = ContainerId> + '_ {
        self.containers.keys().copied()
    }

    fn container_mut(&mut self, id: ContainerId) -> EngineResult<&mut Container> {
        self.containers
            .get_mut(&id)
            .ok_or(EngineError::UnknownContainer(id))
    }

    /// Run `f` on a container taken out of the map, so it can use the rest of the scene.
    fn with_container<T>(
        &mut self,
        id: ContainerId,
        f: impl FnOnce(&mut Self, &mut Container) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut container = self
            .containers
            .remove(&id)
            .ok_or(EngineError::UnknownContainer(id))?;
        let result = f(self, &mut container);
        self.containers.insert(id, container);
        result
    }

    // ------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------

    /// Create a container with the scene's default options.
    pub fn create_default_container(&mut self) -> EngineResult<ContainerId> {
        self.create_container(self.config.container_defaults.clone())
    }

    pub fn create_container(&mut self, options: ContainerOptions) -> EngineResult<ContainerId> {
        self.arena.acquire(&mut self.backend)?;
        let grid = self.planner.plan_chunks(&options, &self.config.limits);
        let layout = SurfaceLayout::empty(options.strategy, grid.count());
        let surface = match self.backend.create_surface(&layout, &grid) {
            Ok(surface) => surface,
            Err(err) => {
                self.arena.release(&mut self.backend, ContainerId(0));
                return Err(err);
            }
        };

        let id = ContainerId(self.next_id);
        self.next_id += 1;
        let container = Container::new(id, options, &self.config.limits, grid, surface, layout);
        self.scheduler.register(id, container.interval());
        log::info!(
            "[Scene] container {} created: {} strategy, {:?} chunks of {}",
            id.0,
            container.options.strategy.name(),
            grid.dims,
            grid.chunk_size
        );
        self.containers.insert(id, container);
        Ok(id)
    }

    /// Destroy a container. The last one releases the shared resources.
    pub fn destroy_container(&mut self, id: ContainerId) -> EngineResult<()> {
        let container = self
            .containers
            .remove(&id)
            .ok_or(EngineError::UnknownContainer(id))?;
        self.instances.remove_container(id);
        self.scheduler.unregister(id);
        self.backend.destroy_surface(container.surface);
        self.arena.release(&mut self.backend, id);
        self.sync_instances()?;
        log::info!("[Scene] container {} destroyed", id.0);
        Ok(())
    }

    /// Change a container's options. A new strategy or chunk count reallocates
    /// the surface; any grid change re-evaluates every chunk.
    pub fn set_options(&mut self, id: ContainerId, options: ContainerOptions) -> EngineResult<()> {
        let grid = self.planner.plan_chunks(&options, &self.config.limits);
        self.with_container(id, |scene, c| {
            let old = std::mem::replace(&mut c.options, options);
            let regrid = !c.options.auto_bounds && grid != c.grid;
            let auto_toggled = old.auto_bounds != c.options.auto_bounds;
            if regrid || auto_toggled {
                c.grid = grid;
                c.auto_state = Default::default();
            }
            if old.strategy != c.options.strategy || c.layout.chunk_count != c.grid.count() {
                scene.reallocate(c)?;
            } else if regrid || auto_toggled || old.detail != c.options.detail {
                c.force_full_evaluation();
            }
            scene.scheduler.set_interval(id, c.interval());
            scene.scheduler.wake(id);
            Ok(())
        })
    }

    /// Apply new global limits. Every surface is reallocated for the new capacities.
    pub fn set_limits(&mut self, limits: EngineLimits) -> EngineResult<()> {
        let limits = limits.sanitized();
        if limits == self.config.limits {
            return Ok(());
        }
        log::info!("[Scene] global limits changed");
        self.config.limits = limits.clone();
        self.arena.set_limits(limits.clone());
        self.instances.set_max_instances(limits.max_instances);
        self.global_warning = None;
        let ids: Vec<ContainerId> = self.containers.keys().copied().collect();
        for id in ids {
            self.with_container(id, |scene, c| {
                c.registry.set_max_solids(limits.max_solids);
                c.grid = scene.planner.plan_chunks(&c.options, &limits);
                c.auto_state = Default::default();
                scene.reallocate(c)
            })?;
        }
        Ok(())
    }

    /// Container-space to world transform.
    pub fn set_transform(&mut self, id: ContainerId, transform: Mat4) -> EngineResult<()> {
        self.container_mut(id)?.transform = transform;
        self.instances.mark_dirty(id);
        Ok(())
    }

    /// Give a container fresh empty buffers for its current strategy and grid.
    fn reallocate(&mut self, c: &mut Container) -> EngineResult<()> {
        self.backend.destroy_surface(c.surface);
        self.arena.forget(c.id);
        let layout = SurfaceLayout::empty(c.options.strategy, c.grid.count());
        let surface = self.backend.create_surface(&layout, &c.grid)?;
        c.replace_surface(surface, layout);
        if !self.instances.instances_of(c.id).is_empty() {
            self.instances.mark_dirty(c.id);
        }
        log::debug!(
            "[Scene] container {} reallocated: {} strategy, {} chunks",
            c.id.0,
            c.options.strategy.name(),
            c.grid.count()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Solids
    // ------------------------------------------------------------------

    /// Append a solid. `None` when the container is at the solid limit.
    pub fn add_solid(&mut self, id: ContainerId, solid: Solid) -> EngineResult<Option<SolidId>> {
        let container = self.container_mut(id)?;
        let added = container.registry.add_solid(solid);
        let warning = match added {
            Some(_) => None,
            None => container.registry.warning().map(str::to_string),
        };
        if let Some(message) = warning {
            self.set_global_warning(message);
        }
        self.scheduler.wake(id);
        Ok(added)
    }

    pub fn remove_solid(&mut self, id: ContainerId, solid: SolidId) -> EngineResult<()> {
        if !self.container_mut(id)?.registry.remove_solid(solid) {
            return Err(EngineError::UnknownSolid { container: id, solid });
        }
        self.scheduler.wake(id);
        Ok(())
    }

    /// Mutate a solid in place; its chunks are re-evaluated on the next due tick.
    pub fn update_solid(&mut self, id: ContainerId, solid: SolidId, update: impl FnOnce(&mut Solid)) -> EngineResult<()> {
        if !self.container_mut(id)?.registry.update_solid(solid, update) {
            return Err(EngineError::UnknownSolid { container: id, solid });
        }
        self.scheduler.wake(id);
        Ok(())
    }

    /// Solids in id order. Ids are contiguous after the next evaluation.
    pub fn solids(&self, id: ContainerId) -> EngineResult<Vec<(SolidId, Solid)>> {
        let container = self.containers.get(&id).ok_or(EngineError::UnknownContainer(id))?;
        Ok(container.registry.iter().map(|(sid, s)| (sid, *s)).collect())
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Force a full re-evaluation of a container on the next tick.
    pub fn recompute(&mut self, id: ContainerId) -> EngineResult<()> {
        let container = self.container_mut(id)?;
        container.force_full_evaluation();
        container.state = container.state.on(ExtractEvent::Recompute);
        self.scheduler.wake(id);
        Ok(())
    }

    /// Advance one frame: collect finished statuses, evaluate due containers and
    /// upload changed instance transforms. Returns the containers evaluated.
    pub fn tick(&mut self) -> EngineResult<Vec<ContainerId>> {
        self.collect_status()?;
        let mut evaluated = Vec::new();
        for id in self.scheduler.tick() {
            if self.evaluate_container(id)? {
                evaluated.push(id);
            }
        }
        self.sync_instances()?;
        self.collect_status()?;
        Ok(evaluated)
    }

    /// Evaluate a container now if it has pending work.
    pub fn evaluate_container(&mut self, id: ContainerId) -> EngineResult<bool> {
        if self.instances.is_instance(id) {
            return Ok(false);
        }
        self.with_container(id, |scene, c| scene.evaluate(c))
    }

    fn evaluate(&mut self, c: &mut Container) -> EngineResult<bool> {
        let limits = self.config.limits.clone();
        let Some(mut plan) = c.prepare(&self.planner, &limits) else {
            return Ok(false);
        };
        if plan.change == PlanChange::Resized {
            self.reallocate(c)?;
            // Settle the forced pass the new surface requested
            if let Some(full) = c.prepare(&self.planner, &limits) {
                plan = full;
            }
        }
        self.make_evaluable(c)?;

        self.backend.upload_solids(c.surface, &plan.solids, &plan.bounds)?;
        let request = EvalRequest {
            grid: c.grid,
            chunks: &plan.chunks,
            max_solids_per_voxel: limits.max_solids_per_voxel,
        };
        self.backend.evaluate(c.surface, &request)?;
        c.state = c.state.on(ExtractEvent::Dispatched);
        self.scheduler.set_interval(c.id, c.interval());
        log::debug!(
            "[Scene] container {} dispatched {} of {} chunks ({} solids)",
            c.id.0,
            plan.chunks.len(),
            c.grid.count(),
            plan.solids.len()
        );
        Ok(true)
    }

    /// Bring a container's buffers into a placement that can be evaluated into.
    fn make_evaluable(&mut self, c: &mut Container) -> EngineResult<()> {
        match self.arena.plan_evaluation(c) {
            ArenaPlan::Ready => Ok(()),
            ArenaPlan::Expand { displace } => {
                self.trim_displaced(displace)?;
                self.arena.expand(&mut self.backend, c)
            }
            ArenaPlan::Borrow { displace } => {
                self.trim_displaced(displace)?;
                self.arena.switch_shared_arena(&mut self.backend, c)
            }
        }
    }

    fn trim_displaced(&mut self, displace: Option<ContainerId>) -> EngineResult<()> {
        let Some(other) = displace else {
            return Ok(());
        };
        match self.containers.get_mut(&other) {
            Some(container) => self.arena.trim(&mut self.backend, container),
            None => {
                self.arena.forget(other);
                Ok(())
            }
        }
    }

    /// Pick up statuses of finished evaluations without waiting.
    fn collect_status(&mut self) -> EngineResult<()> {
        for container in self.containers.values_mut() {
            if container.state != ExtractState::Evaluating {
                continue;
            }
            if let Some(status) = self.backend.poll_status(container.surface)? {
                container.apply_status(&status);
            }
        }
        Ok(())
    }

    /// Wait for every outstanding evaluation and apply its status.
    pub fn wait_idle(&mut self) -> EngineResult<()> {
        for container in self.containers.values_mut() {
            if container.state != ExtractState::Evaluating {
                continue;
            }
            let records = self.backend.read_chunk_records(container.surface)?;
            // Drop the now redundant asynchronous copy
            self.backend.poll_status(container.surface)?;
            container.apply_status(&SurfaceStatus::from_records(&records));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memory arena
    // ------------------------------------------------------------------

    /// Give a container its own full-capacity buffers for editing.
    pub fn begin_edit(&mut self, id: ContainerId) -> EngineResult<()> {
        self.with_container(id, |scene, c| {
            c.editing = true;
            scene.expand(c)
        })?;
        self.scheduler.wake(id);
        Ok(())
    }

    /// Finish editing: flush pending edits, then trim to the exact size (blocking).
    pub fn end_edit(&mut self, id: ContainerId) -> EngineResult<()> {
        self.with_container(id, |scene, c| {
            c.editing = false;
            if c.has_pending_work() {
                scene.evaluate(c)?;
            }
            Ok(())
        })?;
        self.wait_idle()?;
        self.trim_container(id)
    }

    /// Shrink a container to its committed size (blocking).
    pub fn trim_container(&mut self, id: ContainerId) -> EngineResult<()> {
        self.with_container(id, |scene, c| scene.arena.trim(&mut scene.backend, c))
    }

    /// Give a container its own full-capacity buffers.
    pub fn expand_container(&mut self, id: ContainerId) -> EngineResult<()> {
        self.with_container(id, |scene, c| scene.expand(c))
    }

    fn expand(&mut self, c: &mut Container) -> EngineResult<()> {
        match self.arena.plan_edit(c) {
            ArenaPlan::Ready => Ok(()),
            ArenaPlan::Expand { displace } | ArenaPlan::Borrow { displace } => {
                self.trim_displaced(displace)?;
                self.arena.expand(&mut self.backend, c)
            }
        }
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Draw `source`'s surface at `instance`'s transform as well.
    pub fn attach_instance(&mut self, source: ContainerId, instance: ContainerId) -> EngineResult<AttachOutcome> {
        for id in [source, instance] {
            if !self.containers.contains_key(&id) {
                return Err(EngineError::UnknownContainer(id));
            }
        }
        let outcome = self.instances.attach_instance(source, instance)?;
        if outcome == AttachOutcome::AtCapacity {
            self.set_global_warning(format!(
                "container {} reached max instances ({})",
                source.0, self.config.limits.max_instances
            ));
        }
        self.sync_instances()?;
        Ok(outcome)
    }

    /// Stop drawing `instance` as a copy of its source. Returns the former source.
    pub fn detach_instance(&mut self, instance: ContainerId) -> EngineResult<Option<ContainerId>> {
        if !self.containers.contains_key(&instance) {
            return Err(EngineError::UnknownContainer(instance));
        }
        let source = self.instances.detach_instance(instance);
        if source.is_some() {
            // Its own surface is drawn again
            if let Some(container) = self.containers.get_mut(&instance) {
                container.force_full_evaluation();
            }
            self.scheduler.wake(instance);
        }
        self.sync_instances()?;
        Ok(source)
    }

    pub fn instance_broadcaster(&self) -> &InstanceBroadcaster {
        &self.instances
    }

    /// Upload transforms and owner tables of every source that changed, and
    /// reseal its draw arguments with the new instance count.
    fn sync_instances(&mut self) -> EngineResult<()> {
        for source in self.instances.take_dirty() {
            let Some(container) = self.containers.get(&source) else {
                continue;
            };
            let transforms = self.instances.transforms(source, |id| {
                self.containers.get(&id).map_or(Mat4::IDENTITY, |c| c.transform)
            });
            let owners = self.instances.chunk_owner_table(source, container.grid.count());
            self.backend.upload_instances(container.surface, &transforms, &owners)?;
            self.backend
                .seal(container.surface, self.instances.instances_of(source).len() as u32)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-back
    // ------------------------------------------------------------------

    /// Blocking copy of a container's surface buffers.
    pub fn surface_snapshot(&mut self, id: ContainerId) -> EngineResult<SurfaceSnapshot> {
        let surface = self
            .containers
            .get(&id)
            .ok_or(EngineError::UnknownContainer(id))?
            .surface;
        self.backend.read_surface(surface)
    }

    /// Indexed host mesh of a mesh container (blocking).
    pub fn materialize_mesh(&mut self, id: ContainerId) -> EngineResult<MeshData> {
        let strategy = self
            .containers
            .get(&id)
            .ok_or(EngineError::UnknownContainer(id))?
            .options
            .strategy;
        if strategy != Strategy::Mesh {
            return Err(EngineError::StrategyMismatch {
                expected: Strategy::Mesh.name(),
                actual: strategy.name(),
            });
        }
        self.wait_idle()?;
        let snapshot = self.surface_snapshot(id)?;

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for chunk in 0..snapshot.records.len() as u32 {
            let offset = vertices.len() as u32;
            vertices.extend(vertices_from_words(snapshot.chunk_stream(chunk, 0)));
            indices.extend(snapshot.chunk_stream(chunk, 1).iter().map(|i| i + offset));
        }
        let mesh = materialize(&vertices, &indices, &self.config.mesh);
        log::info!(
            "[Scene] container {} materialized: {} vertices, {} triangles",
            id.0,
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(mesh)
    }

    /// [`ClayScene::materialize_mesh`] plus bone weights from the solids' owning objects.
    pub fn materialize_skinned_mesh(
        &mut self,
        id: ContainerId,
        bone_of_object: &HashMap<u32, u32>,
        falloff: f32,
    ) -> EngineResult<MeshData> {
        let mut mesh = self.materialize_mesh(id)?;
        let solids = self
            .containers
            .get(&id)
            .ok_or(EngineError::UnknownContainer(id))?
            .registry
            .solids();
        project_skin(&mut mesh, &solids, bone_of_object, falloff);
        Ok(mesh)
    }

    // ------------------------------------------------------------------
    // Warnings
    // ------------------------------------------------------------------

    pub fn container_warning(&self, id: ContainerId) -> Option<&str> {
        self.containers.get(&id).and_then(|c| c.warning())
    }

    pub fn global_warning(&self) -> Option<&str> {
        self.global_warning.as_deref()
    }

    pub fn clear_global_warning(&mut self) {
        self.global_warning = None;
    }

    fn set_global_warning(&mut self, message: String) {
        if self.global_warning.as_deref() != Some(message.as_str()) {
            log::warn!("[Scene] {}", message);
        }
        self.global_warning = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Placement;
    use crate::backend::CpuBackend;
    use crate::config::GridResolution;
    use crate::field::PRIM_SPHERE;
    use glam::Vec3;

    fn scene() -> ClayScene<CpuBackend> {
        let config = EngineConfig {
            grid: GridResolution::new(32, 8),
            ..Default::default()
        };
        ClayScene::new(CpuBackend::new(), config).unwrap()
    }

    fn sphere() -> Solid {
        Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(2.0))
    }

    #[test]
    fn test_shared_resources_follow_container_lifetime() {
        let mut s = scene();
        assert!(!s.backend().is_initialized());
        let a = s.create_default_container().unwrap();
        let b = s.create_default_container().unwrap();
        assert!(s.backend().is_initialized());
        s.destroy_container(a).unwrap();
        assert!(s.backend().is_initialized());
        s.destroy_container(b).unwrap();
        assert!(!s.backend().is_initialized());
        assert!(matches!(s.destroy_container(b), Err(EngineError::UnknownContainer(_))));
    }

    #[test]
    fn test_tick_evaluates_only_with_pending_work() {
        let mut s = scene();
        let c = s.create_default_container().unwrap();
        s.add_solid(c, sphere()).unwrap();
        assert_eq!(s.tick().unwrap(), vec![c]);
        assert_eq!(s.container(c).unwrap().state, ExtractState::Compacted);
        assert!(s.tick().unwrap().is_empty());

        s.update_solid(c, 0, |solid| solid.position.x = 0.5).unwrap();
        assert_eq!(s.tick().unwrap(), vec![c]);
    }

    #[test]
    fn test_update_solid_skips_frame_skip_wait() {
        let mut s = scene();
        let c = s
            .create_container(ContainerOptions {
                frame_skip: 3,
                ..Default::default()
            })
            .unwrap();
        s.add_solid(c, sphere()).unwrap();
        assert_eq!(s.tick().unwrap(), vec![c]);

        s.update_solid(c, 0, |solid| solid.position.y = 0.5).unwrap();
        assert_eq!(s.tick().unwrap(), vec![c]);
    }

    #[test]
    fn test_unknown_solid_is_an_error() {
        let mut s = scene();
        let c = s.create_default_container().unwrap();
        assert!(matches!(
            s.update_solid(c, 3, |_| {}),
            Err(EngineError::UnknownSolid { solid: 3, .. })
        ));
    }

    #[test]
    fn test_materialize_requires_mesh_strategy() {
        let mut s = scene();
        let c = s.create_default_container().unwrap();
        assert!(matches!(
            s.materialize_mesh(c),
            Err(EngineError::StrategyMismatch { .. })
        ));
    }

    #[test]
    fn test_edit_cycle_expands_then_trims() {
        let mut s = scene();
        let c = s.create_default_container().unwrap();
        s.add_solid(c, sphere()).unwrap();
        s.begin_edit(c).unwrap();
        assert_eq!(s.container(c).unwrap().layout.placement, Placement::Expanded);
        s.tick().unwrap();
        s.end_edit(c).unwrap();
        let layout = s.container(c).unwrap().layout;
        assert_eq!(layout.placement, Placement::Trimmed);
        let snap = s.surface_snapshot(c).unwrap();
        assert_eq!(layout.stream_len[0], snap.total_count(0));
        assert!(snap.total_count(0) > 0);
    }
}

//! wgpu Compute Backend
//!
//! Runs the clay kernels on a wgpu device. Evaluation records one compute pass
//! per dirty chunk plus the seal pass, submits them and maps a copy of the chunk
//! table in the background; `poll_status` picks it up once the device is done.

use std::collections::HashMap;

use super::buffers::{ChunkParams, SharedResources, SurfaceBuffers};
use super::context::{GpuContext, GpuContextConfig, create_storage_buffer, create_storage_buffer_init};
use super::dispatch::{dispatch_chunk, dispatch_seal};
use super::pipelines::ClayPipelines;
use super::readback::{StatusReadback, read_buffers, wait_idle};
use crate::arena::{Placement, SurfaceLayout, plan_moves};
use crate::backend::{ComputeBackend, EvalRequest, SurfaceId, SurfaceSnapshot, SurfaceStatus};
use crate::chunk::{ChunkGrid, ChunkRecord};
use crate::config::{EngineLimits, GridResolution};
use crate::error::{EngineError, EngineResult};
use crate::instance::InstanceTransform;
use crate::solid::{GpuSolid, SolidBounds};

struct GpuSurface {
    buffers: SurfaceBuffers,
    pending: Option<StatusReadback>,
}

/// GPU implementation of [`ComputeBackend`].
pub struct WgpuBackend {
    context: GpuContext,
    pipelines: ClayPipelines,
    shared: Option<SharedResources>,
    borrower: Option<SurfaceId>,
    surfaces: HashMap<SurfaceId, GpuSurface>,
    next_surface: SurfaceId,
}

fn not_initialized() -> EngineError {
    EngineError::InvalidConfig("backend shared resources are not initialized".to_string())
}

fn unknown_surface(id: SurfaceId) -> EngineError {
    EngineError::InvalidConfig(format!("unknown surface {}", id))
}

impl WgpuBackend {
    /// Build the pipelines on an existing context.
    pub fn new(context: GpuContext) -> Self {
        let pipelines = ClayPipelines::new(&context.device);
        Self {
            context,
            pipelines,
            shared: None,
            borrower: None,
            surfaces: HashMap::new(),
            next_surface: 0,
        }
    }

    /// Create a headless context and the pipelines.
    pub fn request(config: GpuContextConfig) -> EngineResult<Self> {
        Ok(Self::new(GpuContext::new(config)?))
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Output buffers of a surface, for binding in a renderer on the same device.
    pub fn surface_buffers(&self, surface: SurfaceId) -> Option<&SurfaceBuffers> {
        self.surfaces.get(&surface).map(|s| &s.buffers)
    }

    fn surface_mut(&mut self, id: SurfaceId) -> EngineResult<&mut GpuSurface> {
        self.surfaces.get_mut(&id).ok_or_else(|| unknown_surface(id))
    }

    fn submit_seal(&mut self, id: SurfaceId) -> EngineResult<()> {
        let surface = self.surfaces.get(&id).ok_or_else(|| unknown_surface(id))?;
        let device = &self.context.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clay_seal_encoder"),
        });
        dispatch_seal(&mut encoder, device, &self.pipelines, &surface.buffers);
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn init_shared(&mut self, res: GridResolution, limits: &EngineLimits) -> EngineResult<()> {
        res.validate()?;
        let fine_bytes = res.fine_node_count() as u64 * 8;
        if fine_bytes > self.context.max_storage_binding() {
            return Err(EngineError::GpuUnavailable(format!(
                "fine grid needs {} bytes, device binds at most {}",
                fine_bytes,
                self.context.max_storage_binding()
            )));
        }
        self.shared = Some(SharedResources::new(&self.context.device, res, limits.max_solids_per_voxel));
        self.borrower = None;
        Ok(())
    }

    fn release_shared(&mut self) {
        self.shared = None;
        self.borrower = None;
    }

    fn create_surface(&mut self, layout: &SurfaceLayout, grid: &ChunkGrid) -> EngineResult<SurfaceId> {
        if layout.placement == Placement::Shared {
            return Err(EngineError::InvalidConfig(
                "surfaces are created in their own buffers".to_string(),
            ));
        }
        let id = self.next_surface;
        self.next_surface += 1;
        let buffers = SurfaceBuffers::new(&self.context.device, &self.context.queue, layout, grid);
        self.surfaces.insert(id, GpuSurface { buffers, pending: None });
        self.submit_seal(id)?;
        log::debug!(
            "[WgpuBackend] surface {} created: {} chunks, {:?}",
            id,
            grid.count(),
            layout.placement
        );
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
        if self.borrower == Some(surface) {
            self.borrower = None;
        }
    }

    fn upload_solids(&mut self, id: SurfaceId, solids: &[GpuSolid], bounds: &[SolidBounds]) -> EngineResult<()> {
        let Self { context, surfaces, .. } = self;
        let surface = surfaces.get_mut(&id).ok_or_else(|| unknown_surface(id))?;
        surface.buffers.write_solids(&context.device, &context.queue, solids, bounds);
        Ok(())
    }

    fn evaluate(&mut self, id: SurfaceId, request: &EvalRequest<'_>) -> EngineResult<()> {
        let Self {
            context,
            pipelines,
            shared,
            surfaces,
            ..
        } = self;
        let shared = shared.as_mut().ok_or_else(not_initialized)?;
        let surface = surfaces.get_mut(&id).ok_or_else(|| unknown_surface(id))?;
        let layout = surface.buffers.layout;
        if !layout.is_evaluable() {
            return Err(EngineError::InvalidConfig(
                "cannot evaluate into a trimmed surface".to_string(),
            ));
        }
        if request.grid.count() != surface.buffers.chunk_count {
            return Err(EngineError::InvalidConfig(format!(
                "chunk grid has {} chunks, surface has {}",
                request.grid.count(),
                surface.buffers.chunk_count
            )));
        }

        let device = &context.device;
        shared.ensure_scratch(device, layout.chunk_capacity, layout.record_words);
        shared.ensure_filtered(device, request.max_solids_per_voxel);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clay_evaluate_encoder"),
        });
        for &chunk in request.chunks {
            if chunk >= surface.buffers.chunk_count {
                continue;
            }
            let params = ChunkParams::new(
                &request.grid,
                chunk,
                shared.res,
                &layout,
                surface.buffers.solid_count,
                request.max_solids_per_voxel,
            );
            dispatch_chunk(&mut encoder, device, pipelines, shared, &surface.buffers, &params);
        }
        dispatch_seal(&mut encoder, device, pipelines, &surface.buffers);

        let status = StatusReadback::record(
            device,
            &mut encoder,
            &surface.buffers.records,
            surface.buffers.records_size(),
        );
        context.queue.submit(Some(encoder.finish()));
        status.map();
        surface.pending = Some(status);
        Ok(())
    }

    fn poll_status(&mut self, id: SurfaceId) -> EngineResult<Option<SurfaceStatus>> {
        let device = &self.context.device;
        let surface = self.surfaces.get_mut(&id).ok_or_else(|| unknown_surface(id))?;
        let Some(pending) = surface.pending.as_ref() else {
            return Ok(None);
        };
        match pending.try_take(device)? {
            Some(records) => {
                surface.pending = None;
                Ok(Some(SurfaceStatus::from_records(&records)))
            }
            None => Ok(None),
        }
    }

    fn read_chunk_records(&mut self, id: SurfaceId) -> EngineResult<Vec<ChunkRecord>> {
        let surface = self.surfaces.get(&id).ok_or_else(|| unknown_surface(id))?;
        let words = read_buffers(
            &self.context.device,
            &self.context.queue,
            &[(&surface.buffers.records, surface.buffers.records_size())],
        )?;
        Ok(words
            .first()
            .map(|w| bytemuck::pod_collect_to_vec::<u32, ChunkRecord>(w))
            .unwrap_or_default())
    }

    fn relayout(&mut self, id: SurfaceId, layout: &SurfaceLayout, bases: &[[u32; 3]]) -> EngineResult<()> {
        let mut records = self.read_chunk_records(id)?;
        let Self {
            context,
            pipelines,
            shared,
            borrower,
            surfaces,
            ..
        } = self;
        let shared = shared.as_mut().ok_or_else(not_initialized)?;
        let surface = surfaces.get_mut(&id).ok_or_else(|| unknown_surface(id))?;
        if bases.len() != records.len() {
            return Err(EngineError::InvalidConfig(format!(
                "{} region bases for {} chunks",
                bases.len(),
                records.len()
            )));
        }
        if layout.is_evaluable() {
            for record in &records {
                if (0..3).any(|s| record.counts[s] > layout.chunk_capacity[s]) {
                    return Err(EngineError::InvalidConfig(
                        "committed data does not fit the new region capacity".to_string(),
                    ));
                }
            }
        }
        let to_shared = layout.placement == Placement::Shared;
        if to_shared && borrower.is_some_and(|b| b != id) {
            return Err(EngineError::InvalidConfig(
                "shared arena is borrowed by another surface".to_string(),
            ));
        }

        let device = &context.device;
        let was_shared = surface.buffers.layout.placement == Placement::Shared;
        let source = surface.buffers.streams.clone();
        let target: [wgpu::Buffer; 3] = [0, 1, 2].map(|s| {
            let bytes = layout.stream_words(s) * 4;
            // The arena can be reused as long as it is not also the source
            if to_shared && !was_shared && shared.arena[s].size() >= bytes {
                shared.arena[s].clone()
            } else {
                create_storage_buffer(
                    device,
                    &format!("clay_stream_{}", s),
                    bytes,
                    wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX,
                )
            }
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clay_relayout_encoder"),
        });
        let moves = plan_moves(&records, bases, layout.record_words);
        for m in &moves {
            let words = u64::from(layout.record_words[m.stream]);
            encoder.copy_buffer_to_buffer(
                &source[m.stream],
                u64::from(m.from) * words * 4,
                &target[m.stream],
                u64::from(m.to) * words * 4,
                u64::from(m.count) * words * 4,
            );
        }
        for (record, base) in records.iter_mut().zip(bases) {
            record.bases = *base;
        }
        context
            .queue
            .write_buffer(&surface.buffers.records, 0, bytemuck::cast_slice(&records));

        if was_shared {
            *borrower = None;
        }
        if to_shared {
            shared.arena = target.clone();
            *borrower = Some(id);
        }
        surface.buffers.streams = target;
        surface.buffers.layout = *layout;
        surface.pending = None;

        dispatch_seal(&mut encoder, device, pipelines, &surface.buffers);
        context.queue.submit(Some(encoder.finish()));
        wait_idle(device)?;
        log::debug!(
            "[WgpuBackend] surface {} relaid out as {:?}: {} region moves",
            id,
            layout.placement,
            moves.len()
        );
        Ok(())
    }

    fn read_surface(&mut self, id: SurfaceId) -> EngineResult<SurfaceSnapshot> {
        let surface = self.surfaces.get(&id).ok_or_else(|| unknown_surface(id))?;
        let b = &surface.buffers;
        let sizes = [0, 1, 2].map(|s| b.layout.stream_words(s) * 4);
        let mut words = read_buffers(
            &self.context.device,
            &self.context.queue,
            &[
                (&b.records, b.records_size()),
                (&b.streams[0], sizes[0]),
                (&b.streams[1], sizes[1]),
                (&b.streams[2], sizes[2]),
                (&b.draw_args, b.draw_args_size()),
            ],
        )?
        .into_iter();
        let mut next = || words.next().unwrap_or_default();
        let records = bytemuck::pod_collect_to_vec::<u32, ChunkRecord>(&next());
        let streams = [next(), next(), next()];
        let draw_args = next();
        Ok(SurfaceSnapshot {
            layout: b.layout,
            records,
            streams,
            draw_args,
        })
    }

    fn seal(&mut self, id: SurfaceId, instance_count: u32) -> EngineResult<()> {
        self.surface_mut(id)?.buffers.instance_count = instance_count;
        self.submit_seal(id)
    }

    fn upload_instances(
        &mut self,
        id: SurfaceId,
        transforms: &[InstanceTransform],
        chunk_owner: &[u32],
    ) -> EngineResult<()> {
        let Self { context, surfaces, .. } = self;
        let surface = surfaces.get_mut(&id).ok_or_else(|| unknown_surface(id))?;
        let device = &context.device;
        surface.buffers.instances = create_storage_buffer_init(
            device,
            "clay_instances",
            bytemuck::cast_slice(transforms),
            wgpu::BufferUsages::VERTEX,
        );
        surface.buffers.chunk_owner = create_storage_buffer_init(
            device,
            "clay_chunk_owner",
            bytemuck::cast_slice(chunk_owner),
            wgpu::BufferUsages::empty(),
        );
        Ok(())
    }
}

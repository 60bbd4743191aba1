//! GPU Buffers
//!
//! Uniform blocks of the clay kernels and the two resource sets they run on:
//! [`SharedResources`] (grids, scratch streams, counters and the shared arena,
//! one set per device) and [`SurfaceBuffers`] (one set per container).

use crate::arena::SurfaceLayout;
use crate::chunk::{ChunkGrid, ChunkRecord};
use crate::config::GridResolution;
use crate::extract::{Strategy, mc_tables::tri_table_words};
use crate::solid::{GpuSolid, SolidBounds};

use super::context::{create_storage_buffer, create_storage_buffer_init, create_uniform_buffer};

/// Number of u32 words in the counter buffer.
pub const COUNTER_WORDS: u64 = 16;
/// Number of u32 words in the indirect dispatch buffer: fine pass + 3 commit copies.
pub const DISPATCH_ARG_WORDS: u64 = 12;
/// Byte offset of the per-active-cell dispatch arguments.
pub const ACTIVE_CELL_ARGS_OFFSET: u64 = 0;

/// Byte offset of the commit dispatch arguments of `stream`.
pub const fn commit_args_offset(stream: usize) -> u64 {
    (3 + 3 * stream as u64) * 4
}

/// Strategy id as seen by the kernels.
pub fn strategy_code(strategy: Strategy) -> u32 {
    match strategy {
        Strategy::PointSplat => 0,
        Strategy::SparseVoxel => 1,
        Strategy::Mesh => 2,
    }
}

/// Per-chunk uniform block shared by every chunk kernel.
///
/// Layout (96 bytes, matches `ChunkParams` in clay_common.wgsl):
/// - origin: vec3<f32> + voxel: f32                       (16 bytes) chunk min corner
/// - center: vec3<f32> + size: f32                        (16 bytes)
/// - fine, coarse, edge, chunk: u32                       (16 bytes)
/// - solid_count, filter_capacity, strategy, block_size   (16 bytes)
/// - capacity: vec3<u32> + coarse_cells: u32              (16 bytes) region capacity in records
/// - record_words: vec3<u32> + pad                        (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ChunkParams {
    pub origin: [f32; 3],
    pub voxel: f32,
    pub center: [f32; 3],
    pub size: f32,
    pub fine: u32,
    pub coarse: u32,
    pub edge: u32,
    pub chunk: u32,
    pub solid_count: u32,
    pub filter_capacity: u32,
    pub strategy: u32,
    pub block_size: u32,
    pub capacity: [u32; 3],
    pub coarse_cells: u32,
    pub record_words: [u32; 3],
    pub _pad0: u32,
}

static_assertions::assert_eq_size!(ChunkParams, [u8; 96]);

impl ChunkParams {
    pub fn new(
        grid: &ChunkGrid,
        chunk: u32,
        res: GridResolution,
        layout: &SurfaceLayout,
        solid_count: u32,
        filter_capacity: u32,
    ) -> Self {
        let (min, _) = grid.aabb(chunk);
        Self {
            origin: min.to_array(),
            voxel: grid.chunk_size / res.fine as f32,
            center: grid.center(chunk).to_array(),
            size: grid.chunk_size,
            fine: res.fine,
            coarse: res.coarse,
            edge: res.block_edge(),
            chunk,
            solid_count,
            filter_capacity,
            strategy: strategy_code(layout.strategy),
            block_size: res.block_size(),
            capacity: layout.chunk_capacity,
            coarse_cells: res.coarse_cell_count() as u32,
            record_words: layout.record_words,
            _pad0: 0,
        }
    }
}

/// Uniform of the draw-argument kernel.
///
/// Layout (16 bytes): strategy, instance_count, chunk_count, pad
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SealParams {
    pub strategy: u32,
    pub instance_count: u32,
    pub chunk_count: u32,
    pub _pad0: u32,
}

const _: () = assert!(std::mem::size_of::<SealParams>() == 16);

/// Uniform selecting the stream of a commit copy.
///
/// Layout (16 bytes): index + 3 pad words
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StreamParams {
    pub index: u32,
    pub _pad: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<StreamParams>() == 16);

/// Grow `buffer` to at least `size` bytes. Returns true when it was replaced;
/// the old content is not carried over.
fn ensure_size(
    device: &wgpu::Device,
    buffer: &mut wgpu::Buffer,
    label: &str,
    size: u64,
    extra_usage: wgpu::BufferUsages,
) -> bool {
    if buffer.size() >= size {
        return false;
    }
    log::debug!("[SharedResources] growing {} to {} bytes", label, size);
    *buffer = create_storage_buffer(device, label, size, extra_usage);
    true
}

/// Resources shared by every container on one device.
pub struct SharedResources {
    pub res: GridResolution,
    /// Per coarse cell: distance bits, active slot + 1
    pub coarse: wgpu::Buffer,
    /// Per lattice node: distance bits, attribute word
    pub fine: wgpu::Buffer,
    pub active_cells: wgpu::Buffer,
    pub counters: wgpu::Buffer,
    pub dispatch_args: wgpu::Buffer,
    pub filtered: wgpu::Buffer,
    pub tri_table: wgpu::Buffer,
    /// Chunk output before it is committed, grown on demand
    pub scratch: [wgpu::Buffer; 3],
    pub stream_params: [wgpu::Buffer; 3],
    /// Full-capacity streams lent to one container at a time
    pub arena: [wgpu::Buffer; 3],
}

impl SharedResources {
    pub fn new(device: &wgpu::Device, res: GridResolution, max_solids_per_voxel: u32) -> Self {
        let coarse_cells = res.coarse_cell_count() as u64;
        let fine_nodes = res.fine_node_count() as u64;
        let none = wgpu::BufferUsages::empty();

        let stream_params = [0u32, 1, 2].map(|index| {
            create_uniform_buffer(
                device,
                &format!("clay_stream_params_{}", index),
                bytemuck::bytes_of(&StreamParams { index, _pad: [0; 3] }),
            )
        });

        log::info!(
            "[SharedResources] grid {}³ fine / {}³ coarse ({} nodes)",
            res.fine,
            res.coarse,
            fine_nodes
        );

        Self {
            res,
            coarse: create_storage_buffer(device, "clay_coarse_grid", coarse_cells * 8, none),
            fine: create_storage_buffer(device, "clay_fine_grid", fine_nodes * 8, none),
            active_cells: create_storage_buffer(device, "clay_active_cells", coarse_cells * 4, none),
            counters: create_storage_buffer(device, "clay_counters", COUNTER_WORDS * 4, none),
            dispatch_args: create_storage_buffer(
                device,
                "clay_dispatch_args",
                DISPATCH_ARG_WORDS * 4,
                wgpu::BufferUsages::INDIRECT,
            ),
            filtered: create_storage_buffer(device, "clay_filtered_solids", u64::from(max_solids_per_voxel) * 4, none),
            tri_table: create_storage_buffer_init(
                device,
                "clay_tri_table",
                bytemuck::cast_slice(&tri_table_words()),
                none,
            ),
            scratch: [0, 1, 2].map(|s| create_storage_buffer(device, &format!("clay_scratch_{}", s), 0, none)),
            stream_params,
            arena: [0, 1, 2].map(|s| create_storage_buffer(device, &format!("clay_arena_{}", s), 0, none)),
        }
    }

    /// Make the scratch streams hold one chunk at `capacity`.
    pub fn ensure_scratch(&mut self, device: &wgpu::Device, capacity: [u32; 3], record_words: [u32; 3]) {
        for s in 0..3 {
            let bytes = u64::from(capacity[s]) * u64::from(record_words[s]) * 4;
            ensure_size(
                device,
                &mut self.scratch[s],
                &format!("clay_scratch_{}", s),
                bytes,
                wgpu::BufferUsages::empty(),
            );
        }
    }

    pub fn ensure_filtered(&mut self, device: &wgpu::Device, max_solids_per_voxel: u32) {
        ensure_size(
            device,
            &mut self.filtered,
            "clay_filtered_solids",
            u64::from(max_solids_per_voxel) * 4,
            wgpu::BufferUsages::empty(),
        );
    }
}

/// Output buffers of one container, as exposed to renderers.
pub struct SurfaceBuffers {
    pub layout: SurfaceLayout,
    pub chunk_count: u32,
    /// Streams A, B and C; clones of the shared arena while the container borrows it
    pub streams: [wgpu::Buffer; 3],
    /// `ChunkRecord` per chunk: bounding box, counts, status and region bases
    pub records: wgpu::Buffer,
    /// Indirect draw arguments per chunk
    pub draw_args: wgpu::Buffer,
    pub solids: wgpu::Buffer,
    pub bounds: wgpu::Buffer,
    pub solid_count: u32,
    /// Instance transforms (model + normal matrix)
    pub instances: wgpu::Buffer,
    /// Per chunk: the container drawing it
    pub chunk_owner: wgpu::Buffer,
    pub instance_count: u32,
}

impl SurfaceBuffers {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, layout: &SurfaceLayout, grid: &ChunkGrid) -> Self {
        let chunk_count = grid.count();
        let none = wgpu::BufferUsages::empty();
        let draw_words = u64::from(layout.strategy.draw_args_words()) * u64::from(chunk_count);

        let records = create_storage_buffer(
            device,
            "clay_chunk_records",
            std::mem::size_of::<ChunkRecord>() as u64 * u64::from(chunk_count),
            none,
        );
        let bases = if layout.is_evaluable() {
            layout.expanded_bases()
        } else {
            vec![[0; 3]; chunk_count as usize]
        };
        let initial: Vec<ChunkRecord> = grid
            .indices()
            .zip(bases)
            .map(|(c, b)| ChunkRecord::new(grid.center(c), grid.chunk_size, b))
            .collect();
        queue.write_buffer(&records, 0, bytemuck::cast_slice(&initial));

        Self {
            layout: *layout,
            chunk_count,
            streams: Self::create_streams(device, layout),
            records,
            draw_args: create_storage_buffer(device, "clay_draw_args", draw_words * 4, wgpu::BufferUsages::INDIRECT),
            solids: create_storage_buffer(device, "clay_solids", 0, none),
            bounds: create_storage_buffer(device, "clay_solid_bounds", 0, none),
            solid_count: 0,
            instances: create_storage_buffer(device, "clay_instances", 0, wgpu::BufferUsages::VERTEX),
            chunk_owner: create_storage_buffer(device, "clay_chunk_owner", 0, none),
            instance_count: 0,
        }
    }

    /// Streams sized for `layout` (at least 16 bytes each).
    pub fn create_streams(device: &wgpu::Device, layout: &SurfaceLayout) -> [wgpu::Buffer; 3] {
        [0, 1, 2].map(|s| {
            create_storage_buffer(
                device,
                &format!("clay_stream_{}", s),
                layout.stream_words(s) * 4,
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX,
            )
        })
    }

    /// Replace the solid list. Buffers are reallocated only when they grow.
    pub fn write_solids(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, solids: &[GpuSolid], bounds: &[SolidBounds]) {
        let solid_bytes: &[u8] = bytemuck::cast_slice(solids);
        let bound_bytes: &[u8] = bytemuck::cast_slice(bounds);
        ensure_size(device, &mut self.solids, "clay_solids", solid_bytes.len() as u64, wgpu::BufferUsages::empty());
        ensure_size(device, &mut self.bounds, "clay_solid_bounds", bound_bytes.len() as u64, wgpu::BufferUsages::empty());
        if !solid_bytes.is_empty() {
            queue.write_buffer(&self.solids, 0, solid_bytes);
        }
        if !bound_bytes.is_empty() {
            queue.write_buffer(&self.bounds, 0, bound_bytes);
        }
        self.solid_count = bounds.len() as u32;
    }

    pub fn records_size(&self) -> u64 {
        std::mem::size_of::<ChunkRecord>() as u64 * u64::from(self.chunk_count)
    }

    pub fn draw_args_size(&self) -> u64 {
        u64::from(self.layout.strategy.draw_args_words()) * u64::from(self.chunk_count) * 4
    }
}

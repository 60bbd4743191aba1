//! Compute Dispatchers
//!
//! Records the kernel chain of one chunk evaluation and the draw-argument seal:
//!
//! 1. `chunk_filter`: ordered solid list of the chunk (1 workgroup)
//! 2. `grid_coarse`: one thread per coarse cell, builds the active list
//! 3. `grid_prepare`: indirect arguments, one workgroup per active cell
//! 4. `grid_fine`: lattice nodes of the active cells (indirect)
//! 5. `extract_*`: strategy output into the scratch streams (indirect)
//! 6. `surface_finalize`: counts, status and commit arguments (1 thread)
//! 7. `surface_commit`: scratch → container region, per stream (indirect)
//!
//! Every step reads what the previous one wrote, so they share one compute pass.

use super::buffers::{
    ACTIVE_CELL_ARGS_OFFSET, ChunkParams, SealParams, SharedResources, SurfaceBuffers, commit_args_offset,
    strategy_code,
};
use super::context::create_uniform_buffer;
use super::pipelines::ClayPipelines;
use super::shaders::Kernel;
use crate::extract::Strategy;

/// Workgroup size of the per-cell kernels (must match the shaders).
pub const CELL_WORKGROUP_SIZE: u32 = 64;
/// Workgroups per row of a 2D dispatch (must match `DISPATCH_ROW`).
pub const DISPATCH_ROW: u32 = 256;
/// Largest chunk count the seal kernel covers with its single workgroup.
pub const SEAL_WORKGROUP_SIZE: u32 = 64;

const _: () = assert!(crate::config::MAX_CHUNKS <= SEAL_WORKGROUP_SIZE);

/// Split `workgroups` into a row-major 2D dispatch.
pub fn workgroups_2d(workgroups: u32) -> (u32, u32) {
    (workgroups.min(DISPATCH_ROW), workgroups.div_ceil(DISPATCH_ROW))
}

fn bind_group(
    device: &wgpu::Device,
    pipelines: &ClayPipelines,
    kernel: Kernel,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{}_bind_group", kernel.label())),
        layout: &pipelines.get(kernel).bind_group_layout,
        entries: &entries,
    })
}

/// Record the full evaluation of one chunk into `encoder`.
///
/// `params` must have been built for `surface`'s current layout; the committed
/// regions are the ones in `surface.streams`.
pub fn dispatch_chunk(
    encoder: &mut wgpu::CommandEncoder,
    device: &wgpu::Device,
    pipelines: &ClayPipelines,
    shared: &SharedResources,
    surface: &SurfaceBuffers,
    params: &ChunkParams,
) {
    let params_buffer = create_uniform_buffer(device, "clay_chunk_params", bytemuck::bytes_of(params));
    let strategy = surface.layout.strategy;

    encoder.clear_buffer(&shared.counters, 0, None);
    if strategy == Strategy::SparseVoxel {
        encoder.clear_buffer(&shared.scratch[2], 0, None);
    }

    let filter = bind_group(
        device,
        pipelines,
        Kernel::ChunkFilter,
        &[&params_buffer, &surface.bounds, &shared.filtered, &shared.counters],
    );
    let coarse = bind_group(
        device,
        pipelines,
        Kernel::GridCoarse,
        &[
            &params_buffer,
            &surface.solids,
            &shared.filtered,
            &shared.counters,
            &shared.coarse,
            &shared.active_cells,
        ],
    );
    let prepare = bind_group(
        device,
        pipelines,
        Kernel::GridPrepare,
        &[&shared.counters, &shared.dispatch_args],
    );
    let fine = bind_group(
        device,
        pipelines,
        Kernel::GridFine,
        &[
            &params_buffer,
            &surface.solids,
            &shared.filtered,
            &shared.counters,
            &shared.active_cells,
            &shared.fine,
        ],
    );
    let (extract_kernel, extract) = match strategy {
        Strategy::PointSplat => (
            Kernel::ExtractPoints,
            bind_group(
                device,
                pipelines,
                Kernel::ExtractPoints,
                &[
                    &params_buffer,
                    &shared.counters,
                    &shared.coarse,
                    &shared.fine,
                    &shared.active_cells,
                    &shared.scratch[0],
                ],
            ),
        ),
        Strategy::SparseVoxel => (
            Kernel::ExtractVoxels,
            bind_group(
                device,
                pipelines,
                Kernel::ExtractVoxels,
                &[
                    &params_buffer,
                    &shared.counters,
                    &shared.coarse,
                    &shared.fine,
                    &shared.active_cells,
                    &shared.scratch[0],
                    &shared.scratch[1],
                    &shared.scratch[2],
                ],
            ),
        ),
        Strategy::Mesh => (
            Kernel::ExtractMesh,
            bind_group(
                device,
                pipelines,
                Kernel::ExtractMesh,
                &[
                    &params_buffer,
                    &shared.counters,
                    &shared.coarse,
                    &shared.fine,
                    &shared.active_cells,
                    &shared.tri_table,
                    &shared.scratch[0],
                    &shared.scratch[1],
                ],
            ),
        ),
    };
    let finalize = bind_group(
        device,
        pipelines,
        Kernel::SurfaceFinalize,
        &[&params_buffer, &shared.counters, &surface.records, &shared.dispatch_args],
    );
    let commits: Vec<(usize, wgpu::BindGroup)> = (0..3)
        .filter(|&s| surface.layout.record_words[s] > 0)
        .map(|s| {
            let group = bind_group(
                device,
                pipelines,
                Kernel::SurfaceCommit,
                &[
                    &params_buffer,
                    &shared.stream_params[s],
                    &shared.counters,
                    &surface.records,
                    &shared.scratch[s],
                    &surface.streams[s],
                ],
            );
            (s, group)
        })
        .collect();

    let coarse_workgroups = workgroups_2d((params.coarse_cells).div_ceil(CELL_WORKGROUP_SIZE));

    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some("clay_chunk_pass"),
        timestamp_writes: None,
    });

    pass.set_pipeline(&pipelines.get(Kernel::ChunkFilter).pipeline);
    pass.set_bind_group(0, &filter, &[]);
    pass.dispatch_workgroups(1, 1, 1);

    pass.set_pipeline(&pipelines.get(Kernel::GridCoarse).pipeline);
    pass.set_bind_group(0, &coarse, &[]);
    pass.dispatch_workgroups(coarse_workgroups.0, coarse_workgroups.1, 1);

    pass.set_pipeline(&pipelines.get(Kernel::GridPrepare).pipeline);
    pass.set_bind_group(0, &prepare, &[]);
    pass.dispatch_workgroups(1, 1, 1);

    pass.set_pipeline(&pipelines.get(Kernel::GridFine).pipeline);
    pass.set_bind_group(0, &fine, &[]);
    pass.dispatch_workgroups_indirect(&shared.dispatch_args, ACTIVE_CELL_ARGS_OFFSET);

    pass.set_pipeline(&pipelines.get(extract_kernel).pipeline);
    pass.set_bind_group(0, &extract, &[]);
    pass.dispatch_workgroups_indirect(&shared.dispatch_args, ACTIVE_CELL_ARGS_OFFSET);

    pass.set_pipeline(&pipelines.get(Kernel::SurfaceFinalize).pipeline);
    pass.set_bind_group(0, &finalize, &[]);
    pass.dispatch_workgroups(1, 1, 1);

    pass.set_pipeline(&pipelines.get(Kernel::SurfaceCommit).pipeline);
    for (s, group) in &commits {
        pass.set_bind_group(0, group, &[]);
        pass.dispatch_workgroups_indirect(&shared.dispatch_args, commit_args_offset(*s));
    }
}

/// Record the draw-argument rewrite of a surface.
pub fn dispatch_seal(
    encoder: &mut wgpu::CommandEncoder,
    device: &wgpu::Device,
    pipelines: &ClayPipelines,
    surface: &SurfaceBuffers,
) {
    let seal = SealParams {
        strategy: strategy_code(surface.layout.strategy),
        instance_count: surface.instance_count,
        chunk_count: surface.chunk_count,
        _pad0: 0,
    };
    let seal_buffer = create_uniform_buffer(device, "clay_seal_params", bytemuck::bytes_of(&seal));
    let group = bind_group(
        device,
        pipelines,
        Kernel::SurfaceSeal,
        &[&seal_buffer, &surface.records, &surface.draw_args],
    );

    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some("clay_seal_pass"),
        timestamp_writes: None,
    });
    pass.set_pipeline(&pipelines.get(Kernel::SurfaceSeal).pipeline);
    pass.set_bind_group(0, &group, &[]);
    pass.dispatch_workgroups(1, 1, 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroups_2d() {
        assert_eq!(workgroups_2d(0), (0, 0));
        assert_eq!(workgroups_2d(1), (1, 1));
        assert_eq!(workgroups_2d(256), (256, 1));
        assert_eq!(workgroups_2d(257), (256, 2));
        // 64³ coarse cells at 64 threads per workgroup
        assert_eq!(workgroups_2d(4096), (256, 16));
    }
}

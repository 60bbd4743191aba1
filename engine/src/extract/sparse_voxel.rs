//! Sparse-Voxel Pointer Builder
//!
//! Two-level index over the chunk's surface nodes:
//! - stream C: one pointer per coarse cell, 0 when empty, otherwise block + 1
//! - stream B: blocks of `edge³` entries, 0 when empty, otherwise point + 1
//! - stream A: point records, as in the point-splat strategy
//!
//! All indices are chunk-local so regions can be moved without rewriting them.

use super::point_splat::is_surface;
use super::{ChunkStreams, PointRecord};
use crate::grid::GridEvaluator;

/// Occupancy of one chunk's pointer hierarchy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SparseVoxelCounts {
    pub points: u32,
    pub blocks: u32,
}

/// Build the pointer hierarchy of the evaluated chunk into `out`.
pub fn extract_sparse_voxels(grid: &GridEvaluator, out: &mut ChunkStreams) -> SparseVoxelCounts {
    out.clear();
    let res = grid.resolution();
    let block_size = res.block_size() as usize;
    let voxel = grid.voxel();
    out.words[2].resize(res.coarse_cell_count(), 0);

    let mut counts = SparseVoxelCounts::default();
    let mut block = vec![0u32; block_size];
    for &cell in grid.active_cells() {
        block.fill(0);
        let mut any = false;
        for (local, node) in grid.cell_nodes(cell).enumerate() {
            let (d, attr) = grid.sample(node);
            if !is_surface(d, voxel) {
                continue;
            }
            let rec = PointRecord::new(node, attr);
            out.words[0].extend_from_slice(&[rec.coords, rec.attr]);
            block[local] = counts.points + 1;
            counts.points += 1;
            any = true;
        }
        if any {
            out.words[1].extend_from_slice(&block);
            counts.blocks += 1;
            out.words[2][cell as usize] = counts.blocks;
        }
    }

    out.counts = [
        counts.points,
        counts.blocks * block_size as u32,
        res.coarse_cell_count() as u32,
    ];
    counts
}

/// Look up the point record index of a node through the hierarchy.
pub fn lookup(streams: &[Vec<u32>; 3], grid: &GridEvaluator, node: glam::UVec3) -> Option<u32> {
    let res = grid.resolution();
    let edge = res.block_edge();
    let cell = grid.owner_cell(node);
    let block = streams[2].get(cell as usize).copied().filter(|&b| b != 0)? - 1;
    let local = node % edge;
    let slot = local.x + local.y * edge + local.z * edge * edge;
    let entry = streams[1]
        .get((block * res.block_size() + slot) as usize)
        .copied()
        .filter(|&e| e != 0)?;
    Some(entry - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridResolution;
    use crate::extract::extract_points;
    use crate::field::PRIM_SPHERE;
    use crate::solid::Solid;
    use glam::{UVec3, Vec3};

    fn evaluated_sphere() -> GridEvaluator {
        let solids = [Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(2.0)).to_gpu(1.0)];
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        grid.evaluate_chunk(&solids, &[0], Vec3::splat(-4.0), 8.0);
        grid
    }

    #[test]
    fn test_same_points_as_point_splat() {
        let grid = evaluated_sphere();
        let mut voxels = ChunkStreams::default();
        let counts = extract_sparse_voxels(&grid, &mut voxels);
        let mut points = ChunkStreams::default();
        extract_points(&grid, &mut points);
        assert_eq!(counts.points, points.counts[0]);
        assert_eq!(voxels.words[0], points.words[0]);
    }

    #[test]
    fn test_hierarchy_resolves_every_point() {
        let grid = evaluated_sphere();
        let mut out = ChunkStreams::default();
        let counts = extract_sparse_voxels(&grid, &mut out);
        assert!(counts.blocks > 0);
        assert_eq!(out.counts[1], counts.blocks * 64);
        assert_eq!(out.counts[2], 512);

        for (i, pair) in out.words[0].chunks_exact(2).enumerate() {
            let node = PointRecord { coords: pair[0], attr: pair[1] }.node();
            assert_eq!(lookup(&out.words, &grid, node), Some(i as u32));
        }
        // The chunk center is deep inside the sphere
        assert_eq!(lookup(&out.words, &grid, UVec3::splat(16)), None);
    }
}

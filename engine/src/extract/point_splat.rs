//! Point-Splat Compactor
//!
//! Appends one record per surface node (`-voxel < d <= 0`) to stream A. The GPU
//! version appends through an atomic counter; the seal pass turns the committed
//! count into `count * 3` splat vertices.

use super::{ChunkStreams, PointRecord};
use crate::grid::GridEvaluator;

/// True for nodes on the inner shell of the surface.
#[inline]
pub fn is_surface(d: f32, voxel: f32) -> bool {
    d <= 0.0 && d > -voxel
}

/// Extract the surface nodes of the evaluated chunk into `out` (stream A).
pub fn extract_points(grid: &GridEvaluator, out: &mut ChunkStreams) {
    out.clear();
    let voxel = grid.voxel();
    for &cell in grid.active_cells() {
        for node in grid.cell_nodes(cell) {
            let (d, attr) = grid.sample(node);
            if is_surface(d, voxel) {
                let rec = PointRecord::new(node, attr);
                out.words[0].extend_from_slice(&[rec.coords, rec.attr]);
                out.counts[0] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridResolution;
    use crate::field::PRIM_SPHERE;
    use crate::solid::Solid;
    use glam::Vec3;

    #[test]
    fn test_sphere_points_lie_on_shell() {
        let solids = [Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(2.0)).to_gpu(1.0)];
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        grid.evaluate_chunk(&solids, &[0], Vec3::splat(-4.0), 8.0);
        let mut out = ChunkStreams::default();
        extract_points(&grid, &mut out);

        assert!(out.counts[0] > 100);
        assert_eq!(out.words[0].len() as u32, out.counts[0] * 2);
        for pair in out.words[0].chunks_exact(2) {
            let rec = PointRecord { coords: pair[0], attr: pair[1] };
            let p = grid.node_position(rec.node());
            let r = p.length();
            assert!(r <= 2.0 + 1e-4 && r > 2.0 - 0.25 - 1e-4, "radius {}", r);
        }
    }

    #[test]
    fn test_no_points_without_solids() {
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        grid.evaluate_chunk(&[], &[], Vec3::splat(-4.0), 8.0);
        let mut out = ChunkStreams::default();
        out.counts[0] = 9;
        extract_points(&grid, &mut out);
        assert_eq!(out.counts, [0, 0, 0]);
    }
}

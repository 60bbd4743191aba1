//! Grid Evaluator (CPU reference)
//!
//! Two-level rasterization of one chunk's filtered solid list, matching
//! grid_coarse.wgsl and grid_fine.wgsl:
//!
//! 1. Coarse pass: the field is sampled at the center of every coarse cell. A
//!    cell is active when the surface may pass through it
//!    (`|d| <= half_diagonal + 2 * voxel`); active cells are listed in order.
//! 2. Fine pass: only the lattice nodes owned by active cells are evaluated.
//!    Nodes under inactive cells read their cell's coarse value, which has the
//!    right sign and is at least two voxels away from the surface.
//!
//! The grid buffers are shared by every container and overwritten per chunk.

use glam::{UVec3, Vec3};

use crate::config::GridResolution;
use crate::field::{self, FieldSample};
use crate::solid::{GpuSolid, NO_SOLID};

/// Pack a linear colour into RGB565.
pub fn pack_rgb565(color: Vec3) -> u32 {
    let c = color.clamp(Vec3::ZERO, Vec3::ONE);
    let r = (c.x * 31.0).round() as u32;
    let g = (c.y * 63.0).round() as u32;
    let b = (c.z * 31.0).round() as u32;
    (r << 11) | (g << 5) | b
}

/// Unpack an RGB565 colour.
pub fn unpack_rgb565(packed: u32) -> Vec3 {
    Vec3::new(
        ((packed >> 11) & 31) as f32 / 31.0,
        ((packed >> 5) & 63) as f32 / 63.0,
        (packed & 31) as f32 / 31.0,
    )
}

/// Grid attribute word: RGB565 colour in the high half, solid id in the low half.
#[inline]
pub fn pack_attr(color: Vec3, solid: u32) -> u32 {
    (pack_rgb565(color) << 16) | (solid & 0xFFFF)
}

#[inline]
pub fn attr_solid(attr: u32) -> u32 {
    attr & 0xFFFF
}

#[inline]
pub fn attr_color(attr: u32) -> Vec3 {
    unpack_rgb565(attr >> 16)
}

/// Shared coarse and fine grid of the chunk currently being evaluated.
pub struct GridEvaluator {
    res: GridResolution,
    origin: Vec3,
    voxel: f32,
    coarse_dist: Vec<f32>,
    /// 0 = inactive, otherwise index into `active` + 1
    cell_slot: Vec<u32>,
    active: Vec<u32>,
    fine_dist: Vec<f32>,
    fine_attr: Vec<u32>,
}

impl GridEvaluator {
    pub fn new(res: GridResolution) -> Self {
        Self {
            res,
            origin: Vec3::ZERO,
            voxel: 1.0,
            coarse_dist: vec![field::FIELD_FAR; res.coarse_cell_count()],
            cell_slot: vec![0; res.coarse_cell_count()],
            active: Vec::new(),
            fine_dist: vec![field::FIELD_FAR; res.fine_node_count()],
            fine_attr: vec![NO_SOLID; res.fine_node_count()],
        }
    }

    pub fn resolution(&self) -> GridResolution {
        self.res
    }

    /// Minimum corner of the chunk last evaluated.
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Fine lattice spacing of the chunk last evaluated.
    pub fn voxel(&self) -> f32 {
        self.voxel
    }

    /// Active coarse cells in ascending order.
    pub fn active_cells(&self) -> &[u32] {
        &self.active
    }

    pub fn is_cell_active(&self, cell: u32) -> bool {
        self.cell_slot
            .get(cell as usize)
            .is_some_and(|&slot| slot != 0)
    }

    #[inline]
    pub fn cell_coords(&self, cell: u32) -> UVec3 {
        let c = self.res.coarse;
        UVec3::new(cell % c, (cell / c) % c, cell / (c * c))
    }

    #[inline]
    pub fn cell_index(&self, coords: UVec3) -> u32 {
        let c = self.res.coarse;
        coords.x + coords.y * c + coords.z * c * c
    }

    /// Coarse cell owning a lattice node.
    #[inline]
    pub fn owner_cell(&self, node: UVec3) -> u32 {
        let edge = self.res.block_edge();
        let last = self.res.coarse - 1;
        self.cell_index(UVec3::new(
            (node.x / edge).min(last),
            (node.y / edge).min(last),
            (node.z / edge).min(last),
        ))
    }

    #[inline]
    fn node_index(&self, node: UVec3) -> usize {
        let n = self.res.fine_nodes_per_axis() as usize;
        node.x as usize + node.y as usize * n + node.z as usize * n * n
    }

    /// Container-space position of a lattice node.
    #[inline]
    pub fn node_position(&self, node: UVec3) -> Vec3 {
        self.origin + node.as_vec3() * self.voxel
    }

    /// Signed distance and attribute word at a lattice node.
    pub fn sample(&self, node: UVec3) -> (f32, u32) {
        let cell = self.owner_cell(node);
        if self.is_cell_active(cell) {
            let i = self.node_index(node);
            (self.fine_dist[i], self.fine_attr[i])
        } else {
            (self.coarse_dist[cell as usize], NO_SOLID)
        }
    }

    /// Lattice nodes of a coarse cell with every coordinate below `fine`, x fastest.
    pub fn cell_nodes(&self, cell: u32) -> impl Iterator<Item = UVec3> + use<> {
        let edge = self.res.block_edge();
        let base = self.cell_coords(cell) * edge;
        (0..edge * edge * edge).map(move |i| {
            base + UVec3::new(i % edge, (i / edge) % edge, i / (edge * edge))
        })
    }

    /// Evaluate one chunk. Returns the number of active coarse cells.
    pub fn evaluate_chunk(&mut self, solids: &[GpuSolid], ids: &[u32], origin: Vec3, chunk_size: f32) -> usize {
        self.origin = origin;
        self.voxel = chunk_size / self.res.fine as f32;
        self.evaluate_coarse(solids, ids);
        self.evaluate_fine(solids, ids);
        self.active.len()
    }

    fn evaluate_coarse(&mut self, solids: &[GpuSolid], ids: &[u32]) {
        let edge = self.res.block_edge();
        let cell_size = self.voxel * edge as f32;
        let half_diag = cell_size * 3.0_f32.sqrt() * 0.5;
        let threshold = half_diag + 2.0 * self.voxel;

        self.active.clear();
        for cell in 0..self.res.coarse_cell_count() as u32 {
            let center = self.origin + (self.cell_coords(cell).as_vec3() + 0.5) * cell_size;
            let d = field::evaluate(solids, ids, center).dist;
            self.coarse_dist[cell as usize] = d;
            if d.abs() <= threshold {
                self.active.push(cell);
                self.cell_slot[cell as usize] = self.active.len() as u32;
            } else {
                self.cell_slot[cell as usize] = 0;
            }
        }
    }

    fn evaluate_fine(&mut self, solids: &[GpuSolid], ids: &[u32]) {
        let edge = self.res.block_edge();
        let last = self.res.coarse - 1;
        let span = edge + 1;
        for k in 0..self.active.len() {
            let cell = self.active[k];
            let coords = self.cell_coords(cell);
            let base = coords * edge;
            for i in 0..span * span * span {
                let local = UVec3::new(i % span, (i / span) % span, i / (span * span));
                // The far boundary node belongs to the next cell unless this is the last one
                if (local.x == edge && coords.x != last)
                    || (local.y == edge && coords.y != last)
                    || (local.z == edge && coords.z != last)
                {
                    continue;
                }
                let node = base + local;
                let sample: FieldSample = field::evaluate(solids, ids, self.node_position(node));
                let idx = self.node_index(node);
                self.fine_dist[idx] = sample.dist;
                self.fine_attr[idx] = pack_attr(sample.color, sample.solid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solid::Solid;

    fn sphere(r: f32) -> GpuSolid {
        Solid::new(crate::field::PRIM_SPHERE)
            .with_scale(Vec3::splat(r))
            .with_color(Vec3::new(1.0, 0.0, 0.0))
            .to_gpu(1.0)
    }

    #[test]
    fn test_rgb565_roundtrip_extremes() {
        assert_eq!(pack_rgb565(Vec3::ONE), 0xFFFF);
        assert_eq!(pack_rgb565(Vec3::ZERO), 0);
        assert_eq!(unpack_rgb565(0xF800), Vec3::new(1.0, 0.0, 0.0));
        let attr = pack_attr(Vec3::new(0.0, 0.0, 1.0), 42);
        assert_eq!(attr_solid(attr), 42);
        assert_eq!(attr_color(attr), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_empty_chunk_has_no_active_cells() {
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        let active = grid.evaluate_chunk(&[], &[], Vec3::splat(-4.0), 8.0);
        assert_eq!(active, 0);
        let (d, attr) = grid.sample(UVec3::new(3, 3, 3));
        assert!(d > 1.0e8);
        assert_eq!(attr, NO_SOLID);
    }

    #[test]
    fn test_sphere_activates_shell_only() {
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        let active = grid.evaluate_chunk(&[sphere(2.0)], &[0], Vec3::splat(-4.0), 8.0);
        assert!(active > 0);
        assert!(active < 8 * 8 * 8);
        // Cells at the chunk corners are far outside a radius-2 sphere
        assert!(!grid.is_cell_active(0));
        let ascending = grid.active_cells().windows(2).all(|w| w[0] < w[1]);
        assert!(ascending);
    }

    #[test]
    fn test_fine_matches_direct_evaluation_near_surface() {
        let solids = [sphere(2.0)];
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        grid.evaluate_chunk(&solids, &[0], Vec3::splat(-4.0), 8.0);
        // Node (24, 16, 16) sits at x = 2, on the sphere surface
        let node = UVec3::new(24, 16, 16);
        let (d, attr) = grid.sample(node);
        let direct = crate::field::evaluate(&solids, &[0], grid.node_position(node));
        assert_eq!(d, direct.dist);
        assert_eq!(attr_solid(attr), 0);
        assert!(d.abs() < 1e-4);
    }

    #[test]
    fn test_inactive_nodes_keep_sign() {
        let solids = [sphere(2.0)];
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        grid.evaluate_chunk(&solids, &[0], Vec3::splat(-4.0), 8.0);
        for z in 0..=32 {
            for x in 0..=32 {
                let node = UVec3::new(x, 16, z);
                let (d, _) = grid.sample(node);
                let direct = crate::field::evaluate(&solids, &[0], grid.node_position(node)).dist;
                assert_eq!(d > 0.0, direct > 0.0, "sign mismatch at {:?}", node);
            }
        }
    }

    #[test]
    fn test_boundary_nodes_of_last_cells_are_evaluated() {
        let solids = [Solid::new(crate::field::PRIM_SPHERE)
            .with_position(Vec3::new(4.0, 0.0, 0.0))
            .with_scale(Vec3::splat(1.0))
            .to_gpu(1.0)];
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        grid.evaluate_chunk(&solids, &[0], Vec3::splat(-4.0), 8.0);
        let (d, _) = grid.sample(UVec3::new(32, 16, 16));
        assert!((d + 1.0).abs() < 1e-4);
    }
}

//! Marching-Cubes Mesher
//!
//! Triangulates every lattice cube under an active coarse cell. Crossing cubes
//! never touch inactive cells (their corners are at least two voxels from the
//! surface), so the active list is enough to cover the whole surface.
//!
//! Vertices are not shared between triangles here; the host-side
//! materialisation welds them. Stream B holds chunk-local indices.

use glam::{UVec3, Vec3};

use super::mc_tables::{CORNER_OFFSETS, EDGE_CORNERS, TRI_TABLE};
use super::{ChunkStreams, MeshVertex, pack_rgba8};
use crate::grid::{GridEvaluator, attr_color, attr_solid};

/// Corner samples of one cube.
struct Cube {
    pos: [Vec3; 8],
    dist: [f32; 8],
    attr: [u32; 8],
}

impl Cube {
    fn load(grid: &GridEvaluator, base: UVec3) -> Self {
        let mut cube = Cube {
            pos: [Vec3::ZERO; 8],
            dist: [0.0; 8],
            attr: [0; 8],
        };
        for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
            let node = base + UVec3::from_array(*offset);
            let (d, attr) = grid.sample(node);
            cube.pos[i] = grid.node_position(node);
            cube.dist[i] = d;
            cube.attr[i] = attr;
        }
        cube
    }

    fn index(&self) -> usize {
        self.dist
            .iter()
            .enumerate()
            .filter(|(_, d)| **d < 0.0)
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    /// Surface crossing on an edge: position, colour and dominant solid.
    fn crossing(&self, edge: usize) -> (Vec3, Vec3, u32) {
        let [a, b] = EDGE_CORNERS[edge];
        let (da, db) = (self.dist[a], self.dist[b]);
        let denom = da - db;
        let t = if denom.abs() > f32::EPSILON {
            (da / denom).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let pos = self.pos[a].lerp(self.pos[b], t);
        let color = attr_color(self.attr[a]).lerp(attr_color(self.attr[b]), t);
        let solid = if t < 0.5 {
            attr_solid(self.attr[a])
        } else {
            attr_solid(self.attr[b])
        };
        (pos, color, solid)
    }
}

/// Triangulate the evaluated chunk into `out` (A = vertices, B = indices).
pub fn extract_mesh(grid: &GridEvaluator, out: &mut ChunkStreams) {
    out.clear();
    for &cell in grid.active_cells() {
        for base in grid.cell_nodes(cell) {
            let cube = Cube::load(grid, base);
            let index = cube.index();
            if index == 0 || index == 255 {
                continue;
            }
            for tri in TRI_TABLE[index].chunks_exact(3) {
                if tri[0] < 0 {
                    break;
                }
                // Table winding faces inwards; emit (0, 2, 1)
                let corners = [
                    cube.crossing(tri[0] as usize),
                    cube.crossing(tri[2] as usize),
                    cube.crossing(tri[1] as usize),
                ];
                let normal = (corners[1].0 - corners[0].0)
                    .cross(corners[2].0 - corners[0].0)
                    .normalize_or_zero();
                for (pos, color, solid) in corners {
                    let vertex = MeshVertex {
                        position: pos.to_array(),
                        color: pack_rgba8(color),
                        normal: normal.to_array(),
                        solid,
                    };
                    out.words[0].extend_from_slice(bytemuck::cast_slice(std::slice::from_ref(&vertex)));
                    out.words[1].push(out.counts[0]);
                    out.counts[0] += 1;
                }
            }
        }
    }
    out.counts[1] = out.counts[0];
}

/// Decode stream A words into vertices.
pub fn vertices_from_words(words: &[u32]) -> Vec<MeshVertex> {
    words
        .chunks_exact(8)
        .map(|w| MeshVertex {
            position: [f32::from_bits(w[0]), f32::from_bits(w[1]), f32::from_bits(w[2])],
            color: w[3],
            normal: [f32::from_bits(w[4]), f32::from_bits(w[5]), f32::from_bits(w[6])],
            solid: w[7],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridResolution;
    use crate::field::{PRIM_CUBE, PRIM_SPHERE};
    use crate::solid::Solid;

    fn mesh_of(solid: Solid) -> ChunkStreams {
        let solids = [solid.to_gpu(1.0)];
        let mut grid = GridEvaluator::new(GridResolution::new(32, 8));
        grid.evaluate_chunk(&solids, &[0], Vec3::splat(-4.0), 8.0);
        let mut out = ChunkStreams::default();
        extract_mesh(&grid, &mut out);
        out
    }

    #[test]
    fn test_sphere_mesh_is_closed_and_outward() {
        let out = mesh_of(Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(2.0)));
        assert!(out.counts[0] > 0);
        assert_eq!(out.counts[0] % 3, 0);
        assert_eq!(out.counts[0], out.counts[1]);

        let verts = vertices_from_words(&out.words[0]);
        assert_eq!(verts.len() as u32, out.counts[0]);
        let mut outward = 0;
        for v in &verts {
            let p = Vec3::from_array(v.position);
            assert!((p.length() - 2.0).abs() < 0.1, "vertex off surface: {}", p.length());
            if Vec3::from_array(v.normal).dot(p) > 0.0 {
                outward += 1;
            }
        }
        assert!(outward * 100 >= verts.len() * 99, "{} of {} outward", outward, verts.len());
    }

    #[test]
    fn test_indices_are_chunk_local_and_sequential() {
        let out = mesh_of(Solid::new(PRIM_CUBE).with_scale(Vec3::splat(1.5)));
        for (i, &idx) in out.words[1].iter().enumerate() {
            assert_eq!(idx, i as u32);
        }
    }

    #[test]
    fn test_vertex_attributes_follow_solid() {
        let out = mesh_of(
            Solid::new(PRIM_SPHERE)
                .with_scale(Vec3::splat(1.0))
                .with_color(Vec3::new(0.0, 1.0, 0.0)),
        );
        let verts = vertices_from_words(&out.words[0]);
        assert!(verts.iter().all(|v| v.solid == 0));
        assert!(verts.iter().all(|v| super::super::unpack_rgba8(v.color) == [0, 255, 0, 255]));
    }
}

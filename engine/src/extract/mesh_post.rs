//! Mesh materialisation
//!
//! Turns the raw per-chunk marching-cubes output (three unshared vertices per
//! triangle) into an indexed host mesh: coincident vertices are welded, normals
//! are smoothed across edges below the configured angle and then blended back
//! toward the faceted normal by the voxelize factor.

use std::collections::HashMap;

use glam::Vec3;

use super::MeshVertex;
use super::skin::SkinWeights;
use crate::config::MeshOptions;

/// Positions closer than this are treated as one vertex.
const WELD_EPSILON: f32 = 1.0e-4;

/// Normals are quantized with this step when splitting vertices on hard edges.
const NORMAL_EPSILON: f32 = 1.0e-3;

/// Indexed mesh produced from a mesh container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub colors: Vec<[u8; 4]>,
    /// Dominant solid per vertex
    pub solids: Vec<u32>,
    pub indices: Vec<u32>,
    /// Bone weights per vertex when skin projection ran
    pub skin: Option<Vec<SkinWeights>>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn quantize(v: Vec3, step: f32) -> [i64; 3] {
    (v / step).round().to_array().map(|c| c as i64)
}

/// Build an indexed mesh from raw triangles (`indices` address `vertices`).
pub fn materialize(vertices: &[MeshVertex], indices: &[u32], options: &MeshOptions) -> MeshData {
    // Weld by position
    let mut welded_of = HashMap::new();
    let mut welded: Vec<usize> = Vec::new();
    let mut remap = Vec::with_capacity(vertices.len());
    for (i, v) in vertices.iter().enumerate() {
        let key = quantize(Vec3::from_array(v.position), WELD_EPSILON);
        let id = *welded_of.entry(key).or_insert_with(|| {
            welded.push(i);
            welded.len() - 1
        });
        remap.push(id);
    }
    let position = |w: usize| Vec3::from_array(vertices[welded[w]].position);

    // Faces over welded vertices, degenerate ones dropped
    let mut faces: Vec<([usize; 3], [u32; 3], Vec3)> = Vec::new();
    for tri in indices.chunks_exact(3) {
        let raw = [tri[0], tri[1], tri[2]];
        if raw.iter().any(|&i| i as usize >= vertices.len()) {
            continue;
        }
        let w = raw.map(|i| remap[i as usize]);
        if w[0] == w[1] || w[1] == w[2] || w[0] == w[2] {
            continue;
        }
        let area_normal = (position(w[1]) - position(w[0])).cross(position(w[2]) - position(w[0]));
        faces.push((w, raw, area_normal));
    }

    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); welded.len()];
    for (f, (w, _, _)) in faces.iter().enumerate() {
        for &v in w {
            incident[v].push(f);
        }
    }

    let cos_limit = options.normal_smooth_angle.clamp(0.0, 180.0).to_radians().cos() - 1.0e-6;
    let voxelize = options.voxelize.clamp(0.0, 1.0);

    let mut out = MeshData::default();
    let mut split_of: HashMap<(usize, [i64; 3]), u32> = HashMap::new();
    for (w, raw, area_normal) in &faces {
        let face_unit = area_normal.normalize_or_zero();
        for corner in 0..3 {
            let v = w[corner];
            let smooth = incident[v]
                .iter()
                .map(|&g| faces[g].2)
                .filter(|n| n.normalize_or_zero().dot(face_unit) >= cos_limit)
                .fold(Vec3::ZERO, |acc, n| acc + n)
                .normalize_or_zero();
            let normal = smooth.lerp(face_unit, voxelize).normalize_or(face_unit);

            let key = (v, quantize(normal, NORMAL_EPSILON));
            let index = *split_of.entry(key).or_insert_with(|| {
                let source = &vertices[raw[corner] as usize];
                out.positions.push(Vec3::from_array(vertices[welded[v]].position));
                out.normals.push(normal);
                out.colors.push(super::unpack_rgba8(source.color));
                out.solids.push(source.solid);
                out.positions.len() as u32 - 1
            });
            out.indices.push(index);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::pack_rgba8;

    fn vertex(p: [f32; 3]) -> MeshVertex {
        MeshVertex {
            position: p,
            color: pack_rgba8(Vec3::ONE),
            normal: [0.0; 3],
            solid: 0,
        }
    }

    /// Two triangles folded 90 degrees along the shared edge x = 0..1, y = z = 0.
    fn folded_quad() -> (Vec<MeshVertex>, Vec<u32>) {
        let verts = vec![
            vertex([0.0, 0.0, 0.0]),
            vertex([1.0, 0.0, 0.0]),
            vertex([0.0, 1.0, 0.0]),
            vertex([1.0, 0.0, 0.0]),
            vertex([0.0, 0.0, 0.0]),
            vertex([0.0, 0.0, 1.0]),
        ];
        (verts, vec![0, 1, 2, 3, 4, 5])
    }

    #[test]
    fn test_weld_shares_edge_vertices() {
        let (verts, idx) = folded_quad();
        let mesh = materialize(&verts, &idx, &MeshOptions::default());
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertex_count(), 4);
    }

    #[test]
    fn test_hard_edge_splits_vertices() {
        let (verts, idx) = folded_quad();
        let options = MeshOptions {
            normal_smooth_angle: 45.0,
            voxelize: 0.0,
        };
        let mesh = materialize(&verts, &idx, &options);
        assert_eq!(mesh.vertex_count(), 6);
        for (i, n) in mesh.normals.iter().enumerate() {
            assert!((n.length() - 1.0).abs() < 1e-5, "normal {} not unit", i);
        }
    }

    #[test]
    fn test_voxelize_restores_face_normals() {
        let (verts, idx) = folded_quad();
        let options = MeshOptions {
            normal_smooth_angle: 180.0,
            voxelize: 1.0,
        };
        let mesh = materialize(&verts, &idx, &options);
        assert!(mesh.normals[mesh.indices[0] as usize].abs_diff_eq(Vec3::Z, 1e-5));
        assert!(mesh.normals[mesh.indices[3] as usize].abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_degenerate_triangles_dropped() {
        let verts = vec![vertex([0.0; 3]), vertex([0.0; 3]), vertex([1.0, 0.0, 0.0])];
        let mesh = materialize(&verts, &[0, 1, 2], &MeshOptions::default());
        assert_eq!(mesh.triangle_count(), 0);
    }
}

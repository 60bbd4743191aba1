//! Skin projection
//!
//! Assigns bone weights to a materialised mesh from the solids that shaped it.
//! Each solid belongs to a host object; the host maps objects to bones. A vertex
//! is weighted by every additive solid within `falloff` of it, per bone, and
//! keeps the strongest sixteen bones with weights normalised to one.

use std::collections::HashMap;

use glam::Vec3;

use super::mesh_post::MeshData;
use crate::field::solid_distance;
use crate::solid::{Solid, SolidFlags};

/// Bone influences stored per vertex.
pub const MAX_BONES_PER_VERTEX: usize = 16;

/// Bone ids and weights of one vertex, strongest first.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SkinWeights {
    pub bones: [u32; MAX_BONES_PER_VERTEX],
    pub weights: [f32; MAX_BONES_PER_VERTEX],
    pub count: u32,
}

impl SkinWeights {
    /// Build from unordered per-bone weights.
    pub fn from_weights(mut pairs: Vec<(u32, f32)>) -> Self {
        pairs.retain(|(_, w)| *w > 0.0);
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        pairs.truncate(MAX_BONES_PER_VERTEX);
        let total: f32 = pairs.iter().map(|(_, w)| w).sum();

        let mut skin = SkinWeights::default();
        for (i, (bone, weight)) in pairs.iter().enumerate() {
            skin.bones[i] = *bone;
            skin.weights[i] = if total > 0.0 { weight / total } else { 0.0 };
        }
        skin.count = pairs.len() as u32;
        skin
    }

    pub fn pairs(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.bones
            .iter()
            .zip(self.weights.iter())
            .take(self.count as usize)
            .map(|(b, w)| (*b, *w))
    }
}

/// Bone weights at one point.
fn weights_at(p: Vec3, solids: &[(u32, crate::solid::GpuSolid)], falloff: f32) -> SkinWeights {
    let mut per_bone: HashMap<u32, f32> = HashMap::new();
    let mut nearest: Option<(u32, f32)> = None;
    for (bone, solid) in solids {
        let d = solid_distance(solid, p).max(0.0);
        if nearest.is_none_or(|(_, best)| d < best) {
            nearest = Some((*bone, d));
        }
        let w = (1.0 - d / falloff).clamp(0.0, 1.0);
        if w > 0.0 {
            *per_bone.entry(*bone).or_insert(0.0) += w * w;
        }
    }
    if per_bone.is_empty() {
        if let Some((bone, _)) = nearest {
            per_bone.insert(bone, 1.0);
        }
    }
    SkinWeights::from_weights(per_bone.into_iter().collect())
}

/// Attach bone weights to every vertex of `mesh`.
///
/// Solids whose object has no bone, painters and subtractive solids are ignored.
/// Returns the number of vertices that received at least one bone.
pub fn project_skin(
    mesh: &mut MeshData,
    solids: &[Solid],
    bone_of_object: &HashMap<u32, u32>,
    falloff: f32,
) -> usize {
    let falloff = falloff.max(f32::EPSILON);
    let skinned: Vec<(u32, crate::solid::GpuSolid)> = solids
        .iter()
        .filter(|s| s.blend >= 0.0 && !s.flags().contains(SolidFlags::PAINTER))
        .filter_map(|s| bone_of_object.get(&s.object_id).map(|&bone| (bone, s.to_gpu(1.0))))
        .collect();

    let weights: Vec<SkinWeights> = mesh
        .positions
        .iter()
        .map(|&p| weights_at(p, &skinned, falloff))
        .collect();
    let assigned = weights.iter().filter(|w| w.count > 0).count();
    if assigned < weights.len() {
        log::debug!(
            "[Skin] {} of {} vertices have no bone",
            weights.len() - assigned,
            weights.len()
        );
    }
    mesh.skin = Some(weights);
    assigned
}

//! Field Combination
//!
//! Folds an ordered solid list into one sample: signed distance, colour and the
//! dominant solid id. Mirrors `eval_field` in clay_field.wgsl.

use glam::Vec3;

use super::primitives::solid_distance;
use crate::solid::{GpuSolid, NO_SOLID, SolidFlags};

/// Distance reported where no solid contributes.
pub const FIELD_FAR: f32 = 1.0e9;

/// One evaluated field sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSample {
    pub dist: f32,
    pub color: Vec3,
    /// Solid that dominates the sample, `NO_SOLID` if none
    pub solid: u32,
}

impl FieldSample {
    pub const EMPTY: FieldSample = FieldSample {
        dist: FIELD_FAR,
        color: Vec3::ZERO,
        solid: NO_SOLID,
    };
}

/// Smooth union of `acc` with a solid at distance `ds`.
fn add(acc: &mut FieldSample, ds: f32, k: f32, color: Vec3, id: u32) {
    if k > 0.0 {
        let h = (0.5 + 0.5 * (ds - acc.dist) / k).clamp(0.0, 1.0);
        acc.dist = lerp(ds, acc.dist, h) - k * h * (1.0 - h);
        acc.color = color.lerp(acc.color, h);
        if h < 0.5 {
            acc.solid = id;
        }
    } else if ds < acc.dist {
        acc.dist = ds;
        acc.color = color;
        acc.solid = id;
    }
}

/// Smooth subtraction of a solid at distance `ds` from `acc`.
fn subtract(acc: &mut FieldSample, ds: f32, k: f32) {
    if k > 0.0 {
        let h = (0.5 - 0.5 * (acc.dist + ds) / k).clamp(0.0, 1.0);
        acc.dist = lerp(acc.dist, -ds, h) + k * h * (1.0 - h);
    } else {
        acc.dist = acc.dist.max(-ds);
    }
}

/// Colour-only contribution.
fn paint(acc: &mut FieldSample, ds: f32, k: f32, color: Vec3, id: u32) {
    let w = if k > 0.0 {
        (0.5 - 0.5 * ds / k).clamp(0.0, 1.0)
    } else if ds <= 0.0 {
        1.0
    } else {
        0.0
    };
    acc.color = acc.color.lerp(color, w);
    if w > 0.5 {
        acc.solid = id;
    }
}

/// Merge a finished group into `acc`; the group's sign and smoothness come from `blend`.
fn merge(acc: &mut FieldSample, group: &FieldSample, blend: f32) {
    if blend >= 0.0 {
        add(acc, group.dist, blend, group.color, group.solid);
    } else {
        subtract(acc, group.dist, -blend);
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Distance to a solid, honoring the mirror flag.
pub fn flagged_distance(solid: &GpuSolid, flags: SolidFlags, p: Vec3) -> f32 {
    let d = solid_distance(solid, p);
    if flags.contains(SolidFlags::MIRROR_X) {
        d.min(solid_distance(solid, p * Vec3::new(-1.0, 1.0, 1.0)))
    } else {
        d
    }
}

fn flags_of(solid: &GpuSolid) -> SolidFlags {
    SolidFlags(solid.attrs[3].max(0.0) as u32)
}

/// Evaluate the field at `p` over the solids listed in `ids` (in order).
pub fn evaluate(solids: &[GpuSolid], ids: &[u32], p: Vec3) -> FieldSample {
    let mut outer = FieldSample::EMPTY;
    let mut group = FieldSample::EMPTY;
    let mut group_blend = 0.0f32;
    let mut in_group = false;

    for &id in ids {
        let Some(solid) = solids.get(id as usize) else {
            continue;
        };
        let flags = flags_of(solid);
        let begins = !in_group && flags.contains(SolidFlags::GROUP_BEGIN);
        if begins {
            in_group = true;
            group = FieldSample::EMPTY;
            group_blend = solid.blend;
        }

        let ds = flagged_distance(solid, flags, p);
        let k = solid.blend.abs();
        let color = Vec3::from_array(solid.color);
        let acc = if in_group { &mut group } else { &mut outer };

        if flags.contains(SolidFlags::PAINTER) {
            paint(acc, ds, k, color, id);
        } else if begins || solid.blend >= 0.0 {
            // The group's first member always adds; its sign applies to the merge
            add(acc, ds, k, color, id);
        } else {
            subtract(acc, ds, k);
        }

        if in_group && flags.contains(SolidFlags::GROUP_END) {
            merge(&mut outer, &group, group_blend);
            in_group = false;
        }
    }

    // An unterminated group closes at the end of the list
    if in_group {
        merge(&mut outer, &group, group_blend);
    }
    outer
}

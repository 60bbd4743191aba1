//! Primitive Distance Functions
//!
//! CPU versions of the catalogue primitives in clay_field.wgsl. Every primitive is
//! defined in a unit frame (fits in [-1, 1]³); the caller maps world points into
//! that frame and rescales the result.

use glam::{Quat, Vec2, Vec3};

use crate::solid::GpuSolid;

pub const PRIM_CUBE: u32 = 0;
pub const PRIM_SPHERE: u32 = 1;
pub const PRIM_CYLINDER: u32 = 2;
pub const PRIM_TORUS: u32 = 3;
pub const PRIM_CAPSULE: u32 = 4;

/// Smallest scale component used when mapping into the unit frame.
const MIN_SCALE: f32 = 1.0e-4;

/// Distance in the primitive's unit frame.
pub fn unit_distance(primitive: u32, p: Vec3, attrs: [f32; 4]) -> f32 {
    match primitive {
        PRIM_CUBE => {
            let r = attrs[0].clamp(0.0, 1.0);
            let q = p.abs() - Vec3::splat(1.0 - r);
            q.max(Vec3::ZERO).length() + q.x.max(q.y.max(q.z)).min(0.0) - r
        }
        PRIM_CYLINDER => {
            let r = attrs[0].clamp(0.0, 1.0);
            let d = Vec2::new(Vec2::new(p.x, p.z).length(), p.y.abs()) - Vec2::splat(1.0 - r);
            d.x.max(d.y).min(0.0) + d.max(Vec2::ZERO).length() - r
        }
        PRIM_TORUS => {
            let t = attrs[0].clamp(0.01, 1.0);
            let q = Vec2::new(Vec2::new(p.x, p.z).length() - (1.0 - t), p.y);
            q.length() - t
        }
        PRIM_CAPSULE => {
            let r = attrs[0].clamp(0.01, 1.0);
            let h = 1.0 - r;
            let y = p.y - p.y.clamp(-h, h);
            Vec3::new(p.x, y, p.z).length() - r
        }
        // Sphere, and the fallback for ids the catalogue does not know
        _ => p.length() - 1.0,
    }
}

/// Signed distance from `p` (container space) to one solid, ignoring flags.
pub fn solid_distance(solid: &GpuSolid, p: Vec3) -> f32 {
    let rotation = Quat::from_array(solid.rotation);
    let scale = Vec3::from_array(solid.scale).abs().max(Vec3::splat(MIN_SCALE));
    let local = rotation.inverse() * (p - Vec3::from_array(solid.position)) / scale;
    unit_distance(solid.primitive, local, solid.attrs) * scale.min_element()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solid::Solid;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_unit_sphere() {
        assert!(approx(unit_distance(PRIM_SPHERE, Vec3::ZERO, [0.0; 4]), -1.0));
        assert!(approx(unit_distance(PRIM_SPHERE, Vec3::new(2.0, 0.0, 0.0), [0.0; 4]), 1.0));
    }

    #[test]
    fn test_unit_cube_faces_and_rounding() {
        assert!(approx(unit_distance(PRIM_CUBE, Vec3::new(1.0, 0.0, 0.0), [0.0; 4]), 0.0));
        assert!(approx(unit_distance(PRIM_CUBE, Vec3::ZERO, [0.0; 4]), -1.0));
        // Rounding keeps face centers on the surface
        assert!(approx(unit_distance(PRIM_CUBE, Vec3::new(1.0, 0.0, 0.0), [0.3, 0.0, 0.0, 0.0]), 0.0));
        // But pulls the corner inwards
        let corner = unit_distance(PRIM_CUBE, Vec3::ONE, [0.3, 0.0, 0.0, 0.0]);
        assert!(corner > 0.0);
    }

    #[test]
    fn test_unit_torus_and_capsule() {
        // Torus tube center sits at radius 1 - t
        let d = unit_distance(PRIM_TORUS, Vec3::new(0.5, 0.0, 0.0), [0.5, 0.0, 0.0, 0.0]);
        assert!(approx(d, -0.5));
        let d = unit_distance(PRIM_CAPSULE, Vec3::new(0.0, 1.0, 0.0), [0.5, 0.0, 0.0, 0.0]);
        assert!(approx(d, 0.0));
    }

    #[test]
    fn test_unknown_primitive_is_sphere() {
        let p = Vec3::new(0.0, 3.0, 0.0);
        assert_eq!(unit_distance(42, p, [0.0; 4]), unit_distance(PRIM_SPHERE, p, [0.0; 4]));
    }

    #[test]
    fn test_solid_transform() {
        let solid = Solid::new(PRIM_SPHERE)
            .with_position(Vec3::new(2.0, 0.0, 0.0))
            .with_scale(Vec3::splat(3.0))
            .to_gpu(1.0);
        assert!(approx(solid_distance(&solid, Vec3::new(2.0, 0.0, 0.0)), -3.0));
        assert!(approx(solid_distance(&solid, Vec3::new(7.0, 0.0, 0.0)), 2.0));
    }

    #[test]
    fn test_solid_rotation() {
        let solid = Solid::new(PRIM_CAPSULE)
            .with_scale(Vec3::splat(2.0))
            .with_rotation(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2))
            .to_gpu(1.0);
        let mut gpu = solid;
        gpu.attrs[0] = 0.5;
        // Capsule axis (local y) rotated onto world x
        assert!(approx(solid_distance(&gpu, Vec3::new(2.0, 0.0, 0.0)), 0.0));
        assert!(solid_distance(&gpu, Vec3::new(0.0, 2.0, 0.0)) > 0.0);
    }
}

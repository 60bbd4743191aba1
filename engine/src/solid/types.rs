//! Solid Descriptors
//!
//! A solid is one implicit primitive inside a container: a transform, a blend
//! factor (negative = subtractive), a colour, a catalogue primitive id and two
//! generic attribute vectors. Painter, mirror and group markers are bit flags
//! stored in `attrs.w` rather than separate primitive types.

use glam::{Quat, Vec3, Vec4};

/// Registry slot of a solid inside its container (contiguous after a rescan).
pub type SolidId = u32;

/// Solid id stored in grid attributes when no solid claims a sample.
pub const NO_SOLID: u32 = 0xFFFF;

/// The user-facing blend value is scaled by this before reaching the field.
pub const BLEND_UNIT: f32 = 0.01;

/// Bit flags carried in `attrs.w`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SolidFlags(pub u32);

impl SolidFlags {
    pub const NONE: Self = Self(0);
    /// Colour-only contributor, never changes occupancy
    pub const PAINTER: Self = Self(1);
    /// Also evaluated mirrored across the container's local X = 0 plane
    pub const MIRROR_X: Self = Self(2);
    /// Opens a group; the group merges with this solid's blend
    pub const GROUP_BEGIN: Self = Self(4);
    /// Closes the currently open group
    pub const GROUP_END: Self = Self(8);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Host-side description of one solid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Solid {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// User blend value; negative subtracts, 0 is a hard union
    pub blend: f32,
    pub color: Vec3,
    /// Index into the primitive catalogue
    pub primitive: u32,
    /// xyz = primitive parameters, w = flag bits
    pub attrs: Vec4,
    /// Additional primitive parameters
    pub attrs2: Vec4,
    /// Id of the owning host object (used for skin projection and bookkeeping)
    pub object_id: u32,
}

impl Default for Solid {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(0.5),
            blend: 0.0,
            color: Vec3::ONE,
            primitive: 0,
            attrs: Vec4::ZERO,
            attrs2: Vec4::ZERO,
            object_id: 0,
        }
    }
}

impl Solid {
    /// A solid of the given catalogue primitive with default parameters.
    pub fn new(primitive: u32) -> Self {
        Self {
            primitive,
            ..Default::default()
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_blend(mut self, blend: f32) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn with_object(mut self, object_id: u32) -> Self {
        self.object_id = object_id;
        self
    }

    pub fn with_flags(mut self, flags: SolidFlags) -> Self {
        self.set_flags(flags);
        self
    }

    /// Flag bits stored in `attrs.w`.
    #[inline]
    pub fn flags(&self) -> SolidFlags {
        SolidFlags(self.attrs.w.max(0.0) as u32)
    }

    #[inline]
    pub fn set_flags(&mut self, flags: SolidFlags) {
        self.attrs.w = flags.0 as f32;
    }

    /// Blend value as seen by the distance field.
    #[inline]
    pub fn field_blend(&self, global_blend: f32) -> f32 {
        self.blend * BLEND_UNIT * global_blend
    }

    /// Radius of a sphere enclosing the primitive (unit primitives fit in a unit cube).
    #[inline]
    pub fn bounding_radius(&self) -> f32 {
        self.scale.abs().length() * 3.0_f32.sqrt()
    }

    /// GPU layout of this solid.
    pub fn to_gpu(&self, global_blend: f32) -> GpuSolid {
        GpuSolid {
            position: self.position.to_array(),
            blend: self.field_blend(global_blend),
            rotation: self.rotation.to_array(),
            scale: self.scale.to_array(),
            primitive: self.primitive,
            color: self.color.to_array(),
            _pad0: 0,
            attrs: self.attrs.to_array(),
            attrs2: self.attrs2.to_array(),
        }
    }
}

/// GPU-side solid matching `Solid` in clay_common.wgsl.
///
/// Layout (96 bytes):
/// - position: vec3<f32> + blend: f32          (16 bytes)
/// - rotation: vec4<f32> (x, y, z, w)          (16 bytes)
/// - scale: vec3<f32> + primitive: u32         (16 bytes)
/// - color: vec3<f32> + _pad0: u32             (16 bytes)
/// - attrs: vec4<f32> (w = flag bits)          (16 bytes)
/// - attrs2: vec4<f32>                         (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSolid {
    pub position: [f32; 3],
    pub blend: f32,
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub primitive: u32,
    pub color: [f32; 3],
    pub _pad0: u32,
    pub attrs: [f32; 4],
    pub attrs2: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<GpuSolid>() == 96);

/// Influence sphere used by chunk filtering and dirty-chunk detection.
///
/// Layout (16 bytes): center: vec3<f32> + radius: f32
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SolidBounds {
    pub center: [f32; 3],
    pub radius: f32,
}

const _: () = assert!(std::mem::size_of::<SolidBounds>() == 16);

impl SolidBounds {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center: center.to_array(),
            radius,
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        Vec3::from_array(self.center)
    }

    /// Smallest sphere containing both spheres.
    pub fn union(&self, other: &SolidBounds) -> SolidBounds {
        let a = self.center();
        let b = other.center();
        let dist = a.distance(b);
        if dist + other.radius <= self.radius {
            return *self;
        }
        if dist + self.radius <= other.radius {
            return *other;
        }
        let radius = (dist + self.radius + other.radius) * 0.5;
        let dir = (b - a) / dist;
        let center = a + dir * (radius - self.radius);
        SolidBounds::new(center, radius)
    }

    /// Sphere / axis-aligned box overlap (closest point test).
    #[inline]
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        let c = self.center();
        let closest = c.clamp(min, max);
        closest.distance_squared(c) <= self.radius * self.radius
    }
}

/// Influence spheres for an ordered solid list.
///
/// A solid's sphere covers its bounding radius plus its blend distance. Mirrored
/// solids cover both copies, and every member of a group gets the sphere
/// enclosing the whole group so filtering keeps or drops groups as a unit.
pub fn influence_spheres(solids: &[Solid], global_blend: f32) -> Vec<SolidBounds> {
    let mut spheres: Vec<SolidBounds> = solids
        .iter()
        .map(|solid| {
            let radius = solid.bounding_radius() + solid.field_blend(global_blend).abs();
            let own = SolidBounds::new(solid.position, radius);
            if solid.flags().contains(SolidFlags::MIRROR_X) {
                let mirrored = solid.position * Vec3::new(-1.0, 1.0, 1.0);
                own.union(&SolidBounds::new(mirrored, radius))
            } else {
                own
            }
        })
        .collect();

    for (start, end) in group_ranges(solids) {
        let mut merged = spheres[start];
        for sphere in &spheres[start + 1..=end] {
            merged = merged.union(sphere);
        }
        for sphere in &mut spheres[start..=end] {
            *sphere = merged;
        }
    }
    spheres
}

/// Inclusive index ranges of closed groups (one level deep).
///
/// A begin inside an open group is an ordinary member; an end without an open
/// group is ignored; an unterminated group runs to the last solid.
pub fn group_ranges(solids: &[Solid]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    for (i, solid) in solids.iter().enumerate() {
        let flags = solid.flags();
        match open {
            None if flags.contains(SolidFlags::GROUP_BEGIN) => {
                if flags.contains(SolidFlags::GROUP_END) {
                    ranges.push((i, i));
                } else {
                    open = Some(i);
                }
            }
            Some(start) if flags.contains(SolidFlags::GROUP_END) => {
                ranges.push((start, i));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        if !solids.is_empty() {
            ranges.push((start, solids.len() - 1));
        }
    }
    ranges
}

//! CPU reference distance field.
//!
//! Used by the CPU backend, the skin projection pass and tests. The WGSL kernels
//! implement the same functions in clay_field.wgsl.

pub mod combine;
pub mod primitives;

pub use combine::{FIELD_FAR, FieldSample, evaluate, flagged_distance};
pub use primitives::{
    PRIM_CAPSULE, PRIM_CUBE, PRIM_CYLINDER, PRIM_SPHERE, PRIM_TORUS, solid_distance,
    unit_distance,
};

//! Solids: descriptors, the per-container registry and the primitive catalogue.

pub mod catalogue;
pub mod registry;
pub mod types;

pub use catalogue::{BUILTIN_CATALOGUE, Catalogue, PrimitiveParam, PrimitiveType};
pub use registry::{DirtySolids, SolidRegistry};
pub use types::{
    BLEND_UNIT, GpuSolid, NO_SOLID, Solid, SolidBounds, SolidFlags, SolidId, group_ranges,
    influence_spheres,
};

//! Shader Loading
//!
//! The clay kernels are assembled from shared WGSL pieces at startup: the common
//! declarations, the field (distance functions and combination rules) and the
//! grid sampler are composed in front of each kernel that needs them. Sources are
//! embedded by default and can be reloaded from disk while iterating on them.

use std::path::Path;

/// Shader source that can be either embedded at compile time or loaded at runtime.
pub enum ShaderSource {
    /// Embedded shader source (no file I/O at runtime)
    Embedded(&'static str),
    /// Runtime-loaded or composed shader source
    Runtime(String),
}

impl ShaderSource {
    /// Get the shader source as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            ShaderSource::Embedded(s) => s,
            ShaderSource::Runtime(s) => s.as_str(),
        }
    }
}

/// Load a shader from the filesystem at runtime.
pub fn load_shader_file(path: impl AsRef<Path>) -> Result<ShaderSource, std::io::Error> {
    let source = std::fs::read_to_string(path)?;
    Ok(ShaderSource::Runtime(source))
}

/// Create a wgpu shader module from the given source.
pub fn create_shader_module(device: &wgpu::Device, label: &str, source: &ShaderSource) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
    })
}

/// Concatenate shader pieces, in order, into one module source.
pub fn compose(parts: &[&ShaderSource]) -> ShaderSource {
    let mut out = String::new();
    for part in parts {
        out.push_str(part.as_str());
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    ShaderSource::Runtime(out)
}

/// Shader file paths relative to the crate root.
pub mod paths {
    pub const COMMON: &str = "engine/shaders/clay_common.wgsl";
    pub const FIELD: &str = "engine/shaders/clay_field.wgsl";
    pub const GRID: &str = "engine/shaders/clay_grid.wgsl";
}

/// Embedded shaders that are compiled into the binary.
pub mod embedded {
    pub const COMMON: &str = include_str!("../../shaders/clay_common.wgsl");
    pub const FIELD: &str = include_str!("../../shaders/clay_field.wgsl");
    pub const GRID: &str = include_str!("../../shaders/clay_grid.wgsl");

    pub const CHUNK_FILTER: &str = include_str!("../../shaders/chunk_filter.wgsl");
    pub const GRID_COARSE: &str = include_str!("../../shaders/grid_coarse.wgsl");
    pub const GRID_PREPARE: &str = include_str!("../../shaders/grid_prepare.wgsl");
    pub const GRID_FINE: &str = include_str!("../../shaders/grid_fine.wgsl");
    pub const EXTRACT_POINTS: &str = include_str!("../../shaders/extract_points.wgsl");
    pub const EXTRACT_VOXELS: &str = include_str!("../../shaders/extract_voxels.wgsl");
    pub const EXTRACT_MESH: &str = include_str!("../../shaders/extract_mesh.wgsl");
    pub const SURFACE_FINALIZE: &str = include_str!("../../shaders/surface_finalize.wgsl");
    pub const SURFACE_COMMIT: &str = include_str!("../../shaders/surface_commit.wgsl");
    pub const SURFACE_SEAL: &str = include_str!("../../shaders/surface_seal.wgsl");
}

/// Compute kernels of one chunk evaluation, in dispatch order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    ChunkFilter,
    GridCoarse,
    GridPrepare,
    GridFine,
    ExtractPoints,
    ExtractVoxels,
    ExtractMesh,
    SurfaceFinalize,
    SurfaceCommit,
    SurfaceSeal,
}

impl Kernel {
    pub const ALL: [Kernel; 10] = [
        Kernel::ChunkFilter,
        Kernel::GridCoarse,
        Kernel::GridPrepare,
        Kernel::GridFine,
        Kernel::ExtractPoints,
        Kernel::ExtractVoxels,
        Kernel::ExtractMesh,
        Kernel::SurfaceFinalize,
        Kernel::SurfaceCommit,
        Kernel::SurfaceSeal,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Kernel::ChunkFilter => "chunk_filter",
            Kernel::GridCoarse => "grid_coarse",
            Kernel::GridPrepare => "grid_prepare",
            Kernel::GridFine => "grid_fine",
            Kernel::ExtractPoints => "extract_points",
            Kernel::ExtractVoxels => "extract_voxels",
            Kernel::ExtractMesh => "extract_mesh",
            Kernel::SurfaceFinalize => "surface_finalize",
            Kernel::SurfaceCommit => "surface_commit",
            Kernel::SurfaceSeal => "surface_seal",
        }
    }

    fn body(self) -> &'static str {
        match self {
            Kernel::ChunkFilter => embedded::CHUNK_FILTER,
            Kernel::GridCoarse => embedded::GRID_COARSE,
            Kernel::GridPrepare => embedded::GRID_PREPARE,
            Kernel::GridFine => embedded::GRID_FINE,
            Kernel::ExtractPoints => embedded::EXTRACT_POINTS,
            Kernel::ExtractVoxels => embedded::EXTRACT_VOXELS,
            Kernel::ExtractMesh => embedded::EXTRACT_MESH,
            Kernel::SurfaceFinalize => embedded::SURFACE_FINALIZE,
            Kernel::SurfaceCommit => embedded::SURFACE_COMMIT,
            Kernel::SurfaceSeal => embedded::SURFACE_SEAL,
        }
    }

    fn uses_field(self) -> bool {
        matches!(self, Kernel::GridCoarse | Kernel::GridFine)
    }

    fn uses_grid(self) -> bool {
        matches!(self, Kernel::ExtractPoints | Kernel::ExtractVoxels | Kernel::ExtractMesh)
    }

    /// Full module source of the kernel, composed from the embedded pieces.
    pub fn source(self) -> ShaderSource {
        self.source_with(&ShaderLibrary::embedded())
    }

    /// Full module source of the kernel with the shared pieces taken from `library`.
    pub fn source_with(self, library: &ShaderLibrary) -> ShaderSource {
        let body = ShaderSource::Embedded(self.body());
        let mut parts = vec![&library.common];
        if self.uses_field() {
            parts.push(&library.field);
        }
        if self.uses_grid() {
            parts.push(&library.grid);
        }
        parts.push(&body);
        compose(&parts)
    }
}

/// The shared WGSL pieces kernels are composed from.
pub struct ShaderLibrary {
    pub common: ShaderSource,
    pub field: ShaderSource,
    pub grid: ShaderSource,
}

impl ShaderLibrary {
    pub fn embedded() -> Self {
        Self {
            common: ShaderSource::Embedded(embedded::COMMON),
            field: ShaderSource::Embedded(embedded::FIELD),
            grid: ShaderSource::Embedded(embedded::GRID),
        }
    }

    /// Load the shared pieces from `root` (the crate directory).
    pub fn load(root: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let root = root.as_ref();
        Ok(Self {
            common: load_shader_file(root.join(paths::COMMON))?,
            field: load_shader_file(root.join(paths::FIELD))?,
            grid: load_shader_file(root.join(paths::GRID))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_source_variants() {
        let source = ShaderSource::Embedded("fn main() {}");
        assert_eq!(source.as_str(), "fn main() {}");
        let source = ShaderSource::Runtime("fn main() {}".to_string());
        assert_eq!(source.as_str(), "fn main() {}");
    }

    #[test]
    fn test_compose_keeps_order_and_line_breaks() {
        let a = ShaderSource::Embedded("const A: u32 = 1u;");
        let b = ShaderSource::Runtime("const B: u32 = 2u;\n".to_string());
        let composed = compose(&[&a, &b]);
        assert_eq!(composed.as_str(), "const A: u32 = 1u;\nconst B: u32 = 2u;\n");
    }

    #[test]
    fn test_kernels_pull_in_what_they_need() {
        let coarse = Kernel::GridCoarse.source();
        assert!(coarse.as_str().contains("fn eval_field"));
        assert!(!coarse.as_str().contains("fn sample_node"));

        let mesh = Kernel::ExtractMesh.source();
        assert!(mesh.as_str().contains("fn sample_node"));
        assert!(!mesh.as_str().contains("fn eval_field"));

        for kernel in Kernel::ALL {
            assert!(kernel.source().as_str().contains("struct ChunkRecord"), "{}", kernel.label());
        }
    }
}

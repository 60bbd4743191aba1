//! Compute Pipelines
//!
//! One compute pipeline per clay kernel, each with an explicit bind group layout
//! matching its WGSL `@group(0)` declarations. Everything is created once per
//! device; the per-chunk bind groups are built in `dispatch`.

use super::shaders::{Kernel, ShaderLibrary, create_shader_module};

/// Binding kinds of a kernel's group 0, in binding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Uniform,
    Storage { read_only: bool },
}

const U: Slot = Slot::Uniform;
const RO: Slot = Slot::Storage { read_only: true };
const RW: Slot = Slot::Storage { read_only: false };

impl Kernel {
    /// Bind group layout of the kernel (must match the shader).
    pub fn slots(self) -> &'static [Slot] {
        match self {
            // params, bounds, filtered, counters
            Kernel::ChunkFilter => &[U, RO, RW, RW],
            // params, solids, filtered, counters, coarse, active
            Kernel::GridCoarse => &[U, RO, RO, RW, RW, RW],
            // counters, dispatch args
            Kernel::GridPrepare => &[RO, RW],
            // params, solids, filtered, counters, active, fine
            Kernel::GridFine => &[U, RO, RO, RO, RO, RW],
            // params, counters, coarse, fine, active, scratch A
            Kernel::ExtractPoints => &[U, RW, RO, RO, RO, RW],
            // params, counters, coarse, fine, active, scratch A, B, C
            Kernel::ExtractVoxels => &[U, RW, RO, RO, RO, RW, RW, RW],
            // params, counters, coarse, fine, active, tri table, scratch A, B
            Kernel::ExtractMesh => &[U, RW, RO, RO, RO, RO, RW, RW],
            // params, counters, records, dispatch args
            Kernel::SurfaceFinalize => &[U, RW, RW, RW],
            // params, stream, counters, records, scratch, region
            Kernel::SurfaceCommit => &[U, U, RO, RO, RO, RW],
            // seal params, records, draw args
            Kernel::SurfaceSeal => &[U, RO, RW],
        }
    }
}

fn layout_entries(slots: &[Slot]) -> Vec<wgpu::BindGroupLayoutEntry> {
    slots
        .iter()
        .enumerate()
        .map(|(binding, slot)| wgpu::BindGroupLayoutEntry {
            binding: binding as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: match *slot {
                    Slot::Uniform => wgpu::BufferBindingType::Uniform,
                    Slot::Storage { read_only } => wgpu::BufferBindingType::Storage { read_only },
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect()
}

/// Pipeline and bind group layout of one kernel.
pub struct KernelPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

/// All compute pipelines of the clay engine.
pub struct ClayPipelines {
    kernels: Vec<KernelPipeline>,
}

impl ClayPipelines {
    /// Create every pipeline from the embedded shaders.
    pub fn new(device: &wgpu::Device) -> Self {
        Self::with_library(device, &ShaderLibrary::embedded())
    }

    pub fn with_library(device: &wgpu::Device, library: &ShaderLibrary) -> Self {
        let kernels = Kernel::ALL
            .iter()
            .map(|&kernel| Self::create(device, library, kernel))
            .collect();
        log::debug!("[ClayPipelines] created {} compute pipelines", Kernel::ALL.len());
        Self { kernels }
    }

    fn create(device: &wgpu::Device, library: &ShaderLibrary, kernel: Kernel) -> KernelPipeline {
        let label = kernel.label();
        let module = create_shader_module(device, &format!("{}_shader", label), &kernel.source_with(library));

        let entries = layout_entries(kernel.slots());
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{}_bind_group_layout", label)),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{}_pipeline_layout", label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("{}_pipeline", label)),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        KernelPipeline {
            pipeline,
            bind_group_layout,
        }
    }

    pub fn get(&self, kernel: Kernel) -> &KernelPipeline {
        &self.kernels[kernel as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_order_matches_storage_index() {
        for (i, kernel) in Kernel::ALL.iter().enumerate() {
            assert_eq!(*kernel as usize, i);
        }
    }

    #[test]
    fn test_slots_match_shader_bindings() {
        for kernel in Kernel::ALL {
            let source = kernel.source();
            let declared = source.as_str().matches("@binding(").count();
            assert_eq!(declared, kernel.slots().len(), "{}", kernel.label());
            let uniforms = source.as_str().matches("var<uniform>").count();
            let expected = kernel.slots().iter().filter(|s| **s == Slot::Uniform).count();
            assert_eq!(uniforms, expected, "{}", kernel.label());
        }
    }

    #[test]
    fn test_layout_entries_are_compute_buffers() {
        let entries = layout_entries(Kernel::SurfaceCommit.slots());
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[5].binding, 5);
        assert!(matches!(
            entries[5].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                ..
            }
        ));
    }
}

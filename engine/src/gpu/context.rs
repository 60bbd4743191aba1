//! GPU Context
//!
//! Headless device and queue for the clay kernels. The engine never presents
//! anything, so no surface is requested; the host's renderer binds the output
//! buffers on the same device if it wants to draw them.

use crate::error::{EngineError, EngineResult};

/// Shared GPU resources
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

/// Configuration for GPU context creation
#[derive(Clone, Debug)]
pub struct GpuContextConfig {
    /// Prefer high-performance GPU
    pub high_performance: bool,
    /// Accept a software adapter
    pub allow_fallback: bool,
}

impl Default for GpuContextConfig {
    fn default() -> Self {
        Self {
            high_performance: true,
            allow_fallback: false,
        }
    }
}

impl GpuContext {
    /// Create a headless context. Fails with [`EngineError::GpuUnavailable`] when
    /// no adapter or device can be obtained.
    pub fn new(config: GpuContextConfig) -> EngineResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: if config.high_performance {
                wgpu::PowerPreference::HighPerformance
            } else {
                wgpu::PowerPreference::LowPower
            },
            compatible_surface: None,
            force_fallback_adapter: config.allow_fallback,
        }))
        .map_err(|e| EngineError::GpuUnavailable(format!("no adapter: {}", e)))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "[GpuContext] adapter: {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );

        // Surface streams can be large; take whatever storage limits the adapter offers
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Clay Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| EngineError::GpuUnavailable(format!("device request failed: {}", e)))?;

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    /// Largest storage binding the device accepts, in bytes.
    pub fn max_storage_binding(&self) -> u64 {
        u64::from(self.device.limits().max_storage_buffer_binding_size)
    }
}

/// Create a storage buffer of at least `size` bytes (zero-sized bindings are invalid).
pub fn create_storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    extra_usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: padded_size(size),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST
            | extra_usage,
        mapped_at_creation: false,
    })
}

/// Create a storage buffer initialized with `contents`.
pub fn create_storage_buffer_init(
    device: &wgpu::Device,
    label: &str,
    contents: &[u8],
    extra_usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    if contents.is_empty() {
        return create_storage_buffer(device, label, 0, extra_usage);
    }
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST
            | extra_usage,
    })
}

/// Create a uniform buffer initialized with `contents`.
pub fn create_uniform_buffer(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

/// Buffer sizes are rounded up to 16 bytes, never zero.
pub fn padded_size(size: u64) -> u64 {
    size.max(16).div_ceil(16) * 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 16);
        assert_eq!(padded_size(4), 16);
        assert_eq!(padded_size(16), 16);
        assert_eq!(padded_size(20), 32);
        assert_eq!(padded_size(48 * 27), 1296);
    }

    #[test]
    fn test_default_config_prefers_hardware() {
        let config = GpuContextConfig::default();
        assert!(config.high_performance);
        assert!(!config.allow_fallback);
    }
}

//! Read-back
//!
//! Blocking copies of device buffers to the host, and the non-blocking chunk
//! status read that follows every evaluation.

use std::sync::{Arc, OnceLock};

use crate::chunk::ChunkRecord;
use crate::error::{EngineError, EngineResult};

fn staging_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: super::context::padded_size(size),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Wait until every submitted command has finished.
pub fn wait_idle(device: &wgpu::Device) -> EngineResult<()> {
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map(|_| ())
        .map_err(|e| EngineError::BufferMap(format!("device poll failed: {}", e)))
}

/// Copy `size` bytes from the start of each source buffer and wait for them.
/// Returns one word vector per source.
pub fn read_buffers(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    sources: &[(&wgpu::Buffer, u64)],
) -> EngineResult<Vec<Vec<u32>>> {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("clay_readback_encoder"),
    });
    let staging: Vec<Option<wgpu::Buffer>> = sources
        .iter()
        .map(|&(buffer, size)| {
            (size > 0).then(|| {
                let staging = staging_buffer(device, "clay_readback_staging", size);
                encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
                staging
            })
        })
        .collect();
    queue.submit(Some(encoder.finish()));

    let (tx, rx) = std::sync::mpsc::channel();
    for (i, buffer) in staging.iter().enumerate() {
        if let Some(buffer) = buffer {
            let tx = tx.clone();
            buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send((i, result));
            });
        }
    }
    drop(tx);
    wait_idle(device)?;

    for (i, result) in rx.try_iter() {
        result.map_err(|e| EngineError::BufferMap(format!("read-back {} failed: {}", i, e)))?;
    }

    let mut out = Vec::with_capacity(sources.len());
    for (buffer, &(_, size)) in staging.iter().zip(sources) {
        let Some(buffer) = buffer else {
            out.push(Vec::new());
            continue;
        };
        let words = {
            let data = buffer.slice(..).get_mapped_range();
            bytemuck::cast_slice::<u8, u32>(&data[..size as usize]).to_vec()
        };
        buffer.unmap();
        out.push(words);
    }
    Ok(out)
}

/// Chunk table copy that is mapped once the device gets to it.
pub struct StatusReadback {
    buffer: wgpu::Buffer,
    size: u64,
    mapped: Arc<OnceLock<Result<(), wgpu::BufferAsyncError>>>,
}

impl StatusReadback {
    /// Record the copy of `records` into a fresh staging buffer.
    pub fn record(device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, records: &wgpu::Buffer, size: u64) -> Self {
        let buffer = staging_buffer(device, "clay_status_staging", size);
        encoder.copy_buffer_to_buffer(records, 0, &buffer, 0, size);
        Self {
            buffer,
            size,
            mapped: Arc::new(OnceLock::new()),
        }
    }

    /// Request the mapping. Call after the copy has been submitted.
    pub fn map(&self) {
        let mapped = Arc::clone(&self.mapped);
        self.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = mapped.set(result);
        });
    }

    /// The chunk records if the copy has landed, without blocking.
    pub fn try_take(&self, device: &wgpu::Device) -> EngineResult<Option<Vec<ChunkRecord>>> {
        device
            .poll(wgpu::PollType::Poll)
            .map_err(|e| EngineError::BufferMap(format!("device poll failed: {}", e)))?;
        match self.mapped.get() {
            None => Ok(None),
            Some(Err(e)) => Err(EngineError::BufferMap(format!("status read-back failed: {}", e))),
            Some(Ok(())) => {
                let records = {
                    let data = self.buffer.slice(..).get_mapped_range();
                    bytemuck::pod_collect_to_vec::<u8, ChunkRecord>(&data[..self.size as usize])
                };
                self.buffer.unmap();
                Ok(Some(records))
            }
        }
    }
}

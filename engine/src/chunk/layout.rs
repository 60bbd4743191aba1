//! Chunk Grid Layout
//!
//! A container's work volume is a cube centered on its origin, split into up to
//! 3 × 3 × 3 axis-aligned chunks of equal edge length. Chunks are numbered
//! x-fastest (`x + y * nx + z * nx * ny`) and always processed in that order.

use glam::{UVec3, Vec3};

use crate::config::MAX_CHUNKS_PER_AXIS;

/// Chunk grid dimensions and edge length.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkGrid {
    pub dims: [u32; 3],
    pub chunk_size: f32,
}

impl Default for ChunkGrid {
    fn default() -> Self {
        Self {
            dims: [1, 1, 1],
            chunk_size: 1.0,
        }
    }
}

impl ChunkGrid {
    /// Grid with each axis clamped to 1..=3 chunks.
    pub fn new(dims: [u32; 3], chunk_size: f32) -> Self {
        Self {
            dims: dims.map(|d| d.clamp(1, MAX_CHUNKS_PER_AXIS)),
            chunk_size: chunk_size.max(f32::MIN_POSITIVE),
        }
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    #[inline]
    pub fn index(&self, coords: UVec3) -> u32 {
        coords.x + coords.y * self.dims[0] + coords.z * self.dims[0] * self.dims[1]
    }

    #[inline]
    pub fn coords(&self, index: u32) -> UVec3 {
        let nx = self.dims[0];
        let ny = self.dims[1];
        UVec3::new(index % nx, (index / nx) % ny, index / (nx * ny))
    }

    /// Extent of the whole grid along each axis.
    pub fn extent(&self) -> Vec3 {
        Vec3::new(
            self.dims[0] as f32,
            self.dims[1] as f32,
            self.dims[2] as f32,
        ) * self.chunk_size
    }

    /// Center of a chunk in container space.
    pub fn center(&self, index: u32) -> Vec3 {
        let c = self.coords(index).as_vec3();
        let half_dims = (Vec3::new(
            self.dims[0] as f32,
            self.dims[1] as f32,
            self.dims[2] as f32,
        ) - Vec3::ONE)
            * 0.5;
        (c - half_dims) * self.chunk_size
    }

    /// (min, max) corners of a chunk in container space.
    pub fn aabb(&self, index: u32) -> (Vec3, Vec3) {
        let center = self.center(index);
        let half = Vec3::splat(self.chunk_size * 0.5);
        (center - half, center + half)
    }

    /// Chunk indices in evaluation order.
    pub fn indices(&self) -> std::ops::Range<u32> {
        0..self.count()
    }
}

/// Per-chunk record of the GPU chunk table, also the chunk bounding-box buffer
/// exposed to renderers.
///
/// Layout (48 bytes):
/// - center: vec3<f32> + size: f32              (16 bytes)
/// - counts: vec3<u32> + status: u32            (16 bytes) committed records per stream
/// - bases: vec3<u32> + solid_count: u32        (16 bytes) region start per stream, in records,
///   and the length of the chunk's filtered solid list
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ChunkRecord {
    pub center: [u32; 3],
    pub size: u32,
    pub counts: [u32; 3],
    pub status: u32,
    pub bases: [u32; 3],
    pub solid_count: u32,
}

const _: () = assert!(std::mem::size_of::<ChunkRecord>() == 48);

impl ChunkRecord {
    /// Record for a chunk with no committed data yet.
    pub fn new(center: Vec3, size: f32, bases: [u32; 3]) -> Self {
        Self {
            center: center.to_array().map(f32::to_bits),
            size: size.to_bits(),
            counts: [0; 3],
            status: 0,
            bases,
            solid_count: 0,
        }
    }

    pub fn center(&self) -> Vec3 {
        Vec3::from_array(self.center.map(f32::from_bits))
    }

    pub fn size(&self) -> f32 {
        f32::from_bits(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_coords_roundtrip() {
        let grid = ChunkGrid::new([3, 2, 3], 4.0);
        assert_eq!(grid.count(), 18);
        for i in grid.indices() {
            assert_eq!(grid.index(grid.coords(i)), i);
        }
        assert_eq!(grid.coords(1), UVec3::new(1, 0, 0));
        assert_eq!(grid.coords(3), UVec3::new(0, 1, 0));
    }

    #[test]
    fn test_dims_clamped() {
        let grid = ChunkGrid::new([0, 5, 2], 1.0);
        assert_eq!(grid.dims, [1, 3, 2]);
    }

    #[test]
    fn test_centers_are_symmetric() {
        let grid = ChunkGrid::new([3, 3, 3], 2.0);
        assert_eq!(grid.center(13), Vec3::ZERO);
        assert_eq!(grid.center(0), Vec3::splat(-2.0));
        assert_eq!(grid.center(26), Vec3::splat(2.0));

        let single = ChunkGrid::new([1, 1, 1], 8.0);
        let (min, max) = single.aabb(0);
        assert_eq!(min, Vec3::splat(-4.0));
        assert_eq!(max, Vec3::splat(4.0));

        let even = ChunkGrid::new([2, 1, 1], 8.0);
        assert_eq!(even.center(0), Vec3::new(-4.0, 0.0, 0.0));
        assert_eq!(even.center(1), Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn test_chunk_record_layout() {
        let rec = ChunkRecord::new(Vec3::new(1.0, -2.0, 3.0), 8.0, [0, 10, 20]);
        assert_eq!(rec.center(), Vec3::new(1.0, -2.0, 3.0));
        assert_eq!(rec.size(), 8.0);
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&rec));
        assert_eq!(words.len(), 12);
        assert_eq!(words[8], 0);
        assert_eq!(words[9], 10);
    }
}

//! Chunk Solid Filtering
//!
//! CPU version of chunk_filter.wgsl: for each chunk, the ordered ids of the solids
//! whose influence sphere overlaps the chunk box, capped at `max_solids_per_voxel`.
//! Also answers which chunks an edit touches, from the spheres before and after.

use std::collections::BTreeSet;

use super::layout::ChunkGrid;
use crate::solid::SolidBounds;

/// Ordered, capacity-bounded solid id list of one chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkSolidList {
    ids: Vec<u32>,
    capacity: u32,
    dropped: u32,
}

impl ChunkSolidList {
    pub fn new(capacity: u32) -> Self {
        Self {
            ids: Vec::with_capacity(capacity.min(1024) as usize),
            capacity,
            dropped: 0,
        }
    }

    /// Append an id; returns false (and counts the drop) when the list is full.
    pub fn add(&mut self, id: u32) -> bool {
        if self.ids.len() as u32 >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Solids that overlapped the chunk but did not fit.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// Filter the solids affecting one chunk, preserving solid order.
pub fn filter_chunk(grid: &ChunkGrid, chunk: u32, bounds: &[SolidBounds], capacity: u32) -> ChunkSolidList {
    let (min, max) = grid.aabb(chunk);
    let mut list = ChunkSolidList::new(capacity);
    for (id, sphere) in bounds.iter().enumerate() {
        if sphere.intersects_aabb(min, max) {
            // Keep counting drops after the list fills up
            list.add(id as u32);
        }
    }
    list
}

/// Chunks overlapped by any of the given spheres, ascending.
pub fn chunks_touched<'a>(
    grid: &ChunkGrid,
    spheres: impl IntoIterator<Item = &'a SolidBounds>,
) -> BTreeSet<u32> {
    let boxes: Vec<_> = grid.indices().map(|i| grid.aabb(i)).collect();
    let mut touched = BTreeSet::new();
    for sphere in spheres {
        for (i, (min, max)) in boxes.iter().enumerate() {
            if sphere.intersects_aabb(*min, *max) {
                touched.insert(i as u32);
            }
        }
    }
    touched
}

/// Chunks that must be re-evaluated after the listed solids changed: every chunk
/// their previous or current sphere overlaps.
pub fn dirty_chunks(grid: &ChunkGrid, previous: &[SolidBounds], current: &[SolidBounds], dirty_ids: &[u32]) -> BTreeSet<u32> {
    let spheres = dirty_ids.iter().flat_map(|&id| {
        previous
            .get(id as usize)
            .into_iter()
            .chain(current.get(id as usize))
    });
    chunks_touched(grid, spheres)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_list_capacity() {
        let mut list = ChunkSolidList::new(2);
        assert!(list.add(4));
        assert!(list.add(7));
        assert!(!list.add(9));
        assert_eq!(list.ids(), &[4, 7]);
        assert_eq!(list.dropped(), 1);
    }

    #[test]
    fn test_filter_keeps_order_and_skips_far_solids() {
        let grid = ChunkGrid::new([2, 1, 1], 4.0);
        let bounds = [
            SolidBounds::new(Vec3::new(2.0, 0.0, 0.0), 0.5),
            SolidBounds::new(Vec3::new(-2.0, 0.0, 0.0), 0.5),
            SolidBounds::new(Vec3::new(0.0, 0.0, 0.0), 0.5),
            SolidBounds::new(Vec3::new(50.0, 0.0, 0.0), 0.5),
        ];
        let left = filter_chunk(&grid, 0, &bounds, 8);
        let right = filter_chunk(&grid, 1, &bounds, 8);
        assert_eq!(left.ids(), &[1, 2]);
        assert_eq!(right.ids(), &[0, 2]);
    }

    #[test]
    fn test_filter_never_exceeds_capacity() {
        let grid = ChunkGrid::new([1, 1, 1], 4.0);
        let bounds: Vec<_> = (0..50).map(|_| SolidBounds::new(Vec3::ZERO, 1.0)).collect();
        let list = filter_chunk(&grid, 0, &bounds, 16);
        assert_eq!(list.len(), 16);
        assert_eq!(list.dropped(), 34);
    }

    #[test]
    fn test_dirty_chunks_cover_old_and_new_position() {
        let grid = ChunkGrid::new([3, 1, 1], 4.0);
        let previous = [SolidBounds::new(Vec3::new(-4.0, 0.0, 0.0), 0.5)];
        let current = [SolidBounds::new(Vec3::new(4.0, 0.0, 0.0), 0.5)];
        let dirty = dirty_chunks(&grid, &previous, &current, &[0]);
        assert_eq!(dirty.into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }
}

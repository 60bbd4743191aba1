//! Memory Arena Manager
//!
//! A container's surface streams are in one of three placements:
//!
//! - `Expanded`: own buffers with a full-capacity region per chunk, required
//!   while the container is being evaluated or edited
//! - `Trimmed`: own buffers holding exactly the committed records, packed
//!   contiguously; cannot be evaluated into
//! - `Shared`: full-capacity regions inside the scene's shared sparse-voxel
//!   arena, borrowed by at most one container at a time
//!
//! For the sparse-voxel strategy at most one container scene-wide is expanded
//! (tracked as `last_active`). Expanding another one, or lending the shared
//! arena to another borrower, first trims the previous holder. Trimming waits
//! for the device: it reads the chunk table back to learn the exact counts.

use crate::backend::ComputeBackend;
use crate::chunk::ChunkRecord;
use crate::config::{EngineLimits, GridResolution};
use crate::container::{Container, ContainerId};
use crate::error::EngineResult;
use crate::extract::Strategy;

/// Where a container's surface streams live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Placement {
    Expanded,
    #[default]
    Trimmed,
    Shared,
}

/// Sizes of a container's surface streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub strategy: Strategy,
    pub placement: Placement,
    pub chunk_count: u32,
    /// Region capacity per chunk, in records (zero when trimmed)
    pub chunk_capacity: [u32; 3],
    /// Allocated records per stream
    pub stream_len: [u32; 3],
    pub record_words: [u32; 3],
}

impl SurfaceLayout {
    /// Trimmed layout with nothing committed.
    pub fn empty(strategy: Strategy, chunk_count: u32) -> Self {
        Self {
            strategy,
            placement: Placement::Trimmed,
            chunk_count,
            chunk_capacity: [0; 3],
            stream_len: [0; 3],
            record_words: strategy.record_words(),
        }
    }

    /// Full-capacity layout (`Expanded` or `Shared`).
    pub fn expanded(
        strategy: Strategy,
        limits: &EngineLimits,
        res: GridResolution,
        chunk_count: u32,
        placement: Placement,
    ) -> Self {
        let record_words = strategy.record_words();
        let mut chunk_capacity = strategy.chunk_capacity(limits, res, chunk_count);
        for (cap, words) in chunk_capacity.iter_mut().zip(record_words) {
            if words == 0 {
                *cap = 0;
            }
        }
        Self {
            strategy,
            placement,
            chunk_count,
            chunk_capacity,
            stream_len: chunk_capacity.map(|c| c * chunk_count),
            record_words,
        }
    }

    /// Whether chunks can be evaluated into this layout.
    pub fn is_evaluable(&self) -> bool {
        self.placement != Placement::Trimmed
    }

    /// Words allocated for a stream.
    pub fn stream_words(&self, stream: usize) -> u64 {
        self.stream_len[stream] as u64 * self.record_words[stream] as u64
    }

    pub fn total_words(&self) -> u64 {
        (0..3).map(|s| self.stream_words(s)).sum()
    }

    /// Region starts of each chunk in a full-capacity layout.
    pub fn expanded_bases(&self) -> Vec<[u32; 3]> {
        (0..self.chunk_count)
            .map(|chunk| self.chunk_capacity.map(|cap| chunk * cap))
            .collect()
    }

    /// Exact-size layout for the committed counts in `records`, with the
    /// regions packed in chunk order.
    pub fn trimmed_from(&self, records: &[ChunkRecord]) -> (SurfaceLayout, Vec<[u32; 3]>) {
        let mut next = [0u32; 3];
        let bases = records
            .iter()
            .map(|record| {
                let base = next;
                for s in 0..3 {
                    next[s] += record.counts[s];
                }
                base
            })
            .collect();
        let layout = SurfaceLayout {
            placement: Placement::Trimmed,
            chunk_capacity: [0; 3],
            stream_len: next,
            ..*self
        };
        (layout, bases)
    }
}

/// One committed region to copy during a relayout, in records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionMove {
    pub stream: usize,
    pub from: u32,
    pub to: u32,
    pub count: u32,
}

/// Copies that move every committed region from its current base to `new_bases`.
pub fn plan_moves(records: &[ChunkRecord], new_bases: &[[u32; 3]], record_words: [u32; 3]) -> Vec<RegionMove> {
    let mut moves = Vec::new();
    for (record, bases) in records.iter().zip(new_bases) {
        for stream in 0..3 {
            if record.counts[stream] == 0 || record_words[stream] == 0 {
                continue;
            }
            moves.push(RegionMove {
                stream,
                from: record.bases[stream],
                to: bases[stream],
                count: record.counts[stream],
            });
        }
    }
    moves
}

/// What has to happen before a container can be evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArenaPlan {
    Ready,
    /// Expand into own buffers, after trimming `displace`
    Expand { displace: Option<ContainerId> },
    /// Borrow the shared arena, after trimming its current borrower
    Borrow { displace: Option<ContainerId> },
}

/// Owns the placement policy and the scene-wide shared resources.
#[derive(Debug)]
pub struct ArenaManager {
    limits: EngineLimits,
    res: GridResolution,
    live: u32,
    last_active: Option<ContainerId>,
    borrower: Option<ContainerId>,
}

impl ArenaManager {
    pub fn new(limits: EngineLimits, res: GridResolution) -> Self {
        Self {
            limits,
            res,
            live: 0,
            last_active: None,
            borrower: None,
        }
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: EngineLimits) {
        self.limits = limits;
    }

    pub fn resolution(&self) -> GridResolution {
        self.res
    }

    /// Sparse-voxel container currently holding expanded buffers.
    pub fn last_active(&self) -> Option<ContainerId> {
        self.last_active
    }

    /// Container currently borrowing the shared arena.
    pub fn borrower(&self) -> Option<ContainerId> {
        self.borrower
    }

    pub fn live_containers(&self) -> u32 {
        self.live
    }

    /// Register a new container; the first one creates the shared resources.
    pub fn acquire<B: ComputeBackend>(&mut self, backend: &mut B) -> EngineResult<()> {
        if self.live == 0 {
            backend.init_shared(self.res, &self.limits)?;
            log::info!(
                "[Arena] shared resources created ({} backend, grid {}/{})",
                backend.name(),
                self.res.fine,
                self.res.coarse
            );
        }
        self.live += 1;
        Ok(())
    }

    /// Unregister a container; the last one releases the shared resources.
    pub fn release<B: ComputeBackend>(&mut self, backend: &mut B, id: ContainerId) {
        self.forget(id);
        self.live = self.live.saturating_sub(1);
        if self.live == 0 {
            backend.release_shared();
            log::info!("[Arena] shared resources released");
        }
    }

    /// Drop any holder role of `id` (its surface was destroyed or reallocated).
    pub fn forget(&mut self, id: ContainerId) {
        if self.last_active == Some(id) {
            self.last_active = None;
        }
        if self.borrower == Some(id) {
            self.borrower = None;
        }
    }

    fn full_layout(&self, container: &Container, placement: Placement) -> SurfaceLayout {
        SurfaceLayout::expanded(
            container.options.strategy,
            &self.limits,
            self.res,
            container.grid.count(),
            placement,
        )
    }

    /// Steps needed before `container` can be evaluated.
    pub fn plan_evaluation(&self, container: &Container) -> ArenaPlan {
        let id = container.id;
        match container.layout.placement {
            Placement::Expanded => ArenaPlan::Ready,
            Placement::Shared if self.borrower == Some(id) => ArenaPlan::Ready,
            _ if container.options.strategy != Strategy::SparseVoxel => ArenaPlan::Expand { displace: None },
            _ if container.options.interactive => ArenaPlan::Expand {
                displace: self.last_active.filter(|&c| c != id),
            },
            _ => ArenaPlan::Borrow {
                displace: self.borrower.filter(|&c| c != id),
            },
        }
    }

    /// Steps needed before `container` can be edited (always own expanded buffers).
    pub fn plan_edit(&self, container: &Container) -> ArenaPlan {
        let id = container.id;
        if container.layout.placement == Placement::Expanded {
            return ArenaPlan::Ready;
        }
        let displace = if container.options.strategy == Strategy::SparseVoxel {
            self.last_active.filter(|&c| c != id)
        } else {
            None
        };
        ArenaPlan::Expand { displace }
    }

    /// Give `container` its own full-capacity buffers, keeping committed data.
    ///
    /// For the sparse-voxel strategy the previous expanded holder must already
    /// be trimmed (see [`ArenaManager::plan_edit`]).
    pub fn expand<B: ComputeBackend>(&mut self, backend: &mut B, container: &mut Container) -> EngineResult<()> {
        if container.layout.placement == Placement::Expanded {
            return Ok(());
        }
        let layout = self.full_layout(container, Placement::Expanded);
        backend.relayout(container.surface, &layout, &layout.expanded_bases())?;
        if self.borrower == Some(container.id) {
            self.borrower = None;
        }
        if layout.strategy == Strategy::SparseVoxel {
            self.last_active = Some(container.id);
        }
        log::debug!(
            "[Arena] expanded {:?}: {} words",
            container.id,
            layout.total_words()
        );
        container.layout = layout;
        Ok(())
    }

    /// Shrink `container` to its exact committed size. Blocks on a read-back.
    /// Idempotent for a container that is already trimmed.
    pub fn trim<B: ComputeBackend>(&mut self, backend: &mut B, container: &mut Container) -> EngineResult<()> {
        if container.layout.placement == Placement::Trimmed {
            return Ok(());
        }
        let records = backend.read_chunk_records(container.surface)?;
        let (layout, bases) = container.layout.trimmed_from(&records);
        backend.relayout(container.surface, &layout, &bases)?;
        log::debug!(
            "[Arena] trimmed {:?}: {} -> {} words",
            container.id,
            container.layout.total_words(),
            layout.total_words()
        );
        self.forget(container.id);
        container.layout = layout;
        Ok(())
    }

    /// Move `container` into the shared arena. Its previous borrower must
    /// already be trimmed (see [`ArenaManager::plan_evaluation`]).
    pub fn switch_shared_arena<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        container: &mut Container,
    ) -> EngineResult<()> {
        if container.layout.placement == Placement::Shared && self.borrower == Some(container.id) {
            return Ok(());
        }
        let layout = self.full_layout(container, Placement::Shared);
        backend.relayout(container.surface, &layout, &layout.expanded_bases())?;
        if self.last_active == Some(container.id) {
            self.last_active = None;
        }
        self.borrower = Some(container.id);
        log::debug!("[Arena] {:?} borrows the shared arena", container.id);
        container.layout = layout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn record(counts: [u32; 3], bases: [u32; 3]) -> ChunkRecord {
        let mut r = ChunkRecord::new(Vec3::ZERO, 1.0, bases);
        r.counts = counts;
        r
    }

    #[test]
    fn test_expanded_layout() {
        let limits = EngineLimits::default();
        let res = GridResolution::new(32, 8);
        let layout = SurfaceLayout::expanded(Strategy::PointSplat, &limits, res, 4, Placement::Expanded);
        assert_eq!(layout.chunk_capacity, [limits.max_point_count / 4, 0, 0]);
        assert_eq!(layout.stream_len[0], limits.max_point_count / 4 * 4);
        assert_eq!(layout.expanded_bases()[3][0], 3 * layout.chunk_capacity[0]);
        assert!(layout.is_evaluable());
        assert!(!SurfaceLayout::empty(Strategy::Mesh, 1).is_evaluable());
    }

    #[test]
    fn test_trimmed_layout_packs_regions() {
        let limits = EngineLimits::default();
        let layout = SurfaceLayout::expanded(
            Strategy::SparseVoxel,
            &limits,
            GridResolution::new(32, 8),
            3,
            Placement::Expanded,
        );
        let records = [
            record([5, 64, 512], [0, 0, 0]),
            record([0, 0, 0], [100, 200, 512]),
            record([7, 128, 512], [200, 400, 1024]),
        ];
        let (trimmed, bases) = layout.trimmed_from(&records);
        assert_eq!(trimmed.placement, Placement::Trimmed);
        assert_eq!(trimmed.stream_len, [12, 192, 1024]);
        assert_eq!(bases, vec![[0, 0, 0], [5, 64, 512], [5, 64, 512]]);
        assert_eq!(trimmed.stream_words(0), 24);
    }

    #[test]
    fn test_plan_moves_skips_empty_regions() {
        let records = [record([5, 0, 0], [0, 0, 0]), record([0, 0, 0], [100, 0, 0]), record([2, 0, 0], [200, 0, 0])];
        let moves = plan_moves(&records, &[[0, 0, 0], [5, 0, 0], [5, 0, 0]], [2, 0, 0]);
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[1], RegionMove { stream: 0, from: 200, to: 5, count: 2 });
    }
}

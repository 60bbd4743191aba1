//! Chunk layout, per-chunk solid filtering and grid planning.

pub mod filter;
pub mod layout;
pub mod planner;

pub use filter::{ChunkSolidList, chunks_touched, dirty_chunks, filter_chunk};
pub use layout::{ChunkGrid, ChunkRecord};
pub use planner::{AutoBoundsState, ChunkPlanner, PlanChange};

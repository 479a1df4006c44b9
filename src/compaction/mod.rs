//! Compaction - merging SSTables down the level hierarchy.
//!
//! Compaction keeps every level within its size budget:
//! - The first over-budget level gives up one file per cycle
//! - That file is merged with the overlapping files of the next level
//! - Newest copy of each key wins; older copies are discarded
//! - Tombstones survive until nothing deeper can hold the key
//!
//! # Level sizing
//!
//! Level 0 holds flushed memtables and may overlap. Every deeper level
//! is disjoint and `level_size_multiplier` times larger than the one above.

mod background;
mod compactor;
mod merge_iterator;
mod picker;

pub use background::{CheckOutcome, CompactionManager, CompactionTotals};
pub use compactor::{CompactionOutput, CompactionStats, Compactor};
pub use merge_iterator::MergeIterator;
pub use picker::{CompactionStrategy, CompactionTask, Pick};

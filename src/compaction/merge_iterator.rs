//! Merge iterator for combining multiple sorted sources.
//!
//! The merge iterator maintains a min-heap over the current entry of every
//! source and yields one entry per distinct key, in key order. When several
//! sources hold the same key the newest copy wins: the highest timestamp,
//! then the lowest source rank (rank 0 is the newest source). All other
//! copies of the key are consumed and discarded.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::Entry;
use crate::Result;

/// A source entry waiting in the heap.
#[derive(Debug)]
struct HeapItem {
    entry: Entry,
    rank: usize,
}

impl HeapItem {
    /// Merge key: (key asc, timestamp desc, rank asc).
    fn merge_order(&self, other: &Self) -> Ordering {
        self.entry
            .key
            .cmp(&other.entry.key)
            .then_with(|| other.entry.value.timestamp().cmp(&self.entry.value.timestamp()))
            .then_with(|| self.rank.cmp(&other.rank))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.merge_order(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse to pop the smallest merge key.
        other.merge_order(self)
    }
}

/// K-way merge over sorted, per-source deduplicated entry streams.
pub struct MergeIterator<I> {
    /// Sources, indexed by rank.
    sources: Vec<I>,
    /// Current entry of every non-exhausted source.
    heap: BinaryHeap<HeapItem>,
    /// Entries pulled from all sources.
    entries_read: u64,
    /// Older copies discarded in favour of a newer one.
    superseded: u64,
    /// Set after a source error.
    failed: bool,
}

impl<I> MergeIterator<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    /// Create a merge over `sources`, newest first.
    pub fn new(sources: Vec<I>) -> Result<Self> {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            entries_read: 0,
            superseded: 0,
            failed: false,
        };
        for rank in 0..merge.sources.len() {
            merge.advance(rank)?;
        }
        Ok(merge)
    }

    /// Entries pulled from all sources so far.
    pub fn entries_read(&self) -> u64 {
        self.entries_read
    }

    /// Older copies discarded so far.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Pull the next entry of source `rank` into the heap.
    fn advance(&mut self, rank: usize) -> Result<()> {
        if let Some(next) = self.sources[rank].next() {
            let entry = next?;
            self.entries_read += 1;
            self.heap.push(HeapItem { entry, rank });
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        let winner = match self.heap.pop() {
            Some(item) => item,
            None => return Ok(None),
        };

        // Discard every other copy of the key.
        while let Some(top) = self.heap.peek() {
            if top.entry.key != winner.entry.key {
                break;
            }
            if let Some(loser) = self.heap.pop() {
                self.superseded += 1;
                self.advance(loser.rank)?;
            }
        }

        self.advance(winner.rank)?;
        Ok(Some(winner.entry))
    }
}

impl<I> Iterator for MergeIterator<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

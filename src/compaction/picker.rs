//! Compaction picker - decides which files to compact.
//!
//! Levels are scanned from the top. The first level whose total size
//! exceeds its budget is the only candidate in a cycle. One file is taken
//! from it (the oldest file on level 0, the first file by key elsewhere)
//! together with every file of the next level whose range overlaps it.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::catalog::{Catalog, SSTableMetadata};
use crate::options::Options;

/// A planned compaction of one file into the next level.
#[derive(Debug, Clone)]
pub struct CompactionTask {
    /// Level the candidate is taken from.
    pub level: usize,
    /// The file pushed down.
    pub candidate: SSTableMetadata,
    /// Next-level files overlapping the candidate, in key order.
    pub overlapping: Vec<SSTableMetadata>,
}

impl CompactionTask {
    /// Level receiving the output.
    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    /// Check if the candidate can be rewritten without a merge.
    pub fn is_trivial(&self) -> bool {
        self.overlapping.is_empty()
    }

    /// Every input file, candidate first.
    pub fn inputs(&self) -> Vec<SSTableMetadata> {
        let mut files = Vec::with_capacity(1 + self.overlapping.len());
        files.push(self.candidate.clone());
        files.extend(self.overlapping.iter().cloned());
        files
    }

    /// Number of input files.
    pub fn num_inputs(&self) -> usize {
        1 + self.overlapping.len()
    }

    /// Total input size in bytes.
    pub fn input_size(&self) -> u64 {
        self.candidate.file_size() + self.overlapping.iter().map(|f| f.file_size()).sum::<u64>()
    }

    /// Key range covered by all inputs.
    pub fn key_range(&self) -> (Bytes, Bytes) {
        let mut min = self.candidate.min_key().clone();
        let mut max = self.candidate.max_key().clone();
        for file in &self.overlapping {
            if file.min_key() < &min {
                min = file.min_key().clone();
            }
            if file.max_key() > &max {
                max = file.max_key().clone();
            }
        }
        (min, max)
    }
}

/// Outcome of a pick.
#[derive(Debug, Clone)]
pub enum Pick {
    /// No level exceeds its budget.
    Nothing,
    /// A level needs compaction, but its files or destination are busy.
    Blocked {
        /// The over-budget level.
        level: usize,
    },
    /// A compaction to run.
    Task(CompactionTask),
}

/// Size-tiered leveled compaction strategy.
#[derive(Debug, Clone)]
pub struct CompactionStrategy {
    options: Arc<Options>,
}

impl CompactionStrategy {
    /// Create a new strategy.
    pub fn new(options: Arc<Options>) -> Self {
        Self { options }
    }

    /// Check if `level` has outgrown its budget and can be pushed down.
    pub fn should_compact(&self, catalog: &Catalog, level: usize) -> bool {
        level < self.options.last_level()
            && catalog
                .level(level)
                .map_or(false, |l| l.exceeds_budget())
    }

    /// First level that should be compacted.
    pub fn level_to_compact(&self, catalog: &Catalog) -> Option<usize> {
        (0..self.options.last_level()).find(|&level| self.should_compact(catalog, level))
    }

    /// Files of `level` whose range intersects `file`'s.
    pub fn find_overlaps(
        &self,
        catalog: &Catalog,
        level: usize,
        file: &SSTableMetadata,
    ) -> Vec<SSTableMetadata> {
        catalog
            .level(level)
            .map(|l| {
                l.overlapping(file.min_key(), file.max_key())
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Plan the next compaction.
    ///
    /// `busy_outputs` holds destination levels with a compaction in flight.
    pub fn pick(&self, catalog: &Catalog, busy_outputs: &HashSet<usize>) -> Pick {
        let level = match self.level_to_compact(catalog) {
            Some(level) => level,
            None => return Pick::Nothing,
        };
        if busy_outputs.contains(&(level + 1)) {
            return Pick::Blocked { level };
        }

        let files = match catalog.level(level) {
            Some(l) => l.files(),
            None => return Pick::Nothing,
        };
        let idle = files.iter().filter(|f| !f.being_compacted());
        let candidate = if level == 0 {
            // Oldest first, so newer level-0 files always shadow what moves down.
            idle.min_by_key(|f| f.file_number())
        } else {
            idle.min_by(|a, b| a.min_key().cmp(b.min_key()))
        };
        let candidate = match candidate {
            Some(file) => file.clone(),
            None => return Pick::Blocked { level },
        };

        let overlapping = self.find_overlaps(catalog, level + 1, &candidate);
        if overlapping.iter().any(|f| f.being_compacted()) {
            return Pick::Blocked { level };
        }

        Pick::Task(CompactionTask {
            level,
            candidate,
            overlapping,
        })
    }

    /// Check if tombstones can be dropped when `task` writes its output.
    ///
    /// Only safe when nothing below the output level could hold an older
    /// copy of a deleted key.
    pub fn can_drop_tombstones(&self, catalog: &Catalog, task: &CompactionTask) -> bool {
        let output_level = task.output_level();
        if output_level >= self.options.last_level() {
            return true;
        }
        let (min, max) = task.key_range();
        !catalog.deeper_levels_overlap(output_level, &min, &max)
    }
}

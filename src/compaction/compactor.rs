//! Compactor - executes a planned compaction.
//!
//! The compactor merges the input files of a [`CompactionTask`] and writes
//! the result to new files on the output level, rolling over to a fresh
//! file whenever the current one reaches the target file size. It does not
//! touch the catalog; the caller installs the outputs and deletes the
//! inputs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{CatalogEdit, SSTableMetadata, TableDirectory};
use crate::sstable::{SSTableIterator, SSTableStreamWriter};
use crate::util::filename;
use crate::{Error, Result};

use super::merge_iterator::MergeIterator;
use super::picker::CompactionTask;

/// Statistics from a compaction.
#[derive(Debug, Clone, Default)]
pub struct CompactionStats {
    /// Level compacted from.
    pub level: usize,
    /// Level written to.
    pub output_level: usize,
    /// Whether the candidate was rewritten without a merge.
    pub trivial: bool,
    /// Number of input files.
    pub num_input_files: usize,
    /// Number of output files.
    pub num_output_files: usize,
    /// Total bytes read.
    pub bytes_read: u64,
    /// Total bytes written.
    pub bytes_written: u64,
    /// Number of entries read.
    pub entries_read: u64,
    /// Number of entries written.
    pub entries_written: u64,
    /// Number of entries dropped (older versions).
    pub entries_dropped: u64,
    /// Number of tombstones dropped.
    pub tombstones_dropped: u64,
    /// Time taken in milliseconds.
    pub elapsed_ms: u64,
}

impl CompactionStats {
    /// Get the write amplification (bytes_written / bytes_read).
    pub fn write_amplification(&self) -> f64 {
        if self.bytes_read == 0 {
            0.0
        } else {
            self.bytes_written as f64 / self.bytes_read as f64
        }
    }
}

/// Result of a compaction run.
#[derive(Debug)]
pub struct CompactionOutput {
    /// New files on the output level.
    pub files: Vec<SSTableMetadata>,
    /// Statistics.
    pub stats: CompactionStats,
}

impl CompactionOutput {
    /// Catalog change replacing the task's inputs with the outputs.
    pub fn edit(&self, task: &CompactionTask) -> CatalogEdit {
        let mut edit = CatalogEdit::new().remove_file(task.level, task.candidate.file_number());
        for file in &task.overlapping {
            edit = edit.remove_file(task.output_level(), file.file_number());
        }
        for file in &self.files {
            edit = edit.add_file(task.output_level(), file.clone());
        }
        edit
    }
}

/// Executes compaction tasks.
pub struct Compactor {
    directory: Arc<TableDirectory>,
    target_file_size: u64,
    cancel: Arc<AtomicBool>,
}

impl Compactor {
    /// Create a compactor writing through `directory`.
    pub fn new(directory: Arc<TableDirectory>, cancel: Arc<AtomicBool>) -> Self {
        let target_file_size = directory.options().target_file_size;
        Self {
            directory,
            target_file_size,
            cancel,
        }
    }

    /// Merge the task's inputs into new output-level files.
    ///
    /// Tombstones are dropped only when `drop_tombstones` is set. On error
    /// every output written so far is removed.
    pub fn run(&self, task: &CompactionTask, drop_tombstones: bool) -> Result<CompactionOutput> {
        let start = Instant::now();
        let mut finished: Vec<(SSTableMetadata, PathBuf)> = Vec::new();

        match self.merge_into(task, drop_tombstones, &mut finished) {
            Ok(mut stats) => {
                stats.elapsed_ms = start.elapsed().as_millis() as u64;
                Ok(CompactionOutput {
                    files: finished.into_iter().map(|(meta, _)| meta).collect(),
                    stats,
                })
            }
            Err(e) => {
                for (_, path) in &finished {
                    let _ = filename::delete_file(path);
                }
                Err(e)
            }
        }
    }

    fn merge_into(
        &self,
        task: &CompactionTask,
        drop_tombstones: bool,
        finished: &mut Vec<(SSTableMetadata, PathBuf)>,
    ) -> Result<CompactionStats> {
        let output_level = task.output_level();
        let mut stats = CompactionStats {
            level: task.level,
            output_level,
            trivial: task.is_trivial(),
            num_input_files: task.num_inputs(),
            bytes_read: task.input_size(),
            ..Default::default()
        };

        // Rank 0 is the candidate: it sits above the overlapping files.
        let mut sources = Vec::with_capacity(task.num_inputs());
        for file in task.inputs() {
            sources.push(SSTableIterator::open(&self.directory.absolute_path(&file))?);
        }
        let mut merge = MergeIterator::new(sources)?;

        let mut writer: Option<(u64, SSTableStreamWriter)> = None;
        for entry in merge.by_ref() {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Error::CompactionCancelled);
            }
            let entry = entry?;

            if entry.value.is_tombstone() && drop_tombstones {
                stats.tombstones_dropped += 1;
                continue;
            }

            if writer.is_none() {
                let (number, path) = self.directory.allocate_file(output_level)?;
                writer = Some((number, SSTableStreamWriter::new(&path)?));
            }
            if let Some((_, w)) = writer.as_mut() {
                w.add(&entry.key, &entry.value)?;
                stats.entries_written += 1;
                if w.data_size() >= self.target_file_size {
                    if let Some((number, w)) = writer.take() {
                        self.finish_output(number, output_level, w, finished, &mut stats)?;
                    }
                }
            }
        }

        if let Some((number, w)) = writer.take() {
            self.finish_output(number, output_level, w, finished, &mut stats)?;
        }

        stats.entries_read = merge.entries_read();
        stats.entries_dropped = merge.superseded();
        Ok(stats)
    }

    fn finish_output(
        &self,
        number: u64,
        level: usize,
        writer: SSTableStreamWriter,
        finished: &mut Vec<(SSTableMetadata, PathBuf)>,
        stats: &mut CompactionStats,
    ) -> Result<()> {
        // A writer is only created for an entry, so it is never empty here.
        let info = writer.finish()?;
        let meta = SSTableMetadata::from_info(number, level, &info)
            .ok_or_else(|| Error::internal("compaction output has no keys"))?;
        stats.num_output_files += 1;
        stats.bytes_written += info.file_size;
        finished.push((meta, info.path));
        Ok(())
    }
}

//! File metadata for SSTable files.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::sstable::SSTableInfo;
use crate::util::filename;

/// Metadata about an SSTable file.
///
/// Contains all information needed to locate and identify an SSTable,
/// including its key range for efficient lookups. The file number doubles
/// as the file's recency: a larger number was written later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SSTableMetadata {
    /// Unique file number.
    file_number: u64,
    /// Path relative to the base directory.
    file_path: String,
    /// Smallest key in the file.
    min_key: Bytes,
    /// Largest key in the file.
    max_key: Bytes,
    /// File size in bytes.
    file_size: u64,
    /// Owning level.
    level: usize,
    /// Newest write timestamp stored in the file.
    #[serde(default)]
    max_timestamp: i64,
    /// Whether this file is being compacted.
    #[serde(default)]
    being_compacted: bool,
}

impl SSTableMetadata {
    /// Create new file metadata.
    pub fn new(
        file_number: u64,
        level: usize,
        min_key: Bytes,
        max_key: Bytes,
        file_size: u64,
    ) -> Self {
        Self {
            file_number,
            file_path: filename::table_relative_path(level, file_number),
            min_key,
            max_key,
            file_size,
            level,
            max_timestamp: 0,
            being_compacted: false,
        }
    }

    /// Set the newest write timestamp stored in the file.
    pub fn with_max_timestamp(mut self, max_timestamp: i64) -> Self {
        self.max_timestamp = max_timestamp;
        self
    }

    /// Create from a finished writer's summary.
    ///
    /// Returns `None` for a table without entries.
    pub fn from_info(file_number: u64, level: usize, info: &SSTableInfo) -> Option<Self> {
        let min_key = info.smallest_key.clone()?;
        let max_key = info.largest_key.clone()?;
        let max_timestamp = info.max_timestamp?;
        Some(
            Self::new(file_number, level, min_key, max_key, info.file_size)
                .with_max_timestamp(max_timestamp),
        )
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the path relative to the base directory.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Resolve the file's location under `base`.
    pub fn absolute_path(&self, base: &Path) -> PathBuf {
        base.join(&self.file_path)
    }

    /// Get the smallest key.
    pub fn min_key(&self) -> &Bytes {
        &self.min_key
    }

    /// Get the largest key.
    pub fn max_key(&self) -> &Bytes {
        &self.max_key
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the owning level.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Get the newest write timestamp stored in the file.
    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }

    /// Check if file is being compacted.
    pub fn being_compacted(&self) -> bool {
        self.being_compacted
    }

    /// Mark file as being compacted.
    pub fn set_being_compacted(&mut self, value: bool) {
        self.being_compacted = value;
    }

    /// Check if the file's key range overlaps with `[min, max]`.
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        self.min_key.as_ref() <= max && self.max_key.as_ref() >= min
    }

    /// Check if the file's key range overlaps another file's.
    pub fn overlaps_file(&self, other: &SSTableMetadata) -> bool {
        self.overlaps(&other.min_key, &other.max_key)
    }

    /// Check if a key falls within the file's range, bounds included.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.min_key.as_ref() <= key && key <= self.max_key.as_ref()
    }

    /// Reset state that only has meaning inside a running process.
    pub(crate) fn reset_runtime_state(&mut self) {
        self.being_compacted = false;
    }
}

//! Catalog of on-disk SSTables.
//!
//! The catalog maps every level to its files and is the only authoritative
//! description of the on-disk layout. It is persisted as `manifest.json` and
//! replaced atomically on every structural change.

mod file_metadata;
mod level;
mod manifest;
mod table_directory;

pub use file_metadata::SSTableMetadata;
pub use level::{Catalog, LevelMetadata};
pub use manifest::{ManifestDocument, ManifestSaver};
pub use table_directory::TableDirectory;

/// A set of additions and removals applied to the catalog as one change.
#[derive(Debug, Clone, Default)]
pub struct CatalogEdit {
    /// Files removed: (level, file number).
    pub removed: Vec<(usize, u64)>,
    /// Files added: (level, metadata).
    pub added: Vec<(usize, SSTableMetadata)>,
}

impl CatalogEdit {
    /// Create an empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a file.
    pub fn remove_file(mut self, level: usize, file_number: u64) -> Self {
        self.removed.push((level, file_number));
        self
    }

    /// Add a file.
    pub fn add_file(mut self, level: usize, meta: SSTableMetadata) -> Self {
        self.added.push((level, meta));
        self
    }

    /// Check if the edit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

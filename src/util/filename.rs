//! Storage directory file naming conventions.
//!
//! ```text
//! <base>/LOCK
//! <base>/wal.log
//! <base>/manifest.json
//! <base>/sstables/L<level>/<file_number>.sst
//! ```

use std::path::{Path, PathBuf};

/// Name of the write-ahead log.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Name of the manifest.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Name of the lock file.
pub const LOCK_FILE_NAME: &str = "LOCK";

/// Directory holding the per-level SSTable directories.
pub const SSTABLE_DIR_NAME: &str = "sstables";

/// Suffix of files that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// File types in the storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// SSTable data file.
    Table,
    /// Temporary file.
    Temp,
}

/// Generate the lock file path.
pub fn lock_file_path(base: &Path) -> PathBuf {
    base.join(LOCK_FILE_NAME)
}

/// Generate the WAL path.
pub fn wal_file_path(base: &Path) -> PathBuf {
    base.join(WAL_FILE_NAME)
}

/// Generate the manifest path.
pub fn manifest_file_path(base: &Path) -> PathBuf {
    base.join(MANIFEST_FILE_NAME)
}

/// Generate the directory holding all SSTables.
pub fn sstable_root(base: &Path) -> PathBuf {
    base.join(SSTABLE_DIR_NAME)
}

/// Generate the directory of one level.
pub fn level_dir(base: &Path, level: usize) -> PathBuf {
    sstable_root(base).join(format!("L{}", level))
}

/// Path of an SSTable relative to the base directory, as stored in the
/// manifest.
pub fn table_relative_path(level: usize, number: u64) -> String {
    format!("{}/L{}/{}.sst", SSTABLE_DIR_NAME, level, number)
}

/// Generate an SSTable file path.
pub fn table_file_path(base: &Path, level: usize, number: u64) -> PathBuf {
    level_dir(base, level).join(format!("{}.sst", number))
}

/// Temporary path used while `path` is being written.
pub fn temp_file_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Parse a file name inside a level directory.
///
/// Returns `None` if the file name doesn't match any known pattern.
pub fn parse_file_name(name: &str) -> Option<(FileType, Option<u64>)> {
    if name.ends_with(TEMP_SUFFIX) {
        let number = name
            .strip_suffix(TEMP_SUFFIX)
            .and_then(|stem| stem.strip_suffix(".sst"))
            .and_then(|num| num.parse::<u64>().ok());
        return Some((FileType::Temp, number));
    }

    let number = name.strip_suffix(".sst")?.parse::<u64>().ok()?;
    Some((FileType::Table, Some(number)))
}

/// Parse a level directory name (`L<level>`).
pub fn parse_level_dir(name: &str) -> Option<usize> {
    name.strip_prefix('L')?.parse::<usize>().ok()
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sync a directory to ensure file operations are durable.
pub fn sync_dir(path: &Path) -> std::io::Result<()> {
    let dir = std::fs::File::open(path)?;
    dir.sync_all()
}

/// Sync the directory containing `path`.
pub fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => sync_dir(parent),
        _ => Ok(()),
    }
}

//! SSTable writers for building immutable sorted files.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::catalog::{SSTableMetadata, TableDirectory};
use crate::memtable::MemTableSnapshot;
use crate::types::Value;
use crate::util::filename;
use crate::{Error, Result};

use super::{encode_index, EntryHeader, Footer, IndexEntry, INDEX_INTERVAL, WRITE_BUFFER_SIZE};

/// Streaming writer for SSTable files.
///
/// Entries must arrive in strictly increasing key order. Output goes to
/// `<path>.tmp` and is renamed over `<path>` only by [`finish`]; a writer
/// dropped before that removes its temporary file, so a partially written
/// table is never visible under its final name.
///
/// [`finish`]: SSTableStreamWriter::finish
pub struct SSTableStreamWriter {
    /// Temporary output file.
    file: Option<File>,
    /// Final path.
    path: PathBuf,
    /// Path written to until finish.
    temp_path: PathBuf,
    /// Pending bytes not yet handed to the file.
    buffer: BytesMut,
    /// Bytes of data written so far, buffered ones included.
    offset: u64,
    /// Sparse index.
    index: Vec<IndexEntry>,
    /// Number of entries written.
    entry_count: u64,
    /// Smallest key in the SSTable.
    smallest_key: Option<Bytes>,
    /// Largest key in the SSTable.
    largest_key: Option<Bytes>,
    /// Newest write timestamp in the SSTable.
    max_timestamp: Option<i64>,
    /// Set once the table is renamed into place.
    finished: bool,
}

impl SSTableStreamWriter {
    /// Create a writer producing the table at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = filename::temp_file_path(path);
        let file = File::create(&temp_path)?;

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            temp_path,
            buffer: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
            offset: 0,
            index: Vec::new(),
            entry_count: 0,
            smallest_key: None,
            largest_key: None,
            max_timestamp: None,
            finished: false,
        })
    }

    /// Final path of the table.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the number of entries written.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Check if no entries have been written.
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Size of the data section written so far.
    pub fn data_size(&self) -> u64 {
        self.offset
    }

    /// Get the smallest key.
    pub fn smallest_key(&self) -> Option<&Bytes> {
        self.smallest_key.as_ref()
    }

    /// Get the largest key.
    pub fn largest_key(&self) -> Option<&Bytes> {
        self.largest_key.as_ref()
    }

    /// Add an entry.
    ///
    /// Keys must be added in strictly increasing order.
    pub fn add(&mut self, key: &Bytes, value: &Value) -> Result<()> {
        if let Some(last) = &self.largest_key {
            if key <= last {
                return Err(Error::invalid_argument(format!(
                    "keys must be added in increasing order: {:?} after {:?}",
                    key, last
                )));
            }
        }

        if self.entry_count % INDEX_INTERVAL == 0 {
            self.index.push(IndexEntry::new(key.clone(), self.offset));
        }

        let header = EntryHeader::for_entry(key, value);
        header.encode_to(&mut self.buffer);
        self.buffer.put_slice(key);
        if let Some(payload) = value.payload() {
            self.buffer.put_slice(payload);
        }
        self.offset += header.entry_len() as u64;

        if self.smallest_key.is_none() {
            self.smallest_key = Some(key.clone());
        }
        self.largest_key = Some(key.clone());
        let ts = value.timestamp();
        self.max_timestamp = Some(self.max_timestamp.map_or(ts, |max| max.max(ts)));
        self.entry_count += 1;

        if self.buffer.len() >= WRITE_BUFFER_SIZE {
            self.flush_buffer()?;
        }

        Ok(())
    }

    /// Hand buffered bytes to the file.
    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::internal("SSTable writer already finished"))?;
        file.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Finish writing the SSTable.
    ///
    /// Writes the index and footer, syncs, and renames the temporary file
    /// to its final path.
    pub fn finish(mut self) -> Result<SSTableInfo> {
        let index_offset = self.offset;
        let index = encode_index(&self.index);
        self.buffer.put_slice(&index);
        self.buffer.put_slice(&Footer::new(index_offset, 0).encode());
        let file_size = index_offset + index.len() as u64 + super::FOOTER_SIZE as u64;

        self.flush_buffer()?;
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::internal("SSTable writer already finished"))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.temp_path, &self.path)?;
        self.finished = true;
        filename::sync_parent_dir(&self.path)?;

        Ok(SSTableInfo {
            path: self.path.clone(),
            file_size,
            entry_count: self.entry_count,
            smallest_key: self.smallest_key.take(),
            largest_key: self.largest_key.take(),
            max_timestamp: self.max_timestamp,
        })
    }
}

impl Drop for SSTableStreamWriter {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.file.take());
            let _ = filename::delete_file(&self.temp_path);
        }
    }
}

/// Information about a completed SSTable.
#[derive(Debug, Clone)]
pub struct SSTableInfo {
    /// Final path.
    pub path: PathBuf,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Number of entries.
    pub entry_count: u64,
    /// Smallest key (if any entries).
    pub smallest_key: Option<Bytes>,
    /// Largest key (if any entries).
    pub largest_key: Option<Bytes>,
    /// Newest write timestamp (if any entries).
    pub max_timestamp: Option<i64>,
}

/// Writes memtable snapshots out as new SSTables and registers them.
pub struct SSTableWriter<'a> {
    directory: &'a TableDirectory,
}

impl<'a> SSTableWriter<'a> {
    /// Create a writer registering its output with `directory`.
    pub fn new(directory: &'a TableDirectory) -> Self {
        Self { directory }
    }

    /// Write `snapshot` to a new table at `level`.
    ///
    /// Returns `None` without touching the disk if the snapshot is empty.
    pub fn write(&self, snapshot: &MemTableSnapshot, level: usize) -> Result<Option<SSTableMetadata>> {
        if snapshot.is_empty() {
            return Ok(None);
        }

        let (file_number, path) = self.directory.allocate_file(level)?;
        let mut writer = SSTableStreamWriter::new(&path)?;
        for entry in snapshot {
            writer.add(&entry.key, &entry.value)?;
        }
        let info = writer.finish()?;

        let meta = SSTableMetadata::from_info(file_number, level, &info)
            .ok_or_else(|| Error::internal("flushed SSTable has no keys"))?;
        self.directory.add_sstable(level, meta.clone())?;

        debug!(
            file_number,
            level,
            entries = info.entry_count,
            size = info.file_size,
            "wrote SSTable"
        );
        Ok(Some(meta))
    }
}

//! WAL writer implementation.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use crate::Result;

use super::WalRecord;

/// WAL writer for durable logging.
///
/// Each record is written to the OS as soon as it is appended; the file is
/// forced to stable storage after every `batch_size` records and on
/// [`flush`](WalWriter::flush).
pub struct WalWriter {
    /// The log file, opened for appending.
    file: File,
    /// Path of the log file.
    path: PathBuf,
    /// Records between forced syncs.
    batch_size: usize,
    /// Records appended since the last sync.
    pending: usize,
    /// Reusable encoding buffer.
    scratch: BytesMut,
}

impl WalWriter {
    /// Open the WAL at `path` for appending, creating it if needed.
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            batch_size: batch_size.max(1),
            pending: 0,
            scratch: BytesMut::with_capacity(4096),
        })
    }

    /// Get the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended since the last sync.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Current size of the log in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append a record, syncing once the batch is full.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        self.scratch.clear();
        record.encode_to(&mut self.scratch);
        self.file.write_all(&self.scratch)?;

        self.pending += 1;
        if self.pending >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Force appended records to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.pending = 0;
        Ok(())
    }

    /// Reset the log to empty.
    ///
    /// Only valid once everything in the log is durable in an SSTable.
    pub fn truncate(&mut self) -> Result<()> {
        self.truncate_to(0)
    }

    /// Cut the log back to `len` bytes, dropping everything after it.
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.file.sync_all()?;
        self.pending = 0;
        Ok(())
    }

    /// Sync and close the writer.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

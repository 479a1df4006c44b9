//! Forward-only iterator over the data section of an SSTable.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::types::Entry;
use crate::{Error, Result};

use super::reader::SSTableReader;
use super::{EntryHeader, ENTRY_HEADER_SIZE};

/// Buffer size for sequential scans.
const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// Single-pass iterator decoding one entry at a time.
///
/// Stops at the start of the index section. A structural error is yielded
/// once and ends the iteration.
pub struct SSTableIterator {
    /// Buffered file reader, `None` for an empty table.
    reader: Option<BufReader<File>>,
    /// Path, for error messages.
    path: PathBuf,
    /// Offset of the next entry.
    offset: u64,
    /// End of the data section.
    end: u64,
    /// Set after an error.
    failed: bool,
}

impl SSTableIterator {
    /// Open an iterator over the table at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        SSTableReader::open(path)?.iter()
    }

    /// Iterate the data section `[data_offset, index_offset)` of `path`.
    pub(crate) fn from_parts(path: &Path, data_offset: u64, index_offset: u64) -> Result<Self> {
        let reader = if index_offset > data_offset {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(data_offset))?;
            Some(BufReader::with_capacity(SCAN_BUFFER_SIZE, file))
        } else {
            None
        };

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            offset: data_offset,
            end: index_offset,
            failed: false,
        })
    }

    /// Offset of the next entry.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_entry(&mut self) -> Result<Entry> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::internal("iterator has no data"))?;

        if self.end - self.offset < ENTRY_HEADER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "{}: truncated entry header at offset {}",
                self.path.display(),
                self.offset
            )));
        }
        let mut header_buf = [0u8; ENTRY_HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;
        let header = EntryHeader::decode(&header_buf)?;
        if self.offset + header.entry_len() as u64 > self.end {
            return Err(Error::corruption(format!(
                "{}: entry at offset {} runs past the data section",
                self.path.display(),
                self.offset
            )));
        }

        let mut key = vec![0u8; header.key_len as usize];
        reader.read_exact(&mut key)?;
        let payload = match header.value_len {
            Some(len) => {
                let mut payload = vec![0u8; len as usize];
                reader.read_exact(&mut payload)?;
                Some(Bytes::from(payload))
            }
            None => None,
        };

        self.offset += header.entry_len() as u64;
        Ok(Entry::new(Bytes::from(key), header.into_value(payload)))
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.end {
            return None;
        }
        let result = self.read_entry();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

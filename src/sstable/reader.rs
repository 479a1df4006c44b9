//! SSTable reader for reading immutable sorted files.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::types::LookupResult;
use crate::{Error, Result};

use super::iterator::SSTableIterator;
use super::{decode_index, EntryHeader, Footer, IndexEntry, ENTRY_HEADER_SIZE, FOOTER_SIZE};

/// Reader for SSTable files.
///
/// Opening validates the footer and loads the whole sparse index; lookups
/// then seek to the closest indexed entry and scan forward.
pub struct SSTableReader {
    /// File handle, `None` for an empty table.
    file: Option<File>,
    /// Path of the table.
    path: PathBuf,
    /// File size.
    file_size: u64,
    /// Parsed footer.
    footer: Footer,
    /// Sparse index.
    index: Vec<IndexEntry>,
}

impl SSTableReader {
    /// Open an SSTable file for reading.
    ///
    /// A zero-length file is a valid empty table.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size == 0 {
            return Ok(Self {
                file: None,
                path: path.to_path_buf(),
                file_size,
                footer: Footer::new(0, 0),
                index: Vec::new(),
            });
        }

        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "{}: file too small for footer ({} bytes)",
                path.display(),
                file_size
            )));
        }

        // Read footer
        let mut footer_buf = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf, file_size)?;

        // Read index section
        let index_end = file_size - FOOTER_SIZE as u64;
        let index_len = (index_end - footer.index_offset) as usize;
        let mut index_buf = vec![0u8; index_len];
        file.seek(SeekFrom::Start(footer.index_offset))?;
        file.read_exact(&mut index_buf)?;
        let index = decode_index(&index_buf, footer.index_offset)?;

        if footer.index_offset > footer.data_offset && index.is_empty() {
            return Err(Error::corruption(format!(
                "{}: data section without index entries",
                path.display()
            )));
        }

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            file_size,
            footer,
            index,
        })
    }

    /// Get the path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the footer.
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Get the sparse index.
    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Check if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.footer.index_offset == self.footer.data_offset
    }

    /// Look up a key.
    ///
    /// Returns [`LookupResult::Deleted`] if the table holds a tombstone for
    /// the key.
    pub fn get(&mut self, key: &[u8]) -> Result<LookupResult> {
        // Last indexed key <= target.
        let pos = self.index.partition_point(|e| e.key.as_ref() <= key);
        if pos == 0 {
            return Ok(LookupResult::NotFound);
        }
        let start = self.index[pos - 1].offset;
        let end = self.footer.index_offset;

        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return Ok(LookupResult::NotFound),
        };
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file);

        let mut offset = start;
        let mut header_buf = [0u8; ENTRY_HEADER_SIZE];
        let mut key_buf = Vec::new();
        while offset < end {
            if end - offset < ENTRY_HEADER_SIZE as u64 {
                return Err(truncated(&self.path, offset));
            }
            reader.read_exact(&mut header_buf)?;
            let header = EntryHeader::decode(&header_buf)?;
            if offset + header.entry_len() as u64 > end {
                return Err(truncated(&self.path, offset));
            }

            key_buf.resize(header.key_len as usize, 0);
            reader.read_exact(&mut key_buf)?;

            match key_buf.as_slice().cmp(key) {
                Ordering::Equal => {
                    let value = match header.value_len {
                        Some(len) => {
                            let mut payload = vec![0u8; len as usize];
                            reader.read_exact(&mut payload)?;
                            LookupResult::Found(Bytes::from(payload))
                        }
                        None => LookupResult::Deleted,
                    };
                    return Ok(value);
                }
                // Sorted data: the key cannot appear later.
                Ordering::Greater => return Ok(LookupResult::NotFound),
                Ordering::Less => {
                    let skip = header.value_len.unwrap_or(0) as i64;
                    reader.seek_relative(skip)?;
                }
            }
            offset += header.entry_len() as u64;
        }

        Ok(LookupResult::NotFound)
    }

    /// Iterate all entries in key order.
    pub fn iter(&self) -> Result<SSTableIterator> {
        SSTableIterator::from_parts(&self.path, self.footer.data_offset, self.footer.index_offset)
    }
}

fn truncated(path: &Path, offset: u64) -> Error {
    Error::corruption(format!(
        "{}: truncated entry at offset {}",
        path.display(),
        offset
    ))
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .field("index_entries", &self.index.len())
            .finish()
    }
}

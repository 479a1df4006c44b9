//! SSTable - Sorted String Table for on-disk storage.
//!
//! SSTables are immutable, sorted files holding at most one entry per key.
//! They are the persistent storage format for the LSM tree.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | Entry 1          |  key_len i32 | value_len i32 | timestamp i64 | key | value
//! +------------------+
//! | Entry 2          |
//! +------------------+
//! | ...              |
//! +------------------+
//! | Index            |  index_size i32 | { key_len i32 | key | offset i64 }*
//! +------------------+
//! | Footer           |  index_offset i64 | data_offset i64 | magic u64
//! +------------------+
//! ```
//!
//! `value_len == -1` marks a tombstone. The index is sparse: it holds the
//! first entry and then every [`INDEX_INTERVAL`]th entry. `index_size` is the
//! length of the whole index section, its own 4 bytes included. All integers
//! are big-endian.

mod iterator;
mod reader;
mod writer;

pub use iterator::SSTableIterator;
pub use reader::SSTableReader;
pub use writer::{SSTableInfo, SSTableStreamWriter, SSTableWriter};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::Value;
use crate::{Error, Result};

/// Magic number closing every SSTable footer.
pub const FOOTER_MAGIC: u64 = 0xFACE_DBEE_CAFE_BEEF;

/// Footer size: index offset (8) + data offset (8) + magic (8) = 24 bytes.
pub const FOOTER_SIZE: usize = 24;

/// Entry header size: key length (4) + value length (4) + timestamp (8).
pub const ENTRY_HEADER_SIZE: usize = 16;

/// One index entry is written per this many data entries.
pub const INDEX_INTERVAL: u64 = 128;

/// Size of the writer's in-memory buffer (1MB).
pub const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// Value length marking a tombstone.
pub const TOMBSTONE_LEN: i32 = -1;

/// Decoded header of one data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Key length in bytes.
    pub key_len: u32,
    /// Payload length, `None` for a tombstone.
    pub value_len: Option<u32>,
    /// Write timestamp.
    pub timestamp: i64,
}

impl EntryHeader {
    /// Build the header for a key and value.
    pub fn for_entry(key: &[u8], value: &Value) -> Self {
        Self {
            key_len: key.len() as u32,
            value_len: value.payload().map(|p| p.len() as u32),
            timestamp: value.timestamp(),
        }
    }

    /// Length of the key and payload following the header.
    pub fn body_len(&self) -> usize {
        self.key_len as usize + self.value_len.unwrap_or(0) as usize
    }

    /// Total encoded length of the entry.
    pub fn entry_len(&self) -> usize {
        ENTRY_HEADER_SIZE + self.body_len()
    }

    /// Append the header to `buf`.
    pub fn encode_to(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.key_len as i32);
        match self.value_len {
            Some(len) => buf.put_i32(len as i32),
            None => buf.put_i32(TOMBSTONE_LEN),
        }
        buf.put_i64(self.timestamp);
    }

    /// Decode a header from exactly [`ENTRY_HEADER_SIZE`] bytes.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_HEADER_SIZE {
            return Err(Error::corruption("truncated entry header"));
        }
        let key_len = data.get_i32();
        let value_len = data.get_i32();
        let timestamp = data.get_i64();

        if key_len < 0 {
            return Err(Error::corruption(format!("negative key length {}", key_len)));
        }
        let value_len = match value_len {
            TOMBSTONE_LEN => None,
            len if len >= 0 => Some(len as u32),
            len => {
                return Err(Error::corruption(format!("invalid value length {}", len)));
            }
        };

        Ok(Self {
            key_len: key_len as u32,
            value_len,
            timestamp,
        })
    }

    /// Build the value from the header and its payload bytes.
    pub fn into_value(self, payload: Option<Bytes>) -> Value {
        Value::from_parts(payload, self.timestamp)
    }
}

/// Footer of an SSTable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Offset of the index section.
    pub index_offset: u64,
    /// Offset of the data section.
    pub data_offset: u64,
}

impl Footer {
    /// Create a new footer.
    pub fn new(index_offset: u64, data_offset: u64) -> Self {
        Self {
            index_offset,
            data_offset,
        }
    }

    /// Encode the footer to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FOOTER_SIZE);
        buf.put_i64(self.index_offset as i64);
        buf.put_i64(self.data_offset as i64);
        buf.put_u64(FOOTER_MAGIC);
        buf.freeze()
    }

    /// Decode the footer from the last [`FOOTER_SIZE`] bytes of `data`,
    /// checking its offsets against `file_size`.
    pub fn decode(data: &[u8], file_size: u64) -> Result<Self> {
        if data.len() < FOOTER_SIZE {
            return Err(Error::corruption("footer too short"));
        }

        let footer_start = data.len() - FOOTER_SIZE;
        let mut cursor = &data[footer_start..];

        let index_offset = cursor.get_i64();
        let data_offset = cursor.get_i64();
        let magic = cursor.get_u64();

        if magic != FOOTER_MAGIC {
            return Err(Error::corruption(format!("invalid footer magic {:#x}", magic)));
        }

        let index_limit = file_size.saturating_sub(FOOTER_SIZE as u64);
        if data_offset < 0 || index_offset < data_offset || index_offset as u64 > index_limit {
            return Err(Error::corruption(format!(
                "footer offsets out of range: data={} index={} file_size={}",
                data_offset, index_offset, file_size
            )));
        }

        Ok(Self {
            index_offset: index_offset as u64,
            data_offset: data_offset as u64,
        })
    }
}

/// One sparse index entry: a key and the offset of its data entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Key of the indexed entry.
    pub key: Bytes,
    /// Offset of the entry in the data section.
    pub offset: u64,
}

impl IndexEntry {
    /// Create a new index entry.
    pub fn new(key: Bytes, offset: u64) -> Self {
        Self { key, offset }
    }

    fn encoded_len(&self) -> usize {
        4 + self.key.len() + 8
    }
}

/// Encode a complete index section, size prefix included.
pub fn encode_index(entries: &[IndexEntry]) -> Bytes {
    let size = 4 + entries.iter().map(IndexEntry::encoded_len).sum::<usize>();
    let mut buf = BytesMut::with_capacity(size);
    buf.put_i32(size as i32);
    for entry in entries {
        buf.put_i32(entry.key.len() as i32);
        buf.put_slice(&entry.key);
        buf.put_i64(entry.offset as i64);
    }
    buf.freeze()
}

/// Decode a complete index section, size prefix included.
///
/// Every offset must point inside the data section, which ends at
/// `index_offset`.
pub fn decode_index(section: &[u8], index_offset: u64) -> Result<Vec<IndexEntry>> {
    if section.len() < 4 {
        return Err(Error::corruption("truncated index size"));
    }
    let mut cursor = section;
    let size = cursor.get_i32();
    if size < 4 || size as usize != section.len() {
        return Err(Error::corruption(format!(
            "index size {} does not match section length {}",
            size,
            section.len()
        )));
    }

    let mut entries = Vec::new();
    while cursor.has_remaining() {
        if cursor.remaining() < 4 {
            return Err(Error::corruption("truncated index entry"));
        }
        let key_len = cursor.get_i32();
        if key_len < 0 || cursor.remaining() < key_len as usize + 8 {
            return Err(Error::corruption("truncated index entry"));
        }
        let key = Bytes::copy_from_slice(&cursor[..key_len as usize]);
        cursor.advance(key_len as usize);
        let offset = cursor.get_i64();
        if offset < 0 || offset as u64 >= index_offset {
            return Err(Error::corruption(format!(
                "index offset {} outside data section",
                offset
            )));
        }
        entries.push(IndexEntry::new(key, offset as u64));
    }

    Ok(entries)
}

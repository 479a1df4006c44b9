//! Write-Ahead Log (WAL) for durability.
//!
//! Every mutation is appended to the WAL before it is applied to the
//! MemTable. On restart the log is replayed to rebuild the MemTable state
//! that had not yet been flushed to an SSTable.
//!
//! # Format
//!
//! Records are appended back-to-back with no separators or padding:
//!
//! ```text
//! +-------------+---------------+--------------+-----------+-------------+
//! | key_len i32 | value_len i32 | timestamp i64| key bytes | value bytes |
//! +-------------+---------------+--------------+-----------+-------------+
//! ```
//!
//! `value_len == -1` marks a tombstone, in which case no value bytes follow.
//! All integers are big-endian.

mod reader;
mod writer;

pub use reader::{WalReader, WalRecovery};
pub use writer::WalWriter;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::Value;

/// Header size: key length (4) + value length (4) + timestamp (8) = 16 bytes.
pub const HEADER_SIZE: usize = 4 + 4 + 8;

/// Value length marking a tombstone.
pub const TOMBSTONE_LEN: i32 = -1;

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// The key.
    pub key: Bytes,
    /// The value or tombstone written for the key.
    pub value: Value,
}

impl WalRecord {
    /// Create a new record.
    pub fn new(key: impl Into<Bytes>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Size of the encoded record in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.size()
    }

    /// Append the encoded record to `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_i32(self.key.len() as i32);
        match self.value.payload() {
            Some(payload) => buf.put_i32(payload.len() as i32),
            None => buf.put_i32(TOMBSTONE_LEN),
        }
        buf.put_i64(self.value.timestamp());
        buf.put_slice(&self.key);
        if let Some(payload) = self.value.payload() {
            buf.put_slice(payload);
        }
    }

    /// Encode the record into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    /// Decode one record from the front of `data`.
    ///
    /// Returns the record and the number of bytes consumed, or `None` if
    /// `data` does not start with a complete, well-formed record.
    pub fn decode(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < HEADER_SIZE {
            return None;
        }

        let mut header = &data[..HEADER_SIZE];
        let key_len = header.get_i32();
        let value_len = header.get_i32();
        let timestamp = header.get_i64();

        if key_len < 0 || value_len < TOMBSTONE_LEN {
            return None;
        }

        let key_len = key_len as usize;
        let payload_len = if value_len == TOMBSTONE_LEN {
            0
        } else {
            value_len as usize
        };

        let total = HEADER_SIZE + key_len + payload_len;
        if data.len() < total {
            return None;
        }

        let key_start = HEADER_SIZE;
        let key = Bytes::copy_from_slice(&data[key_start..key_start + key_len]);
        let value = if value_len == TOMBSTONE_LEN {
            Value::tombstone(timestamp)
        } else {
            let value_start = key_start + key_len;
            Value::new(
                Bytes::copy_from_slice(&data[value_start..value_start + payload_len]),
                timestamp,
            )
        };

        Some((Self { key, value }, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let record = WalRecord::new(Bytes::from("key"), Value::new(Bytes::from("value"), 9));
        let encoded = record.encode();

        assert_eq!(encoded.len(), HEADER_SIZE + 3 + 5);
        assert_eq!(&encoded[0..4], &3i32.to_be_bytes());
        assert_eq!(&encoded[4..8], &5i32.to_be_bytes());
        assert_eq!(&encoded[8..16], &9i64.to_be_bytes());
        assert_eq!(&encoded[16..19], b"key");
        assert_eq!(&encoded[19..], b"value");
    }

    #[test]
    fn test_tombstone_record() {
        let record = WalRecord::new(Bytes::from("gone"), Value::tombstone(3));
        let encoded = record.encode();

        assert_eq!(encoded.len(), HEADER_SIZE + 4);
        assert_eq!(&encoded[4..8], &(-1i32).to_be_bytes());

        let (decoded, used) = WalRecord::decode(&encoded).unwrap();
        assert_eq!(used, encoded.len());
        assert!(decoded.value.is_tombstone());
        assert_eq!(decoded.value.timestamp(), 3);
    }

    #[test]
    fn test_empty_value_is_not_tombstone() {
        let record = WalRecord::new(Bytes::from("k"), Value::new(Bytes::new(), 1));
        let (decoded, _) = WalRecord::decode(&record.encode()).unwrap();
        assert!(!decoded.value.is_tombstone());
        assert_eq!(decoded.value.size(), 0);
    }

    #[test]
    fn test_decode_partial() {
        let record = WalRecord::new(Bytes::from("key"), Value::new(Bytes::from("value"), 1));
        let encoded = record.encode();

        assert!(WalRecord::decode(&encoded[..HEADER_SIZE - 1]).is_none());
        assert!(WalRecord::decode(&encoded[..encoded.len() - 1]).is_none());
    }

    #[test]
    fn test_decode_rejects_negative_key_length() {
        let mut buf = BytesMut::new();
        buf.put_i32(-5);
        buf.put_i32(0);
        buf.put_i64(0);
        assert!(WalRecord::decode(&buf).is_none());
    }
}

//! WAL reader implementation.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::warn;

use crate::Result;

use super::WalRecord;

/// Outcome of replaying a WAL.
#[derive(Debug, Default)]
pub struct WalRecovery {
    /// Complete records, in log order.
    pub records: Vec<WalRecord>,
    /// Length of the valid prefix of the log.
    pub valid_len: u64,
    /// Bytes discarded after the valid prefix.
    pub discarded: u64,
}

impl WalRecovery {
    /// Largest timestamp among the recovered records.
    pub fn max_timestamp(&self) -> Option<i64> {
        self.records.iter().map(|r| r.value.timestamp()).max()
    }
}

/// Reads back a WAL written by [`super::WalWriter`].
pub struct WalReader;

impl WalReader {
    /// Replay the log at `path`.
    ///
    /// A missing file is treated as an empty log. Reading stops at the first
    /// truncated or malformed record; everything before it is returned and
    /// everything from it on is reported as discarded.
    pub fn recover(path: &Path) -> Result<WalRecovery> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WalRecovery::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        BufReader::new(file).read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            match WalRecord::decode(&data[pos..]) {
                Some((record, used)) => {
                    records.push(record);
                    pos += used;
                }
                None => break,
            }
        }

        let discarded = (data.len() - pos) as u64;
        if discarded > 0 {
            warn!(
                path = %path.display(),
                valid_len = pos,
                discarded,
                "WAL ends with an incomplete record, ignoring tail"
            );
        }

        Ok(WalRecovery {
            records,
            valid_len: pos as u64,
            discarded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use crate::wal::WalWriter;
    use bytes::Bytes;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_recover_missing_file() {
        let dir = tempdir().unwrap();
        let recovery = WalReader::recover(&dir.path().join("wal.log")).unwrap();
        assert!(recovery.records.is_empty());
        assert_eq!(recovery.valid_len, 0);
    }

    #[test]
    fn test_recover_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut writer = WalWriter::open(&path, 1000).unwrap();
            writer
                .append(&WalRecord::new(Bytes::from("a"), Value::new(Bytes::from("1"), 10)))
                .unwrap();
            writer
                .append(&WalRecord::new(Bytes::from("b"), Value::new(Bytes::from("2"), 11)))
                .unwrap();
            writer
                .append(&WalRecord::new(Bytes::from("a"), Value::tombstone(12)))
                .unwrap();
            writer.close().unwrap();
        }

        let recovery = WalReader::recover(&path).unwrap();
        assert_eq!(recovery.records.len(), 3);
        assert_eq!(recovery.records[0].key, Bytes::from("a"));
        assert_eq!(recovery.records[1].key, Bytes::from("b"));
        assert!(recovery.records[2].value.is_tombstone());
        assert_eq!(recovery.discarded, 0);
        assert_eq!(recovery.max_timestamp(), Some(12));
    }

    #[test]
    fn test_recover_ignores_partial_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        let first = WalRecord::new(Bytes::from("key1"), Value::new(Bytes::from("v1"), 1));
        let second = WalRecord::new(Bytes::from("key2"), Value::new(Bytes::from("v2"), 2));
        let second_bytes = second.encode();

        {
            let mut writer = WalWriter::open(&path, 1000).unwrap();
            writer.append(&first).unwrap();
            writer.close().unwrap();
        }
        {
            // Simulate a crash midway through the second record.
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&second_bytes[..second_bytes.len() - 1]).unwrap();
        }

        let recovery = WalReader::recover(&path).unwrap();
        assert_eq!(recovery.records, vec![first.clone()]);
        assert_eq!(recovery.valid_len, first.encoded_len() as u64);
        assert_eq!(recovery.discarded, (second_bytes.len() - 1) as u64);
    }
}

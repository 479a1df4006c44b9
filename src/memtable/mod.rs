//! MemTable - In-memory sorted storage for recent writes.
//!
//! The MemTable is the first destination for all writes. It keeps at most
//! one value per key, ordered by key, behind a read/write lock: readers
//! never block each other while a writer excludes everyone.
//!
//! # Size accounting
//!
//! The running size is the sum over live keys of key length plus payload
//! length (tombstones count their key only). Overwriting a key replaces the
//! previous contribution instead of adding to it.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::types::{Entry, LookupResult, Value};

#[derive(Debug, Default)]
struct Inner {
    table: BTreeMap<Bytes, Value>,
    size: usize,
}

/// MemTable for in-memory sorted storage.
#[derive(Debug)]
pub struct MemTable {
    inner: RwLock<Inner>,
    /// Size at which the table should be flushed.
    flush_threshold: usize,
}

impl MemTable {
    /// Create a new empty MemTable.
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            flush_threshold,
        }
    }

    /// Insert a key-value pair.
    pub fn put(&self, key: Bytes, payload: Bytes, timestamp: i64) {
        self.insert(key, Value::new(payload, timestamp));
    }

    /// Record a deletion as a tombstone.
    pub fn delete(&self, key: Bytes, timestamp: i64) {
        self.insert(key, Value::tombstone(timestamp));
    }

    /// Insert a prepared value, replacing any previous one for the key.
    pub fn insert(&self, key: Bytes, value: Value) {
        let key_len = key.len();
        let added = key_len + value.size();
        let mut inner = self.inner.write();
        let removed = match inner.table.insert(key, value) {
            Some(old) => key_len + old.size(),
            None => 0,
        };
        inner.size = (inner.size + added).saturating_sub(removed);
    }

    /// Get the live value for a key.
    ///
    /// Returns `None` for both absent and deleted keys.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.lookup(key).into_option()
    }

    /// Look up a key, distinguishing a tombstone from an absent key.
    pub fn lookup(&self, key: &[u8]) -> LookupResult {
        let inner = self.inner.read();
        match inner.table.get(key) {
            Some(value) => LookupResult::from(value),
            None => LookupResult::NotFound,
        }
    }

    /// Take a sorted copy of the current contents.
    ///
    /// Later mutations do not affect the returned snapshot.
    pub fn snapshot(&self) -> MemTableSnapshot {
        let inner = self.inner.read();
        let entries = inner
            .table
            .iter()
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
            .collect();
        MemTableSnapshot {
            entries,
            size: inner.size,
        }
    }

    /// Approximate size in bytes.
    pub fn size(&self) -> usize {
        self.inner.read().size
    }

    /// Number of keys, including tombstones.
    pub fn len(&self) -> usize {
        self.inner.read().table.len()
    }

    /// Check if the MemTable is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().table.is_empty()
    }

    /// Check if the size has reached the flush threshold.
    pub fn should_flush(&self) -> bool {
        self.size() >= self.flush_threshold
    }

    /// Configured flush threshold.
    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Drop all contents.
    ///
    /// Only call once the contents are durable in an SSTable.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.table.clear();
        inner.size = 0;
    }
}

/// A point-in-time sorted copy of a MemTable.
#[derive(Debug, Clone, Default)]
pub struct MemTableSnapshot {
    entries: Vec<Entry>,
    size: usize,
}

impl MemTableSnapshot {
    /// Entries in ascending key order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Iterate entries in ascending key order. Restartable.
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Size counter at the time of the snapshot.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest timestamp in the snapshot.
    pub fn max_timestamp(&self) -> Option<i64> {
        self.entries.iter().map(|e| e.value.timestamp()).max()
    }
}

impl<'a> IntoIterator for &'a MemTableSnapshot {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

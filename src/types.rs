//! Core types for lsmstore.
//!
//! Keys are plain byte strings ordered lexicographically (`Bytes` already
//! orders that way, with a prefix sorting before any longer key).

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// A stored value: either a payload or a tombstone, stamped with the
/// wall-clock millisecond at which it was written.
///
/// The timestamp only resolves conflicts between copies of the same key
/// during merges; it carries no meaning across processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// The payload; `None` marks a tombstone.
    payload: Option<Bytes>,
    /// Write timestamp in milliseconds.
    timestamp: i64,
}

impl Value {
    /// Create a value holding a payload.
    pub fn new(payload: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            payload: Some(payload.into()),
            timestamp,
        }
    }

    /// Create a tombstone.
    pub fn tombstone(timestamp: i64) -> Self {
        Self {
            payload: None,
            timestamp,
        }
    }

    /// Create from an optional payload.
    pub fn from_parts(payload: Option<Bytes>, timestamp: i64) -> Self {
        Self { payload, timestamp }
    }

    /// Get the payload, if this is not a tombstone.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Consume the value, returning its payload.
    pub fn into_payload(self) -> Option<Bytes> {
        self.payload
    }

    /// Get the write timestamp.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Check if this is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// Payload length, 0 for a tombstone.
    pub fn size(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }
}

/// A key with its value, as produced by iterators and merges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key.
    pub key: Bytes,
    /// The value or tombstone.
    pub value: Value,
}

impl Entry {
    /// Create a new entry.
    pub fn new(key: impl Into<Bytes>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Result of a point lookup in one storage component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// Key holds a live value.
    Found(Bytes),
    /// Key was deleted; older components must not be consulted.
    Deleted,
    /// Key is unknown to this component.
    NotFound,
}

impl LookupResult {
    /// Check if the lookup settled the key (found or deleted).
    pub fn is_resolved(&self) -> bool {
        !matches!(self, LookupResult::NotFound)
    }

    /// Convert into the value visible to callers.
    pub fn into_option(self) -> Option<Bytes> {
        match self {
            LookupResult::Found(value) => Some(value),
            LookupResult::Deleted | LookupResult::NotFound => None,
        }
    }
}

impl From<&Value> for LookupResult {
    fn from(value: &Value) -> Self {
        match value.payload() {
            Some(payload) => LookupResult::Found(payload.clone()),
            None => LookupResult::Deleted,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Hands out write timestamps that never go backwards within one process.
#[derive(Debug, Default)]
pub struct TimestampOracle {
    last: i64,
}

impl TimestampOracle {
    /// Create an oracle whose next timestamp is above `last`.
    pub fn new(last: i64) -> Self {
        Self { last }
    }

    /// Next timestamp: the wall clock, bumped past the previous one if needed.
    pub fn next(&mut self) -> i64 {
        let ts = now_millis().max(self.last + 1);
        self.last = ts;
        ts
    }

    /// Last timestamp handed out.
    pub fn last(&self) -> i64 {
        self.last
    }
}

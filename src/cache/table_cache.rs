//! Table cache for SSTable reader handles.
//!
//! Caches open SSTable readers so a lookup does not reopen the file and
//! reload its sparse index. File numbers are never reused, so a cached
//! reader stays valid until its file is deleted and the entry evicted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::SSTableMetadata;
use crate::sstable::SSTableReader;
use crate::Result;

/// Cached SSTable reader wrapped for sharing.
#[derive(Clone)]
pub struct CachedTable {
    reader: Arc<Mutex<SSTableReader>>,
    file_number: u64,
}

impl CachedTable {
    fn new(reader: SSTableReader, file_number: u64) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
            file_number,
        }
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Access the reader with a closure.
    pub fn with_reader<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SSTableReader) -> R,
    {
        let mut reader = self.reader.lock();
        f(&mut reader)
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCacheStats {
    /// Lookups served by an open reader.
    pub hits: u64,
    /// Lookups that opened the file.
    pub misses: u64,
    /// Readers dropped to stay within capacity.
    pub evictions: u64,
    /// Readers currently open.
    pub open: usize,
}

struct Slot {
    table: CachedTable,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    tables: HashMap<u64, Slot>,
    tick: u64,
    stats: TableCacheStats,
}

/// Least-recently-used cache of open SSTable readers.
pub struct TableCache {
    base: PathBuf,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl TableCache {
    /// Create a cache resolving files under `base`, keeping at most
    /// `capacity` readers open.
    pub fn new(base: &Path, capacity: usize) -> Self {
        Self {
            base: base.to_path_buf(),
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Get or open the reader for `meta`.
    pub fn get(&self, meta: &SSTableMetadata) -> Result<CachedTable> {
        let file_number = meta.file_number();
        {
            let mut state = self.state.lock();
            state.tick += 1;
            let tick = state.tick;
            if let Some(slot) = state.tables.get_mut(&file_number) {
                slot.last_used = tick;
                let table = slot.table.clone();
                state.stats.hits += 1;
                return Ok(table);
            }
        }

        // Open outside the lock; a concurrent open of the same file keeps
        // whichever reader was inserted first.
        let reader = SSTableReader::open(&meta.absolute_path(&self.base))?;

        let mut state = self.state.lock();
        state.stats.misses += 1;
        state.tick += 1;
        let tick = state.tick;
        let table = state
            .tables
            .entry(file_number)
            .or_insert_with(|| Slot {
                table: CachedTable::new(reader, file_number),
                last_used: tick,
            })
            .table
            .clone();

        while state.tables.len() > self.capacity {
            let oldest = state
                .tables
                .iter()
                .filter(|(number, _)| **number != file_number)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(number, _)| *number);
            match oldest {
                Some(number) => {
                    state.tables.remove(&number);
                    state.stats.evictions += 1;
                }
                None => break,
            }
        }

        Ok(table)
    }

    /// Drop the reader of a deleted file.
    pub fn evict(&self, file_number: u64) {
        self.state.lock().tables.remove(&file_number);
    }

    /// Number of open readers.
    pub fn len(&self) -> usize {
        self.state.lock().tables.len()
    }

    /// Check if no reader is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> TableCacheStats {
        let state = self.state.lock();
        TableCacheStats {
            open: state.tables.len(),
            ..state.stats
        }
    }

    /// Close every reader.
    pub fn clear(&self) {
        self.state.lock().tables.clear();
    }
}

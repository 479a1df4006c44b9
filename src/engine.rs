//! Engine - the storage engine context.
//!
//! The Engine owns every component and coordinates:
//! - WAL for durability
//! - MemTable for in-memory writes
//! - SSTables for persistent storage
//! - TableDirectory for the catalog of files
//! - CompactionManager for background compaction
//!
//! # Thread Safety
//!
//! The Engine is thread-safe and can be shared across threads using Arc.
//! Reads run concurrently. Writes are serialized by a single guard held
//! across the WAL append, the memtable update and the flush check, so a
//! write is never visible before it is logged.

use std::fs::{File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::TableCacheStats;
use crate::catalog::{Catalog, TableDirectory};
use crate::compaction::{CompactionManager, CompactionTotals};
use crate::memtable::MemTable;
use crate::options::Options;
use crate::sstable::SSTableWriter;
use crate::types::{LookupResult, TimestampOracle, Value};
use crate::util::filename::{self, FileType};
use crate::wal::{WalReader, WalRecord, WalWriter};
use crate::{Error, Result};

/// Upper bound for a manual compaction run.
const MANUAL_COMPACTION_TIMEOUT: Duration = Duration::from_secs(600);

/// State guarded by the write mutex.
struct WriteState {
    /// WAL writer; `None` once the engine is closed.
    wal: Option<WalWriter>,
    /// Source of write timestamps.
    oracle: TimestampOracle,
}

/// The storage engine.
pub struct Engine {
    /// Base directory path.
    base: PathBuf,
    /// Engine options.
    options: Arc<Options>,
    /// Catalog of on-disk files.
    directory: Arc<TableDirectory>,
    /// Active memtable.
    memtable: MemTable,
    /// Serializes writes and flushes.
    write_state: Mutex<WriteState>,
    /// Background compaction.
    compaction: Arc<CompactionManager>,
    /// Whether the engine has been closed.
    closed: AtomicBool,
    /// Lock file handle (kept open to hold the lock).
    _lock_file: File,
}

impl Engine {
    /// Open an engine at the given path with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with_options(path, Options::default())
    }

    /// Open an engine with custom options.
    ///
    /// Loads the catalog, removes files it does not reference, replays the
    /// WAL into the memtable and starts compaction.
    pub fn open_with_options(path: impl AsRef<Path>, options: Options) -> Result<Arc<Self>> {
        options.validate()?;
        let base = path.as_ref().to_path_buf();
        let options = Arc::new(options);

        if !base.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(&base)?;
            } else {
                return Err(Error::InvalidArgument(format!(
                    "base directory does not exist: {}",
                    base.display()
                )));
            }
        }

        let lock_file = Self::acquire_lock(&base)?;
        let directory = Arc::new(TableDirectory::open(&base, Arc::clone(&options))?);
        let removed = Self::remove_orphans(&base, &directory.current())?;

        // Replay the log, then cut off any partial tail before appending.
        let wal_path = filename::wal_file_path(&base);
        let recovery = WalReader::recover(&wal_path)?;
        let mut wal = WalWriter::open(&wal_path, options.wal_batch_size)?;
        if recovery.discarded > 0 {
            wal.truncate_to(recovery.valid_len)?;
        }

        let memtable = MemTable::new(options.memtable_flush_threshold);
        // Flushed tables may hold timestamps ahead of the wall clock, so new
        // writes must start above everything already stored.
        let high_water = directory
            .current()
            .max_timestamp()
            .max(recovery.max_timestamp())
            .unwrap_or(0);
        let oracle = TimestampOracle::new(high_water);
        let replayed = recovery.records.len();
        for record in recovery.records {
            memtable.insert(record.key, record.value);
        }

        let compaction = CompactionManager::new(Arc::clone(&directory), Arc::clone(&options));
        compaction.start()?;

        let engine = Arc::new(Self {
            base,
            options,
            directory,
            memtable,
            write_state: Mutex::new(WriteState {
                wal: Some(wal),
                oracle,
            }),
            compaction,
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
        });

        info!(
            path = %engine.base.display(),
            files = engine.directory.current().total_files(),
            replayed,
            orphans_removed = removed,
            "opened engine"
        );

        if engine.memtable.should_flush() {
            engine.flush()?;
        }
        engine.compaction.notify();

        Ok(engine)
    }

    /// Acquire the directory lock file.
    fn acquire_lock(base: &Path) -> Result<File> {
        let lock_path = filename::lock_file_path(base);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::LockError(format!(
                    "Failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                return Err(Error::LockError(format!(
                    "{} is already locked by another process",
                    base.display()
                )));
            }
        }

        #[allow(unused_mut)]
        let mut lock_file = lock_file;
        writeln!(lock_file, "lsmstore lock").ok();

        Ok(lock_file)
    }

    /// Delete leftover temp files and SSTables the catalog does not list.
    fn remove_orphans(base: &Path, catalog: &Catalog) -> Result<usize> {
        let root = filename::sstable_root(base);
        let levels = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for level_entry in levels {
            let level_entry = level_entry?;
            let level = match level_entry.file_name().to_str().and_then(filename::parse_level_dir) {
                Some(level) => level,
                None => continue,
            };
            if !level_entry.file_type()?.is_dir() {
                continue;
            }

            for entry in std::fs::read_dir(level_entry.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let orphan = match name.to_str().and_then(filename::parse_file_name) {
                    Some((FileType::Temp, _)) => true,
                    Some((FileType::Table, Some(number))) => catalog
                        .level(level)
                        .and_then(|l| l.file(number))
                        .is_none(),
                    _ => false,
                };
                if orphan {
                    let path = entry.path();
                    warn!(path = %path.display(), "removing orphaned file");
                    filename::delete_file(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::EngineClosed);
        }
        Ok(())
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("key must not be empty"));
        }
        Ok(())
    }

    /// Put a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(key, Some(Bytes::copy_from_slice(value)))
    }

    /// Delete a key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(key, None)
    }

    fn write(&self, key: &[u8], payload: Option<Bytes>) -> Result<()> {
        self.check_open()?;
        Self::check_key(key)?;

        let mut guard = self.write_state.lock();
        let state = &mut *guard;
        let wal = state.wal.as_mut().ok_or(Error::EngineClosed)?;

        let value = Value::from_parts(payload, state.oracle.next());
        let record = WalRecord::new(Bytes::copy_from_slice(key), value);
        wal.append(&record)?;
        self.memtable.insert(record.key, record.value);

        if self.memtable.should_flush() {
            self.flush_locked(wal)?;
        }
        Ok(())
    }

    /// Flush the memtable to a new level-0 SSTable.
    ///
    /// The WAL is only truncated once the manifest naming the new file is
    /// durable. Returns false if the memtable was empty.
    fn flush_locked(&self, wal: &mut WalWriter) -> Result<bool> {
        let snapshot = self.memtable.snapshot();
        let meta = match SSTableWriter::new(&self.directory).write(&snapshot, 0)? {
            Some(meta) => meta,
            None => return Ok(false),
        };
        self.directory.sync()?;

        self.memtable.clear();
        wal.truncate()?;

        info!(
            file_number = meta.file_number(),
            entries = snapshot.len(),
            file_size = meta.file_size(),
            min_key = ?meta.min_key(),
            max_key = ?meta.max_key(),
            "flushed memtable"
        );
        self.compaction.notify();
        Ok(true)
    }

    /// Get the value for a key.
    ///
    /// Deleted and unknown keys both return `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_open()?;
        Self::check_key(key)?;

        match self.memtable.lookup(key) {
            LookupResult::Found(value) => return Ok(Some(value)),
            LookupResult::Deleted => return Ok(None),
            LookupResult::NotFound => {}
        }

        self.get_from_sstables(key)
    }

    fn get_from_sstables(&self, key: &[u8]) -> Result<Option<Bytes>> {
        // Files named by this catalog cannot be deleted while the guard is held.
        let _files = self.directory.read_files();
        let catalog = self.directory.current();

        for level in catalog.levels() {
            for file in level.files_for_key(key) {
                let table = self.directory.tables().get(file)?;
                let result = table.with_reader(|reader| reader.get(key))?;
                if result.is_resolved() {
                    debug!(level = level.level(), file_number = file.file_number(), "key resolved");
                    return Ok(result.into_option());
                }
            }
        }

        Ok(None)
    }

    /// Flush the memtable to disk.
    pub fn flush(&self) -> Result<()> {
        self.check_open()?;
        let mut guard = self.write_state.lock();
        let wal = guard.wal.as_mut().ok_or(Error::EngineClosed)?;
        self.flush_locked(wal)?;
        Ok(())
    }

    /// Flush, then compact until no level exceeds its budget.
    pub fn compact(&self) -> Result<()> {
        self.flush()?;
        self.compaction.compact_until_settled(MANUAL_COMPACTION_TIMEOUT)
    }

    /// Sync buffered WAL records to disk.
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        let mut guard = self.write_state.lock();
        match guard.wal.as_mut() {
            Some(wal) => wal.flush(),
            None => Err(Error::EngineClosed),
        }
    }

    /// Get engine statistics.
    pub fn stats(&self) -> EngineStats {
        let catalog = self.directory.current();
        let level_stats = catalog
            .levels()
            .iter()
            .map(|level| LevelStats {
                level: level.level(),
                num_files: level.len(),
                size_bytes: level.total_size(),
                max_bytes: level.max_size(),
            })
            .collect();

        EngineStats {
            memtable_size: self.memtable.size(),
            memtable_entries: self.memtable.len(),
            next_file_number: self.directory.peek_next_file_number(),
            level_stats,
            compaction: self.compaction.totals(),
            table_cache: self.directory.tables().stats(),
        }
    }

    /// Close the engine.
    ///
    /// Stops compaction, syncs the WAL and drains pending manifest saves.
    /// Unflushed writes stay in the WAL and are replayed on the next open.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.compaction.shutdown();

        let wal = self.write_state.lock().wal.take();
        let wal_result = match wal {
            Some(wal) => wal.close(),
            None => Ok(()),
        };
        let directory_result = self.directory.close();

        info!(path = %self.base.display(), "closed engine");
        wal_result.and(directory_result)
    }

    /// Get the base directory path.
    pub fn path(&self) -> &Path {
        &self.base
    }

    /// Get the engine options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Get the last background compaction error (if any).
    pub fn compaction_error(&self) -> Option<Error> {
        self.compaction.last_error()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing engine");
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Memtable size in bytes.
    pub memtable_size: usize,
    /// Number of keys in the memtable.
    pub memtable_entries: usize,
    /// Next file number to be allocated.
    pub next_file_number: u64,
    /// Per-level statistics.
    pub level_stats: Vec<LevelStats>,
    /// Compaction totals.
    pub compaction: CompactionTotals,
    /// Open SSTable reader counters.
    pub table_cache: TableCacheStats,
}

impl EngineStats {
    /// Total number of SSTables.
    pub fn total_files(&self) -> usize {
        self.level_stats.iter().map(|l| l.num_files).sum()
    }

    /// Total SSTable bytes.
    pub fn total_size(&self) -> u64 {
        self.level_stats.iter().map(|l| l.size_bytes).sum()
    }
}

/// Statistics for a single level.
#[derive(Debug, Clone)]
pub struct LevelStats {
    /// Level number.
    pub level: usize,
    /// Number of files at this level.
    pub num_files: usize,
    /// Total size in bytes.
    pub size_bytes: u64,
    /// Size budget in bytes.
    pub max_bytes: u64,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Engine Statistics:")?;
        writeln!(
            f,
            "  Memtable: {} bytes, {} keys",
            self.memtable_size, self.memtable_entries
        )?;
        writeln!(f, "  Next file number: {}", self.next_file_number)?;
        writeln!(
            f,
            "  Compactions: {} ({} failed), {} bytes written",
            self.compaction.compactions, self.compaction.failures, self.compaction.bytes_written
        )?;
        writeln!(
            f,
            "  Table cache: {} open, {} hits, {} misses",
            self.table_cache.open, self.table_cache.hits, self.table_cache.misses
        )?;
        writeln!(f, "  Levels:")?;
        for level in &self.level_stats {
            writeln!(
                f,
                "    L{}: {} files, {:.2} / {:.2} MB",
                level.level,
                level.num_files,
                level.size_bytes as f64 / (1024.0 * 1024.0),
                level.max_bytes as f64 / (1024.0 * 1024.0)
            )?;
        }
        Ok(())
    }
}

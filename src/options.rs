//! Configuration options for lsmstore.

use std::time::Duration;

/// Default number of levels in the LSM tree.
pub const DEFAULT_NUM_LEVELS: usize = 5;

/// Default memtable flush threshold (8MB).
pub const DEFAULT_MEMTABLE_FLUSH_THRESHOLD: usize = 8 * 1024 * 1024;

/// Default number of WAL records between forced syncs.
pub const DEFAULT_WAL_BATCH_SIZE: usize = 1000;

/// Default level-0 size budget (32MB).
pub const DEFAULT_LEVEL0_MAX_BYTES: u64 = 8 * 4 * 1024 * 1024;

/// Default level size multiplier.
pub const DEFAULT_LEVEL_MULTIPLIER: u64 = 10;

/// Default target size of a compaction output file (8MB).
pub const DEFAULT_TARGET_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// Default number of SSTable readers kept open.
pub const DEFAULT_MAX_OPEN_FILES: usize = 1000;

/// Default interval between compaction checks.
pub const DEFAULT_COMPACTION_CHECK_INTERVAL: Duration = Duration::from_millis(60 * 30);

/// Default grace period for draining compactions on shutdown.
pub const DEFAULT_COMPACTION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Storage engine configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    // === Storage ===
    /// Create the base directory if it doesn't exist.
    pub create_if_missing: bool,

    // === MemTable / WAL ===
    /// Memtable size (key + value bytes) at which it is flushed to level 0.
    pub memtable_flush_threshold: usize,

    /// Number of appended WAL records after which the log is synced.
    pub wal_batch_size: usize,

    // === Levels ===
    /// Number of levels, including level 0.
    pub num_levels: usize,

    /// Size budget of level 0.
    pub level0_max_bytes: u64,

    /// Budget multiplier applied per level.
    pub level_size_multiplier: u64,

    // === Compaction ===
    /// Size at which a compaction output file is rolled over.
    pub target_file_size: u64,

    /// Run the background compaction daemon.
    pub background_compaction: bool,

    /// Delay between two scheduled compaction checks.
    pub compaction_check_interval: Duration,

    /// How long shutdown waits for running compactions before cancelling.
    pub compaction_shutdown_timeout: Duration,

    // === Cache ===
    /// Maximum number of SSTable readers kept open.
    pub max_open_files: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            // Storage
            create_if_missing: true,

            // MemTable / WAL
            memtable_flush_threshold: DEFAULT_MEMTABLE_FLUSH_THRESHOLD,
            wal_batch_size: DEFAULT_WAL_BATCH_SIZE,

            // Levels
            num_levels: DEFAULT_NUM_LEVELS,
            level0_max_bytes: DEFAULT_LEVEL0_MAX_BYTES,
            level_size_multiplier: DEFAULT_LEVEL_MULTIPLIER,

            // Compaction
            target_file_size: DEFAULT_TARGET_FILE_SIZE,
            background_compaction: true,
            compaction_check_interval: DEFAULT_COMPACTION_CHECK_INTERVAL,
            compaction_shutdown_timeout: DEFAULT_COMPACTION_SHUTDOWN_TIMEOUT,

            // Cache
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.memtable_flush_threshold == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "memtable_flush_threshold must be positive".into(),
            ));
        }

        if self.wal_batch_size == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "wal_batch_size must be at least 1".into(),
            ));
        }

        if self.num_levels < 2 {
            return Err(crate::Error::InvalidConfiguration(
                "num_levels must be at least 2".into(),
            ));
        }

        if self.level_size_multiplier < 2 {
            return Err(crate::Error::InvalidConfiguration(
                "level_size_multiplier must be at least 2".into(),
            ));
        }

        if self.max_open_files == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "max_open_files must be at least 1".into(),
            ));
        }

        if self.level0_max_bytes == 0 || self.target_file_size == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "level0_max_bytes and target_file_size must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Calculate the size budget for a given level.
    ///
    /// Level 0 gets the base budget; each deeper level is `multiplier` times
    /// larger than the one above it.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut size = self.level0_max_bytes;
        for _ in 0..level {
            size = size.saturating_mul(self.level_size_multiplier);
        }
        size
    }

    /// Index of the deepest level.
    pub fn last_level(&self) -> usize {
        self.num_levels - 1
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set create_if_missing.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.options.create_if_missing = value;
        self
    }

    /// Set the memtable flush threshold.
    pub fn memtable_flush_threshold(mut self, size: usize) -> Self {
        self.options.memtable_flush_threshold = size;
        self
    }

    /// Set the WAL sync batch size.
    pub fn wal_batch_size(mut self, records: usize) -> Self {
        self.options.wal_batch_size = records;
        self
    }

    /// Set the number of levels.
    pub fn num_levels(mut self, levels: usize) -> Self {
        self.options.num_levels = levels;
        self
    }

    /// Set the level-0 size budget.
    pub fn level0_max_bytes(mut self, bytes: u64) -> Self {
        self.options.level0_max_bytes = bytes;
        self
    }

    /// Set the per-level budget multiplier.
    pub fn level_size_multiplier(mut self, multiplier: u64) -> Self {
        self.options.level_size_multiplier = multiplier;
        self
    }

    /// Set the compaction output file size.
    pub fn target_file_size(mut self, bytes: u64) -> Self {
        self.options.target_file_size = bytes;
        self
    }

    /// Enable or disable the background compaction daemon.
    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.options.background_compaction = enabled;
        self
    }

    /// Set the compaction check interval.
    pub fn compaction_check_interval(mut self, interval: Duration) -> Self {
        self.options.compaction_check_interval = interval;
        self
    }

    /// Set the shutdown grace period for compactions.
    pub fn compaction_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options.compaction_shutdown_timeout = timeout;
        self
    }

    /// Set the number of SSTable readers kept open.
    pub fn max_open_files(mut self, files: usize) -> Self {
        self.options.max_open_files = files;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

//! # lsmstore
//!
//! An embedded LSM-tree key-value storage engine with leveled compaction.
//!
//! ## Features
//!
//! - **LSM-Tree Storage**: Optimized for write-heavy workloads
//! - **Durability**: Every write is logged before it becomes visible
//! - **Leveled Compaction**: Background merging keeps every level in budget
//! - **Crash Recovery**: WAL replay and atomic manifest replacement
//! - **Concurrent Access**: Multiple readers, serialized writers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lsmstore::{Engine, Options};
//!
//! // Open engine
//! let engine = Engine::open("./my_data")?;
//!
//! // Basic operations
//! engine.put(b"hello", b"world")?;
//! let value = engine.get(b"hello")?;
//! engine.delete(b"hello")?;
//!
//! // Persist the memtable and push data down the levels
//! engine.compact()?;
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <base>/LOCK
//! <base>/wal.log
//! <base>/manifest.json
//! <base>/sstables/L<level>/<file number>.sst
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod types;

// Engine module
mod engine;

// Storage components
pub mod cache;
pub mod catalog;
pub mod compaction;
pub mod memtable;
pub mod sstable;
pub mod wal;

// Internal modules
mod util;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, OptionsBuilder};
pub use types::{Entry, LookupResult, Value};

// Engine
pub use engine::{Engine, EngineStats, LevelStats};

pub use cache::TableCacheStats;

// Compaction (re-export useful types)
pub use compaction::{CompactionStats, CompactionTotals};

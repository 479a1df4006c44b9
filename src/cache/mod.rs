//! Caching of open SSTable readers.

mod table_cache;

pub use table_cache::{CachedTable, TableCache, TableCacheStats};

//! The table directory: owner of the catalog and its persistence.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::cache::TableCache;
use crate::options::Options;
use crate::util::filename;
use crate::{Error, Result};

use super::{Catalog, CatalogEdit, LevelMetadata, ManifestDocument, ManifestSaver, SSTableMetadata};

/// Tracks which SSTables belong to which level.
///
/// The current [`Catalog`] is an immutable snapshot that readers load
/// without blocking. Every structural change builds a new snapshot under
/// the edit lock, installs it, and schedules a manifest save.
pub struct TableDirectory {
    /// Base directory.
    base: PathBuf,
    /// Engine options.
    options: Arc<Options>,
    /// Current catalog (atomically swappable).
    current: ArcSwap<Catalog>,
    /// Serializes catalog edits.
    edit_lock: Mutex<()>,
    /// Next file number to allocate.
    next_file_number: AtomicU64,
    /// Readers of SSTable files hold this shared; deleting files holds it
    /// exclusively.
    files_lock: RwLock<()>,
    /// Manifest writer.
    saver: ManifestSaver,
    /// Open readers of live files.
    tables: TableCache,
}

impl TableDirectory {
    /// Load the catalog under `base`, creating an empty one if no manifest
    /// exists yet.
    pub fn open(base: &Path, options: Arc<Options>) -> Result<Self> {
        let manifest_path = filename::manifest_file_path(base);
        let saver = ManifestSaver::start(manifest_path.clone())?;

        let (catalog, next_file_number, fresh) = match ManifestDocument::load(&manifest_path)? {
            Some(doc) => {
                let (catalog, next) = Self::catalog_from_document(doc, &options)?;
                (catalog, next, false)
            }
            None => {
                let levels = (0..options.num_levels)
                    .map(|level| LevelMetadata::new(level, options.max_bytes_for_level(level)))
                    .collect();
                (Catalog::new(levels), 1, true)
            }
        };

        let tables = TableCache::new(base, options.max_open_files);
        let directory = Self {
            base: base.to_path_buf(),
            options,
            current: ArcSwap::from_pointee(catalog),
            edit_lock: Mutex::new(()),
            next_file_number: AtomicU64::new(next_file_number),
            files_lock: RwLock::new(()),
            saver,
            tables,
        };

        if fresh {
            directory.saver.save_sync(directory.document(&directory.current()))?;
            info!(path = %manifest_path.display(), "created new manifest");
        } else {
            let current = directory.current();
            info!(
                files = current.total_files(),
                next_file_number,
                "loaded manifest"
            );
        }

        Ok(directory)
    }

    fn catalog_from_document(doc: ManifestDocument, options: &Options) -> Result<(Catalog, u64)> {
        let mut levels: Vec<LevelMetadata> = (0..options.num_levels)
            .map(|level| LevelMetadata::new(level, options.max_bytes_for_level(level)))
            .collect();

        for (index, mut stored) in doc.levels.into_iter().enumerate() {
            if stored.level() != index {
                return Err(Error::manifest(format!(
                    "level {} stored at position {}",
                    stored.level(),
                    index
                )));
            }
            if index >= options.num_levels {
                if stored.is_empty() {
                    continue;
                }
                return Err(Error::InvalidConfiguration(format!(
                    "manifest has files at level {} but num_levels is {}",
                    index, options.num_levels
                )));
            }
            if let Some(file) = stored.files().iter().find(|f| f.level() != index) {
                return Err(Error::manifest(format!(
                    "file {} claims level {} but is listed in level {}",
                    file.file_number(),
                    file.level(),
                    index
                )));
            }
            stored.set_level(index);
            stored.set_max_size(options.max_bytes_for_level(index));
            stored.recompute_total_size();
            stored.reset_runtime_state();
            stored.sort();
            levels[index] = stored;
        }

        let catalog = Catalog::new(levels);
        let next = catalog
            .max_file_number()
            .map_or(1, |n| n + 1)
            .max(doc.next_file_number);
        Ok((catalog, next))
    }

    /// Cache of open SSTable readers.
    pub fn tables(&self) -> &TableCache {
        &self.tables
    }

    /// Get the options the directory was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Get the current catalog.
    pub fn current(&self) -> Arc<Catalog> {
        self.current.load_full()
    }

    /// Files at one level, sorted by min key.
    pub fn sstables_at_level(&self, level: usize) -> Vec<SSTableMetadata> {
        self.current()
            .level(level)
            .map(|l| l.files().to_vec())
            .unwrap_or_default()
    }

    /// Every level.
    pub fn all_levels(&self) -> Vec<LevelMetadata> {
        self.current().levels().to_vec()
    }

    /// Resolve a file's location.
    pub fn absolute_path(&self, meta: &SSTableMetadata) -> PathBuf {
        meta.absolute_path(&self.base)
    }

    /// Allocate the next file number.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Peek at the next file number without allocating it.
    pub fn peek_next_file_number(&self) -> u64 {
        self.next_file_number.load(Ordering::SeqCst)
    }

    /// Canonical path of a file at a level.
    pub fn generate_path(&self, level: usize, file_number: u64) -> PathBuf {
        filename::table_file_path(&self.base, level, file_number)
    }

    /// Allocate a file number and its path, creating the level directory.
    pub fn allocate_file(&self, level: usize) -> Result<(u64, PathBuf)> {
        self.check_level(level)?;
        let number = self.next_file_number();
        std::fs::create_dir_all(filename::level_dir(&self.base, level))?;
        Ok((number, self.generate_path(level, number)))
    }

    /// Register a new file at `level`.
    pub fn add_sstable(&self, level: usize, meta: SSTableMetadata) -> Result<()> {
        self.apply(CatalogEdit::new().add_file(level, meta))
    }

    /// Remove files from `level`.
    pub fn remove_sstables(&self, level: usize, metas: &[SSTableMetadata]) -> Result<()> {
        let mut edit = CatalogEdit::new();
        for meta in metas {
            edit = edit.remove_file(level, meta.file_number());
        }
        self.apply(edit)
    }

    /// Apply an edit as one catalog change with one manifest save.
    pub fn apply(&self, edit: CatalogEdit) -> Result<()> {
        let _guard = self.edit_lock.lock();
        let mut catalog = Catalog::clone(&self.current());

        for (level, file_number) in &edit.removed {
            self.check_level(*level)?;
            if let Some(l) = catalog.level_mut(*level) {
                if l.remove(&[*file_number]) == 0 {
                    debug!(level, file_number, "removed file was not registered");
                }
            }
        }
        for (level, meta) in edit.added {
            self.check_level(level)?;
            if meta.level() != level {
                return Err(Error::invalid_argument(format!(
                    "file {} belongs to level {}, not {}",
                    meta.file_number(),
                    meta.level(),
                    level
                )));
            }
            if let Some(l) = catalog.level_mut(level) {
                l.add(meta);
            }
        }

        // Publish only once the save is queued, so a refused save leaves
        // the visible catalog unchanged.
        self.saver.schedule(self.document(&catalog))?;
        self.current.store(Arc::new(catalog));
        Ok(())
    }

    /// Set or clear the being-compacted flag on files.
    ///
    /// Runtime-only state: no manifest save is scheduled.
    pub fn set_being_compacted(&self, files: &[SSTableMetadata], value: bool) {
        let _guard = self.edit_lock.lock();
        let mut catalog = Catalog::clone(&self.current());
        for file in files {
            if let Some(level) = catalog.level_mut(file.level()) {
                level.set_being_compacted(file.file_number(), value);
            }
        }
        self.current.store(Arc::new(catalog));
    }

    /// Wait until every scheduled manifest save is durable.
    pub fn sync(&self) -> Result<()> {
        self.saver.wait_idle()
    }

    /// Shared guard held while reading SSTable files.
    pub fn read_files(&self) -> RwLockReadGuard<'_, ()> {
        self.files_lock.read()
    }

    /// Exclusive guard held while deleting SSTable files.
    pub fn write_files(&self) -> RwLockWriteGuard<'_, ()> {
        self.files_lock.write()
    }

    /// Flush pending manifest saves and stop the save worker.
    pub fn close(&self) -> Result<()> {
        self.tables.clear();
        self.saver.shutdown()
    }

    fn check_level(&self, level: usize) -> Result<()> {
        if level >= self.options.num_levels {
            return Err(Error::invalid_argument(format!(
                "level {} out of range (num_levels = {})",
                level, self.options.num_levels
            )));
        }
        Ok(())
    }

    fn document(&self, catalog: &Catalog) -> ManifestDocument {
        ManifestDocument {
            next_file_number: self.peek_next_file_number(),
            levels: catalog.levels().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn options() -> Arc<Options> {
        Arc::new(Options::default())
    }

    fn meta(dir: &TableDirectory, level: usize, min: &str, max: &str) -> SSTableMetadata {
        let (number, _) = dir.allocate_file(level).unwrap();
        SSTableMetadata::new(
            number,
            level,
            Bytes::from(min.to_string()),
            Bytes::from(max.to_string()),
            100,
        )
    }

    #[test]
    fn test_directory_fresh() {
        let tmp = tempdir().unwrap();
        let dir = TableDirectory::open(tmp.path(), options()).unwrap();

        assert!(filename::manifest_file_path(tmp.path()).exists());
        let levels = dir.all_levels();
        assert_eq!(levels.len(), 5);
        assert_eq!(levels[1].max_size(), 320 * 1024 * 1024);
        assert!(levels.iter().all(|l| l.is_empty()));
        dir.close().unwrap();
    }

    #[test]
    fn test_directory_add_remove_persist() {
        let tmp = tempdir().unwrap();
        let (first, second) = {
            let dir = TableDirectory::open(tmp.path(), options()).unwrap();
            let a = meta(&dir, 1, "m", "p");
            let b = meta(&dir, 1, "a", "c");
            dir.add_sstable(1, a.clone()).unwrap();
            dir.add_sstable(1, b.clone()).unwrap();

            let files = dir.sstables_at_level(1);
            assert_eq!(files[0].file_number(), b.file_number());
            assert_eq!(dir.current().level(1).unwrap().total_size(), 200);

            dir.remove_sstables(1, &[a.clone()]).unwrap();
            dir.close().unwrap();
            (a, b)
        };

        let dir = TableDirectory::open(tmp.path(), options()).unwrap();
        let files = dir.sstables_at_level(1);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_number(), second.file_number());
        assert_eq!(files[0].min_key(), &Bytes::from("a"));
        assert_eq!(dir.current().level(1).unwrap().total_size(), 100);
        // File numbers are never reused across restarts.
        assert!(dir.peek_next_file_number() > first.file_number().max(second.file_number()));
        dir.close().unwrap();
    }

    #[test]
    fn test_directory_apply_edit_atomically() {
        let tmp = tempdir().unwrap();
        let dir = TableDirectory::open(tmp.path(), options()).unwrap();

        let l0 = meta(&dir, 0, "a", "z");
        dir.add_sstable(0, l0.clone()).unwrap();

        let l1 = meta(&dir, 1, "a", "z");
        dir.apply(CatalogEdit::new().remove_file(0, l0.file_number()).add_file(1, l1))
            .unwrap();
        dir.sync().unwrap();

        let current = dir.current();
        assert!(current.level(0).unwrap().is_empty());
        assert_eq!(current.level(1).unwrap().len(), 1);
        dir.close().unwrap();
    }

    #[test]
    fn test_directory_refused_edit_is_not_published() {
        let tmp = tempdir().unwrap();
        let dir = TableDirectory::open(tmp.path(), options()).unwrap();
        let kept = meta(&dir, 1, "a", "c");
        dir.add_sstable(1, kept.clone()).unwrap();
        dir.close().unwrap();

        let added = meta(&dir, 1, "d", "f");
        let edit = CatalogEdit::new()
            .remove_file(1, kept.file_number())
            .add_file(1, added);
        assert!(matches!(dir.apply(edit), Err(Error::EngineClosed)));

        let files = dir.sstables_at_level(1);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_number(), kept.file_number());
    }

    #[test]
    fn test_directory_being_compacted_reset_on_load() {
        let tmp = tempdir().unwrap();
        {
            let dir = TableDirectory::open(tmp.path(), options()).unwrap();
            let m = meta(&dir, 2, "a", "b");
            dir.add_sstable(2, m.clone()).unwrap();
            dir.set_being_compacted(&[m.clone()], true);
            assert!(dir.sstables_at_level(2)[0].being_compacted());
            // Force a save that includes the flag.
            dir.add_sstable(2, meta(&dir, 2, "c", "d")).unwrap();
            dir.close().unwrap();
        }

        let dir = TableDirectory::open(tmp.path(), options()).unwrap();
        assert!(dir.sstables_at_level(2).iter().all(|f| !f.being_compacted()));
        dir.close().unwrap();
    }

    #[test]
    fn test_directory_rejects_bad_level() {
        let tmp = tempdir().unwrap();
        let dir = TableDirectory::open(tmp.path(), options()).unwrap();
        assert!(dir.allocate_file(5).is_err());
        dir.close().unwrap();
    }

    #[test]
    fn test_directory_paths() {
        let tmp = tempdir().unwrap();
        let dir = TableDirectory::open(tmp.path(), options()).unwrap();

        let (n, path) = dir.allocate_file(3).unwrap();
        assert_eq!(path, tmp.path().join(format!("sstables/L3/{}.sst", n)));
        assert!(tmp.path().join("sstables/L3").is_dir());
        assert_eq!(dir.next_file_number(), n + 1);
        dir.close().unwrap();
    }
}

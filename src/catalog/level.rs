//! Levels and the immutable catalog snapshot built from them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::SSTableMetadata;

/// One level of the LSM tree.
///
/// Files are kept sorted by `min_key`. Levels above 0 additionally hold
/// pairwise disjoint key ranges, which makes binary search valid there;
/// level 0 files may overlap and are resolved by file number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelMetadata {
    /// Level number.
    level: usize,
    /// Size budget.
    max_size: u64,
    /// Sum of member file sizes.
    total_size: u64,
    /// Member files, sorted by min key.
    sstables: Vec<SSTableMetadata>,
}

impl LevelMetadata {
    /// Create an empty level.
    pub fn new(level: usize, max_size: u64) -> Self {
        Self {
            level,
            max_size,
            total_size: 0,
            sstables: Vec::new(),
        }
    }

    /// Get the level number.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Get the size budget.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Get the total size of member files.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Get the member files, sorted by min key.
    pub fn files(&self) -> &[SSTableMetadata] {
        &self.sstables
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.sstables.len()
    }

    /// Check if the level has no files.
    pub fn is_empty(&self) -> bool {
        self.sstables.is_empty()
    }

    /// Check if the level has outgrown its budget.
    pub fn exceeds_budget(&self) -> bool {
        self.total_size > self.max_size
    }

    /// Look up a file by number.
    pub fn file(&self, file_number: u64) -> Option<&SSTableMetadata> {
        self.sstables.iter().find(|f| f.file_number() == file_number)
    }

    /// Insert a file and restore the min-key order.
    pub fn add(&mut self, meta: SSTableMetadata) {
        self.total_size += meta.file_size();
        self.sstables.push(meta);
        self.sort();
    }

    /// Remove files by number. Returns how many were removed.
    pub fn remove(&mut self, file_numbers: &[u64]) -> usize {
        let before = self.sstables.len();
        self.sstables
            .retain(|f| !file_numbers.contains(&f.file_number()));
        self.recompute_total_size();
        before - self.sstables.len()
    }

    /// Set the being-compacted flag on a file. Returns false if absent.
    pub fn set_being_compacted(&mut self, file_number: u64, value: bool) -> bool {
        match self
            .sstables
            .iter_mut()
            .find(|f| f.file_number() == file_number)
        {
            Some(file) => {
                file.set_being_compacted(value);
                true
            }
            None => false,
        }
    }

    /// Files that may hold `key`, in the order they must be consulted.
    ///
    /// Level 0: every file whose range contains the key, newest first.
    /// Other levels: at most one file, found by binary search.
    pub fn files_for_key(&self, key: &[u8]) -> Vec<&SSTableMetadata> {
        if self.level == 0 {
            let mut files: Vec<_> = self
                .sstables
                .iter()
                .filter(|f| f.contains_key(key))
                .collect();
            files.sort_by(|a, b| b.file_number().cmp(&a.file_number()));
            return files;
        }

        let pos = self
            .sstables
            .partition_point(|f| f.max_key().as_ref() < key);
        match self.sstables.get(pos) {
            Some(file) if file.min_key().as_ref() <= key => vec![file],
            _ => Vec::new(),
        }
    }

    /// Files whose range intersects `[min, max]`, in min-key order.
    pub fn overlapping(&self, min: &[u8], max: &[u8]) -> Vec<&SSTableMetadata> {
        self.sstables
            .iter()
            .filter(|f| f.overlaps(min, max))
            .collect()
    }

    /// Smallest and largest key across all files.
    pub fn key_range(&self) -> Option<(Bytes, Bytes)> {
        let min = self.sstables.iter().map(|f| f.min_key()).min()?;
        let max = self.sstables.iter().map(|f| f.max_key()).max()?;
        Some((min.clone(), max.clone()))
    }

    pub(crate) fn set_max_size(&mut self, max_size: u64) {
        self.max_size = max_size;
    }

    pub(crate) fn set_level(&mut self, level: usize) {
        self.level = level;
    }

    pub(crate) fn reset_runtime_state(&mut self) {
        for file in &mut self.sstables {
            file.reset_runtime_state();
        }
    }

    pub(crate) fn recompute_total_size(&mut self) {
        self.total_size = self.sstables.iter().map(|f| f.file_size()).sum();
    }

    pub(crate) fn sort(&mut self) {
        self.sstables.sort_by(|a, b| {
            a.min_key()
                .cmp(b.min_key())
                .then(a.file_number().cmp(&b.file_number()))
        });
    }
}

/// Immutable snapshot of every level.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    levels: Vec<LevelMetadata>,
}

impl Catalog {
    /// Create a catalog from its levels, indexed by level number.
    pub fn new(levels: Vec<LevelMetadata>) -> Self {
        Self { levels }
    }

    /// Get all levels.
    pub fn levels(&self) -> &[LevelMetadata] {
        &self.levels
    }

    /// Get one level.
    pub fn level(&self, level: usize) -> Option<&LevelMetadata> {
        self.levels.get(level)
    }

    pub(crate) fn level_mut(&mut self, level: usize) -> Option<&mut LevelMetadata> {
        self.levels.get_mut(level)
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Total number of files across all levels.
    pub fn total_files(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    /// Total size across all levels.
    pub fn total_size(&self) -> u64 {
        self.levels.iter().map(|l| l.total_size()).sum()
    }

    /// Iterate every file with its level.
    pub fn all_files(&self) -> impl Iterator<Item = &SSTableMetadata> {
        self.levels.iter().flat_map(|l| l.files().iter())
    }

    /// Largest file number referenced.
    pub fn max_file_number(&self) -> Option<u64> {
        self.all_files().map(|f| f.file_number()).max()
    }

    /// Newest write timestamp stored in any file.
    pub fn max_timestamp(&self) -> Option<i64> {
        self.all_files().map(|f| f.max_timestamp()).max()
    }

    /// Check if any level below `level` holds a file overlapping `[min, max]`.
    pub fn deeper_levels_overlap(&self, level: usize, min: &[u8], max: &[u8]) -> bool {
        self.levels
            .iter()
            .skip(level + 1)
            .any(|l| l.files().iter().any(|f| f.overlaps(min, max)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(level: usize, n: u64, min: &str, max: &str, size: u64) -> SSTableMetadata {
        SSTableMetadata::new(
            n,
            level,
            Bytes::from(min.to_string()),
            Bytes::from(max.to_string()),
            size,
        )
    }

    #[test]
    fn test_level_add_sorts_and_sizes() {
        let mut level = LevelMetadata::new(1, 1000);
        level.add(meta(1, 1, "m", "p", 100));
        level.add(meta(1, 2, "a", "c", 200));
        level.add(meta(1, 3, "d", "f", 300));

        let mins: Vec<_> = level.files().iter().map(|f| f.min_key().clone()).collect();
        assert_eq!(mins, vec![Bytes::from("a"), Bytes::from("d"), Bytes::from("m")]);
        assert_eq!(level.total_size(), 600);
        assert!(!level.exceeds_budget());

        level.add(meta(1, 4, "x", "z", 401));
        assert!(level.exceeds_budget());
    }

    #[test]
    fn test_level_remove_by_file_number() {
        let mut level = LevelMetadata::new(1, 1000);
        level.add(meta(1, 1, "a", "b", 10));
        level.add(meta(1, 2, "c", "d", 20));

        assert_eq!(level.remove(&[1, 99]), 1);
        assert_eq!(level.len(), 1);
        assert_eq!(level.total_size(), 20);
    }

    #[test]
    fn test_level0_lookup_newest_first() {
        let mut level = LevelMetadata::new(0, 1000);
        level.add(meta(0, 5, "a", "m", 10));
        level.add(meta(0, 9, "c", "z", 10));
        level.add(meta(0, 7, "b", "d", 10));

        let order: Vec<_> = level.files_for_key(b"c").iter().map(|f| f.file_number()).collect();
        assert_eq!(order, vec![9, 7, 5]);

        let order: Vec<_> = level.files_for_key(b"n").iter().map(|f| f.file_number()).collect();
        assert_eq!(order, vec![9]);
    }

    #[test]
    fn test_level_binary_search_inclusive() {
        let mut level = LevelMetadata::new(2, 1000);
        level.add(meta(2, 1, "a", "c", 10));
        level.add(meta(2, 2, "e", "g", 10));
        level.add(meta(2, 3, "k", "m", 10));

        assert_eq!(level.files_for_key(b"a")[0].file_number(), 1);
        assert_eq!(level.files_for_key(b"g")[0].file_number(), 2);
        assert_eq!(level.files_for_key(b"k")[0].file_number(), 3);
        assert!(level.files_for_key(b"d").is_empty());
        assert!(level.files_for_key(b"z").is_empty());
        assert!(level.files_for_key(b"0").is_empty());
    }

    #[test]
    fn test_level_overlapping() {
        let mut level = LevelMetadata::new(1, 1000);
        level.add(meta(1, 1, "a", "c", 10));
        level.add(meta(1, 2, "e", "g", 10));
        level.add(meta(1, 3, "k", "m", 10));

        let hits: Vec<_> = level.overlapping(b"c", b"e").iter().map(|f| f.file_number()).collect();
        assert_eq!(hits, vec![1, 2]);
        assert!(level.overlapping(b"h", b"j").is_empty());
        assert_eq!(level.key_range(), Some((Bytes::from("a"), Bytes::from("m"))));
    }

    #[test]
    fn test_catalog_deeper_overlap() {
        let mut l0 = LevelMetadata::new(0, 10);
        l0.add(meta(0, 1, "a", "z", 5));
        let l1 = LevelMetadata::new(1, 100);
        let mut l2 = LevelMetadata::new(2, 1000);
        l2.add(meta(2, 2, "p", "q", 5));

        let catalog = Catalog::new(vec![l0, l1, l2]);
        assert!(catalog.deeper_levels_overlap(0, b"a", b"z"));
        assert!(catalog.deeper_levels_overlap(1, b"q", b"r"));
        assert!(!catalog.deeper_levels_overlap(1, b"a", b"o"));
        assert!(!catalog.deeper_levels_overlap(2, b"a", b"z"));
        assert_eq!(catalog.total_files(), 2);
        assert_eq!(catalog.max_file_number(), Some(2));
    }

    #[test]
    fn test_catalog_max_timestamp() {
        assert_eq!(Catalog::new(vec![LevelMetadata::new(0, 10)]).max_timestamp(), None);

        let mut l0 = LevelMetadata::new(0, 10);
        l0.add(meta(0, 3, "a", "b", 5).with_max_timestamp(70));
        let mut l1 = LevelMetadata::new(1, 100);
        l1.add(meta(1, 1, "a", "c", 5).with_max_timestamp(900));
        l1.add(meta(1, 2, "d", "f", 5).with_max_timestamp(40));

        let catalog = Catalog::new(vec![l0, l1]);
        assert_eq!(catalog.max_timestamp(), Some(900));
    }
}

//! Integration tests for complete engine workflows.

use std::fs::OpenOptions;
use std::io::Write;

use bytes::Bytes;
use lsmstore::catalog::ManifestDocument;
use lsmstore::compaction::MergeIterator;
use lsmstore::sstable::{SSTableReader, SSTableStreamWriter};
use lsmstore::wal::{WalReader, WalRecord, WalWriter};
use lsmstore::{Engine, Entry, Error, LookupResult, Options, OptionsBuilder, Value};
use tempfile::TempDir;

fn manual_options() -> OptionsBuilder {
    OptionsBuilder::new().background_compaction(false)
}

/// Test complete CRUD workflow.
#[test]
fn integration_crud_workflow() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path()).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    assert_eq!(engine.get(b"a").unwrap(), Some(Bytes::from("1")));
    assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from("2")));

    engine.delete(b"a").unwrap();
    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from("2")));

    // Update
    engine.put(b"b", b"22").unwrap();
    assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from("22")));
}

/// Test that crossing the memtable threshold flushes exactly one file.
#[test]
fn integration_flush_on_threshold() {
    let dir = TempDir::new().unwrap();
    let opts = manual_options().memtable_flush_threshold(100).build().unwrap();
    let engine = Engine::open_with_options(dir.path(), opts).unwrap();

    // 2-byte keys with 20-byte values: the fifth put reaches 110 bytes.
    for i in 0..4 {
        engine.put(format!("k{}", i).as_bytes(), &[b'v'; 20]).unwrap();
    }
    assert_eq!(engine.stats().total_files(), 0);

    engine.put(b"k4", &[b'v'; 20]).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.level_stats[0].num_files, 1);
    assert_eq!(stats.memtable_size, 0);
    assert_eq!(stats.memtable_entries, 0);

    let wal_len = std::fs::metadata(dir.path().join("wal.log")).unwrap().len();
    assert_eq!(wal_len, 0);

    let doc = ManifestDocument::load(&dir.path().join("manifest.json"))
        .unwrap()
        .unwrap();
    let file = &doc.levels[0].files()[0];
    assert_eq!(file.min_key(), &Bytes::from("k0"));
    assert_eq!(file.max_key(), &Bytes::from("k4"));
    assert!(dir.path().join(file.file_path()).exists());

    for i in 0..5 {
        assert_eq!(
            engine.get(format!("k{}", i).as_bytes()).unwrap(),
            Some(Bytes::from(vec![b'v'; 20]))
        );
    }
}

/// Test persistence across reopen.
#[test]
fn integration_persistence() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(dir.path()).unwrap();
        for i in 0..100 {
            let key = format!("persist:{:04}", i);
            let value = format!("value:{}", i);
            engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        engine.flush().unwrap();
        engine.put(b"unflushed", b"still here").unwrap();
    }

    {
        let engine = Engine::open(dir.path()).unwrap();
        for i in 0..100 {
            let key = format!("persist:{:04}", i);
            let expected = format!("value:{}", i);
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(Bytes::from(expected)));
        }
        assert_eq!(engine.get(b"unflushed").unwrap(), Some(Bytes::from("still here")));
    }
}

/// Test that a torn WAL tail is dropped on recovery.
#[test]
fn integration_wal_recovery_partial_tail() {
    let dir = TempDir::new().unwrap();
    let wal_path = dir.path().join("wal.log");

    {
        let engine = Engine::open(dir.path()).unwrap();
        engine.put(b"r1", b"one").unwrap();
        engine.put(b"r2", b"two").unwrap();
        engine.delete(b"r1").unwrap();
        engine.put(b"r3", b"three").unwrap();
    }
    let valid_len = std::fs::metadata(&wal_path).unwrap().len();

    // Half a record header.
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[0, 0, 0, 5, 0, 0]).unwrap();
    drop(file);

    {
        let engine = Engine::open(dir.path()).unwrap();
        assert_eq!(engine.get(b"r1").unwrap(), None);
        assert_eq!(engine.get(b"r2").unwrap(), Some(Bytes::from("two")));
        assert_eq!(engine.get(b"r3").unwrap(), Some(Bytes::from("three")));
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), valid_len);

        // New writes land after the valid prefix.
        engine.put(b"r4", b"four").unwrap();
    }

    let engine = Engine::open(dir.path()).unwrap();
    assert_eq!(engine.get(b"r4").unwrap(), Some(Bytes::from("four")));
    assert_eq!(engine.get(b"r2").unwrap(), Some(Bytes::from("two")));
}

/// Test WAL replay order directly.
#[test]
fn integration_wal_replay_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal.log");

    let records: Vec<WalRecord> = (0..50)
        .map(|i| {
            let value = if i % 7 == 0 {
                Value::tombstone(i)
            } else {
                Value::new(Bytes::from(format!("v{}", i)), i)
            };
            WalRecord::new(Bytes::from(format!("key{}", i % 10)), value)
        })
        .collect();

    let mut writer = WalWriter::open(&path, 8).unwrap();
    for record in &records {
        writer.append(record).unwrap();
    }
    writer.close().unwrap();

    let recovery = WalReader::recover(&path).unwrap();
    assert_eq!(recovery.records, records);
    assert_eq!(recovery.discarded, 0);
}

/// Test that a tombstone hides older data in deeper levels.
#[test]
fn integration_tombstone_precedence() {
    let dir = TempDir::new().unwrap();
    let opts = manual_options()
        .level0_max_bytes(1)
        .num_levels(3)
        .build()
        .unwrap();
    let engine = Engine::open_with_options(dir.path(), opts).unwrap();

    engine.put(b"doomed", b"payload").unwrap();
    engine.put(b"kept", b"payload").unwrap();
    engine.compact().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.level_stats[0].num_files, 0);
    assert!(stats.total_files() > 0);

    engine.delete(b"doomed").unwrap();
    assert_eq!(engine.get(b"doomed").unwrap(), None);

    engine.flush().unwrap();
    assert_eq!(engine.get(b"doomed").unwrap(), None);

    engine.compact().unwrap();
    assert_eq!(engine.get(b"doomed").unwrap(), None);
    assert_eq!(engine.get(b"kept").unwrap(), Some(Bytes::from("payload")));
}

/// Test that overlapping level-0 files resolve by recency.
#[test]
fn integration_level0_recency() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open_with_options(dir.path(), manual_options().build().unwrap()).unwrap();

    engine.put(b"a", b"old").unwrap();
    engine.put(b"z", b"old").unwrap();
    engine.flush().unwrap();

    // Narrower range, newer file.
    engine.put(b"m", b"new").unwrap();
    engine.put(b"z", b"new").unwrap();
    engine.flush().unwrap();

    engine.put(b"a", b"newest").unwrap();
    engine.put(b"b", b"x").unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.stats().level_stats[0].num_files, 3);
    assert_eq!(engine.get(b"a").unwrap(), Some(Bytes::from("newest")));
    assert_eq!(engine.get(b"z").unwrap(), Some(Bytes::from("new")));
    assert_eq!(engine.get(b"m").unwrap(), Some(Bytes::from("new")));
}

/// Test compaction across several levels.
#[test]
fn integration_compaction() {
    let dir = TempDir::new().unwrap();
    let opts = manual_options()
        .memtable_flush_threshold(1024)
        .level0_max_bytes(4096)
        .level_size_multiplier(2)
        .num_levels(4)
        .target_file_size(2048)
        .build()
        .unwrap();
    let engine = Engine::open_with_options(dir.path(), opts.clone()).unwrap();

    for round in 0..3 {
        for i in 0..600 {
            let key = format!("key{:05}", i);
            let value = format!("value-{}-{:024}", round, i);
            engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
    }
    for i in (0..600).step_by(5) {
        engine.delete(format!("key{:05}", i).as_bytes()).unwrap();
    }

    engine.compact().unwrap();

    let stats = engine.stats();
    assert!(stats.compaction.compactions > 0);
    for level in &stats.level_stats[..opts.last_level()] {
        assert!(
            level.size_bytes <= level.max_bytes,
            "L{} over budget after compaction",
            level.level
        );
    }

    for i in 0..600 {
        let key = format!("key{:05}", i);
        let value = engine.get(key.as_bytes()).unwrap();
        if i % 5 == 0 {
            assert_eq!(value, None, "{} should be deleted", key);
        } else {
            assert_eq!(value, Some(Bytes::from(format!("value-2-{:024}", i))));
        }
    }

    // Everything survives a reopen.
    engine.close().unwrap();
    drop(engine);
    let engine = Engine::open_with_options(dir.path(), opts).unwrap();
    assert_eq!(
        engine.get(b"key00001").unwrap(),
        Some(Bytes::from(format!("value-2-{:024}", 1)))
    );
    assert_eq!(engine.get(b"key00005").unwrap(), None);
}

/// Test that the manifest reloads exactly what was saved.
#[test]
fn integration_manifest_durability() {
    let dir = TempDir::new().unwrap();
    let manifest_path = dir.path().join("manifest.json");

    let before = {
        let engine =
            Engine::open_with_options(dir.path(), manual_options().build().unwrap()).unwrap();
        for batch in 0..4 {
            for i in 0..10 {
                let key = format!("b{}:{}", batch, i);
                engine.put(key.as_bytes(), b"v").unwrap();
            }
            engine.flush().unwrap();
        }
        engine.close().unwrap();
        ManifestDocument::load(&manifest_path).unwrap().unwrap()
    };

    let engine = Engine::open_with_options(dir.path(), manual_options().build().unwrap()).unwrap();
    engine.close().unwrap();
    let after = ManifestDocument::load(&manifest_path).unwrap().unwrap();

    assert_eq!(before.next_file_number, after.next_file_number);
    assert_eq!(before.levels.len(), after.levels.len());
    for (a, b) in before.levels.iter().zip(after.levels.iter()) {
        assert_eq!(a.level(), b.level());
        assert_eq!(a.total_size(), b.total_size());
        assert_eq!(a.files(), b.files());
    }
    assert_eq!(before.levels[0].len(), 4);
}

/// Test that a write after reopening beats older data once both are compacted.
#[test]
fn integration_overwrite_after_reopen_survives_compaction() {
    let dir = TempDir::new().unwrap();
    let options = || manual_options().level0_max_bytes(1).build().unwrap();

    {
        let engine = Engine::open_with_options(dir.path(), options()).unwrap();
        // A burst of writes pushes timestamps ahead of the wall clock.
        for i in 0..50_000 {
            let key = format!("burst{:06}", i);
            engine.put(key.as_bytes(), b"v").unwrap();
        }
        engine.put(b"target", b"old").unwrap();
        engine.compact().unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open_with_options(dir.path(), options()).unwrap();
    engine.put(b"target", b"new").unwrap();
    assert_eq!(engine.get(b"target").unwrap(), Some(Bytes::from("new")));

    engine.compact().unwrap();
    assert_eq!(engine.get(b"target").unwrap(), Some(Bytes::from("new")));

    let manifest = ManifestDocument::load(&dir.path().join("manifest.json")).unwrap().unwrap();
    assert!(manifest.levels.iter().flat_map(|l| l.files()).all(|f| f.max_timestamp() > 0));
}

/// Test that a bad footer is reported as corruption and stays isolated.
#[test]
fn integration_corrupt_footer() {
    let dir = TempDir::new().unwrap();
    let good_path = dir.path().join("good.sst");
    let bad_path = dir.path().join("bad.sst");

    for path in [&good_path, &bad_path] {
        let mut writer = SSTableStreamWriter::new(path).unwrap();
        for i in 0..300 {
            let key = Bytes::from(format!("key{:04}", i));
            writer.add(&key, &Value::new(Bytes::from("value"), 1)).unwrap();
        }
        writer.finish().unwrap();
    }

    let mut good = SSTableReader::open(&good_path).unwrap();

    let mut data = std::fs::read(&bad_path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xFF;
    std::fs::write(&bad_path, &data).unwrap();

    let err = SSTableReader::open(&bad_path).unwrap_err();
    assert!(err.is_corruption());
    assert!(matches!(err, Error::Corruption(_)));

    assert_eq!(
        good.get(b"key0299").unwrap(),
        LookupResult::Found(Bytes::from("value"))
    );
    assert_eq!(good.get(b"key9999").unwrap(), LookupResult::NotFound);
}

/// Test SSTable round trip across index boundaries.
#[test]
fn integration_sstable_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("1.sst");

    let mut writer = SSTableStreamWriter::new(&path).unwrap();
    for i in 0..1000 {
        let key = Bytes::from(format!("k{:05}", i * 2));
        let value = if i % 100 == 0 {
            Value::tombstone(i)
        } else {
            Value::new(Bytes::from(format!("v{}", i)), i)
        };
        writer.add(&key, &value).unwrap();
    }
    let info = writer.finish().unwrap();
    assert_eq!(info.entry_count, 1000);

    let mut reader = SSTableReader::open(&path).unwrap();
    for i in 0..1000 {
        let key = format!("k{:05}", i * 2);
        let expected = if i % 100 == 0 {
            LookupResult::Deleted
        } else {
            LookupResult::Found(Bytes::from(format!("v{}", i)))
        };
        assert_eq!(reader.get(key.as_bytes()).unwrap(), expected);

        let missing = format!("k{:05}", i * 2 + 1);
        assert_eq!(reader.get(missing.as_bytes()).unwrap(), LookupResult::NotFound);
    }
    assert_eq!(reader.get(b"a").unwrap(), LookupResult::NotFound);
    assert_eq!(reader.get(b"z").unwrap(), LookupResult::NotFound);
}

/// Test the newest-wins merge over real files.
#[test]
fn integration_merge_newest_wins() {
    let dir = TempDir::new().unwrap();

    let write = |name: &str, entries: &[(&str, &str, i64)]| {
        let path = dir.path().join(name);
        let mut writer = SSTableStreamWriter::new(&path).unwrap();
        for (key, value, ts) in entries {
            writer
                .add(&Bytes::from(key.to_string()), &Value::new(Bytes::from(value.to_string()), *ts))
                .unwrap();
        }
        writer.finish().unwrap();
        path
    };
    let older = write("older.sst", &[("k", "v1", 1), ("x", "x1", 1)]);
    let newer = write("newer.sst", &[("a", "a2", 2), ("k", "v2", 2)]);

    let sources = vec![
        SSTableReader::open(&older).unwrap().iter().unwrap(),
        SSTableReader::open(&newer).unwrap().iter().unwrap(),
    ];
    let merged: Vec<Entry> = MergeIterator::new(sources)
        .unwrap()
        .collect::<lsmstore::Result<_>>()
        .unwrap();

    let keys: Vec<&[u8]> = merged.iter().map(|e| e.key.as_ref()).collect();
    assert_eq!(keys, vec![&b"a"[..], &b"k"[..], &b"x"[..]]);
    assert_eq!(merged[1].value.payload(), Some(&Bytes::from("v2")));
}

/// Test statistics reporting.
#[test]
fn integration_statistics() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open_with_options(dir.path(), manual_options().build().unwrap()).unwrap();

    for i in 0..50 {
        engine.put(format!("stat{}", i).as_bytes(), b"value").unwrap();
    }
    let stats = engine.stats();
    assert_eq!(stats.memtable_entries, 50);
    assert_eq!(stats.total_files(), 0);

    engine.flush().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(stats.total_files(), 1);
    assert!(stats.total_size() > 0);

    let display = format!("{}", stats);
    assert!(display.contains("Engine Statistics"));
    assert!(display.contains("L0: 1 files"));
}

/// Test edge cases.
#[test]
fn integration_edge_cases() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open_with_options(dir.path(), manual_options().build().unwrap()).unwrap();

    // Empty value is a value, not a delete.
    engine.put(b"empty_value", b"").unwrap();
    assert_eq!(engine.get(b"empty_value").unwrap(), Some(Bytes::new()));

    // Binary keys, including a prefix pair.
    engine.put(&[0x00, 0xFF], b"binary").unwrap();
    engine.put(&[0x00], b"prefix").unwrap();

    // Large value.
    let large = vec![b'L'; 1024 * 1024];
    engine.put(b"large", &large).unwrap();

    engine.flush().unwrap();
    assert_eq!(engine.get(b"empty_value").unwrap(), Some(Bytes::new()));
    assert_eq!(engine.get(&[0x00, 0xFF]).unwrap(), Some(Bytes::from("binary")));
    assert_eq!(engine.get(&[0x00]).unwrap(), Some(Bytes::from("prefix")));
    assert_eq!(engine.get(b"large").unwrap(), Some(Bytes::from(large)));

    // Deleting an unknown key is fine.
    engine.delete(b"never_written").unwrap();
    assert_eq!(engine.get(b"never_written").unwrap(), None);

    assert!(matches!(engine.put(b"", b"x"), Err(Error::InvalidArgument(_))));
}

/// Test that invalid options are rejected before touching the disk.
#[test]
fn integration_invalid_options() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("db");

    let mut opts = Options::default();
    opts.num_levels = 1;
    let result = Engine::open_with_options(&base, opts);
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    assert!(!base.exists());
}

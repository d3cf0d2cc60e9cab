//! Database engine integration tests.

use historiandb::engine::{Database, DatabaseConfig, DurabilityMode};
use historiandb::types::{HistorianKey, HistorianValue, KeyComparer, TreeType};
use historiandb::Error;
use std::cmp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

#[test]
fn test_ten_thousand_sequential_timestamps() {
    let db = Database::<u64, u64>::open(
        DatabaseConfig::in_memory("scenario").max_leaf_children(100),
    )
    .unwrap();
    for t in 0..10_000u64 {
        assert!(db.write(t, t * 10).unwrap());
    }

    let info = db.tree_info().unwrap();
    assert_eq!(info.leaf_blocks, 100);
    assert_eq!(info.records, 10_000);
    db.hard_commit().unwrap();

    let mut expected = 0u64;
    for record in db.read(&0, &10_000).unwrap() {
        let (key, value) = record.unwrap();
        assert_eq!(key, expected);
        assert_eq!(value, key * 10);
        expected += 1;
    }
    assert_eq!(expected, 10_000);

    assert_eq!(db.read(&5_000, &5_000).unwrap().count(), 0);
}

#[test]
fn test_committed_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let config = DatabaseConfig::on_disk("PPA", dir.path())
        .block_size(1024)
        .max_leaf_children(20);

    {
        let db = Database::<HistorianKey, HistorianValue>::open(config.clone()).unwrap();
        for t in (0..3_000u64).rev() {
            db.write(
                HistorianKey::new(t, t % 7, 0),
                HistorianValue::new(t * 2, 0, 0),
            )
            .unwrap();
        }
        db.hard_commit().unwrap();
        db.disconnect();
    }

    let db = Database::<HistorianKey, HistorianValue>::open(config).unwrap();
    let info = db.tree_info().unwrap();
    assert_eq!(info.records, 3_000);
    assert_eq!(info.max_leaf_children, 20);

    let start = HistorianKey::min_value();
    let stop = HistorianKey::new(u64::MAX, 0, 0);
    let mut count = 0u64;
    for record in db.read(&start, &stop).unwrap() {
        let (key, value) = record.unwrap();
        assert_eq!(key.timestamp, count);
        assert_eq!(value.value1, count * 2);
        count += 1;
    }
    assert_eq!(count, 3_000);
}

#[test]
fn test_archive_found_in_second_path() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();

    {
        let db = Database::<u64, u64>::open(DatabaseConfig::on_disk("moved", second.path())).unwrap();
        db.write(1, 100).unwrap();
        db.hard_commit().unwrap();
    }

    let mut config = DatabaseConfig::on_disk("moved", first.path());
    config.paths.push(second.path().to_path_buf());
    let db = Database::<u64, u64>::open(config).unwrap();
    assert_eq!(db.get(&1).unwrap(), Some(100));
    assert!(!first.path().join("moved.d2").exists());
}

#[test]
fn test_reopen_with_other_types_is_rejected() {
    let dir = tempdir().unwrap();
    let config = DatabaseConfig::on_disk("typed", dir.path());
    {
        let db = Database::<u64, u64>::open(config.clone()).unwrap();
        db.hard_commit().unwrap();
    }
    assert!(matches!(
        Database::<u32, u64>::open(config),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_immediate_mode_is_durable_without_commit() {
    let dir = tempdir().unwrap();
    let config = DatabaseConfig::on_disk("imm", dir.path()).durability(DurabilityMode::Immediate);
    {
        let db = Database::<u64, u64>::open(config.clone()).unwrap();
        db.write_batch((0..50u64).map(|k| (k, k))).unwrap();
        db.disconnect();
    }
    let db = Database::<u64, u64>::open(config).unwrap();
    assert_eq!(db.read(&0, &50).unwrap().count(), 50);
}

/// One writer and several readers at once. Readers see no snapshot: a scan
/// may include records written after it began. What must hold is that
/// every scan is strictly ascending, never goes backwards past records
/// that were already committed when it started, and pairs each key with
/// its own value.
#[test]
fn test_readers_run_next_to_writer() {
    let db = Arc::new(
        Database::<u64, u64>::open(DatabaseConfig::in_memory("busy").max_leaf_children(16)).unwrap(),
    );
    db.write_batch((0..1_000u64).map(|k| (k * 2, k))).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for k in 0..1_000u64 {
                db.write(k * 2 + 1, k).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut scans = 0;
                while !done.load(Ordering::Acquire) || scans < 3 {
                    let records: Vec<(u64, u64)> =
                        db.read(&0, &u64::MAX).unwrap().map(|r| r.unwrap()).collect();
                    for (key, value) in &records {
                        assert_eq!(*value, key / 2, "key {} read with a foreign value", key);
                    }
                    let keys: Vec<u64> = records.iter().map(|r| r.0).collect();
                    assert!(keys.windows(2).all(|w| w[0] < w[1]));
                    let evens = keys.iter().filter(|k| *k % 2 == 0).count();
                    assert_eq!(evens, 1_000);
                    scans += 1;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(db.tree_info().unwrap().records, 2_000);
}

/// Point reads never take the writer lock, so they land in the middle of
/// splits: a node may already hold only half its records while its parent
/// still routes every key to it.
#[test]
fn test_point_reads_during_splits() {
    let db = Arc::new(
        Database::<u64, u64>::open(
            DatabaseConfig::in_memory("splits")
                .block_size(512)
                .max_leaf_children(4),
        )
        .unwrap(),
    );
    db.write_batch((0..2_000u64).map(|k| (k * 2, k))).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            // Descending inserts land mid-leaf and force halving splits.
            for k in (0..2_000u64).rev() {
                db.write(k * 2 + 1, k).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let db = Arc::clone(&db);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut rounds = 0;
                while !done.load(Ordering::Acquire) || rounds < 2 {
                    for k in (0..2_000u64).rev() {
                        let key = k * 2;
                        assert_eq!(db.get(&key).unwrap(), Some(k), "key {} went missing", key);
                    }
                    rounds += 1;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    for k in 0..2_000u64 {
        assert_eq!(db.get(&(k * 2 + 1)).unwrap(), Some(k));
    }
}

/// Orders keys from largest to smallest.
#[derive(Debug, Clone, Copy, Default)]
struct Descending;

impl KeyComparer<u64> for Descending {
    fn compare(&self, a: &u64, b: &u64) -> cmp::Ordering {
        b.cmp(a)
    }
}

#[test]
fn test_database_with_descending_keys() {
    let db = Database::<u64, u64, Descending>::open(
        DatabaseConfig::in_memory("newest-first")
            .block_size(512)
            .max_leaf_children(10),
    )
    .unwrap();
    for key in 0..100u64 {
        assert!(db.write(key, key + 1000).unwrap());
    }
    assert!(db.tree_info().unwrap().leaf_blocks > 1);

    // Start and stop follow the comparer: 99 comes first, 49 is excluded.
    let keys: Vec<u64> = db.read(&99, &49).unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(keys, (50..100u64).rev().collect::<Vec<_>>());
    assert_eq!(db.read(&10, &20).unwrap().count(), 0);

    for key in 0..100u64 {
        assert_eq!(db.get(&key).unwrap(), Some(key + 1000));
    }
    assert!(!db.write(42, 0).unwrap());
}

#[test]
fn test_cancel_from_another_thread() {
    let db = Database::<u64, u64>::open(DatabaseConfig::in_memory("cancel")).unwrap();
    db.write_batch((0..500u64).map(|k| (k, k))).unwrap();

    let mut stream = db.read(&0, &500).unwrap();
    let handle = stream.cancel_handle();
    let mut taken = 0;
    while let Some(record) = stream.next() {
        record.unwrap();
        taken += 1;
        if taken == 10 {
            thread::spawn({
                let handle = handle.clone();
                move || handle.cancel()
            })
            .join()
            .unwrap();
        }
    }
    assert_eq!(taken, 10);
    assert!(stream.is_cancelled());
    assert_eq!(db.read(&0, &500).unwrap().count(), 500);
}

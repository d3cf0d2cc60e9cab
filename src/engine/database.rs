//! Database - one named, sorted store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::buffer::{PageCache, StatsSnapshot};
use crate::common::{Error, Result};
use crate::engine::config::{DatabaseConfig, DurabilityMode};
use crate::engine::stream::TreeStream;
use crate::io::PagedFile;
use crate::storage::{FileStore, MemoryStore, PageStore};
use crate::tree::{SortedTree, TreeScanner};
use crate::types::{KeyComparer, NaturalOrder, TreeType};

/// Shape of a database's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeInfo {
    /// Number of leaf blocks in the chain.
    pub leaf_blocks: usize,
    /// Number of records.
    pub records: u64,
    /// Levels including the leaf level.
    pub levels: u8,
    /// Leaf fan-out in effect.
    pub max_leaf_children: usize,
}

/// A database engine over one archive.
///
/// # Thread Safety
/// Single writer, many readers. Writes and commits are serialized on one
/// `Mutex` around the tree writer. Each [`Database::read`] gets its own
/// scanner and never takes that lock, so reads run next to writes and
/// next to each other. Reads see no snapshot; see
/// [`TreeScanner`](crate::tree::TreeScanner).
///
/// # Example
/// ```
/// use historiandb::engine::{Database, DatabaseConfig};
///
/// let db = Database::<u64, u64>::open(DatabaseConfig::in_memory("demo")).unwrap();
/// for t in 0..10u64 {
///     db.write(t, t * t).unwrap();
/// }
/// db.hard_commit().unwrap();
///
/// let squares: Vec<u64> = db.read(&2, &5).unwrap().map(|r| r.unwrap().1).collect();
/// assert_eq!(squares, vec![4, 9, 16]);
/// ```
pub struct Database<K, V, C = NaturalOrder> {
    config: DatabaseConfig,
    file: Arc<PagedFile>,
    writer: Mutex<SortedTree<K, V, C>>,
    comparer: C,
    closed: AtomicBool,
}

impl<K, V, C> Database<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    /// Open (or create) a database, ordering keys with `C::default()`.
    pub fn open(config: DatabaseConfig) -> Result<Self>
    where
        C: Default,
    {
        Self::open_with_comparer(config, C::default())
    }

    /// Open (or create) a database with an explicit key order.
    ///
    /// On disk, each configured path is searched in order for the archive;
    /// if none has it, it is created in the first path.
    pub fn open_with_comparer(config: DatabaseConfig, comparer: C) -> Result<Self> {
        config.validate()?;
        let block_size = config.block_size;

        let store: Arc<dyn PageStore> = if config.in_memory {
            Arc::new(MemoryStore::new(block_size)?)
        } else if let Some(path) = config.find_archive() {
            debug!(path = %path.display(), "found archive");
            Arc::new(FileStore::open(&path, block_size)?)
        } else {
            let path = config.new_archive_path().ok_or_else(|| {
                Error::InvalidConfiguration(format!("database '{}' has no storage path", config.name))
            })?;
            if let Some(dir) = config.primary_path() {
                std::fs::create_dir_all(dir)?;
            }
            Arc::new(FileStore::create(&path, block_size)?)
        };

        let cache = Arc::new(PageCache::new(block_size, config.cache_size_bytes)?);
        let file = Arc::new(PagedFile::open(cache, store)?);
        let tree = SortedTree::open_or_create(
            Arc::clone(&file),
            comparer.clone(),
            config.max_leaf_children,
        )?;

        info!(
            name = %config.name,
            in_memory = config.in_memory,
            durability = ?config.durability,
            "opened database"
        );
        Ok(Self {
            config,
            file,
            writer: Mutex::new(tree),
            comparer,
            closed: AtomicBool::new(false),
        })
    }

    /// Name of the database.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration it was opened with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert one record. Returns `false` if the key already exists.
    ///
    /// Not durable until [`Database::hard_commit`] unless the database runs
    /// with [`DurabilityMode::Immediate`].
    pub fn write(&self, key: K, value: V) -> Result<bool> {
        self.check_open()?;
        let mut tree = self.writer.lock();
        let inserted = tree.insert(key, value)?;
        if inserted && self.config.durability == DurabilityMode::Immediate {
            self.file.flush()?;
        }
        Ok(inserted)
    }

    /// Insert many records under one writer lock. Returns how many were new.
    pub fn write_batch<I>(&self, records: I) -> Result<u32>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.check_open()?;
        let mut tree = self.writer.lock();
        let mut inserted = 0u32;
        for (key, value) in records {
            if tree.insert(key, value)? {
                inserted += 1;
            }
        }
        if inserted > 0 && self.config.durability == DurabilityMode::Immediate {
            self.file.flush()?;
        }
        Ok(inserted)
    }

    /// Write every pending change to storage. Blocks writers, not readers.
    pub fn hard_commit(&self) -> Result<()> {
        self.check_open()?;
        let _writer = self.writer.lock();
        self.file.flush()?;
        info!(name = %self.config.name, "hard commit complete");
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Records with `start <= key < stop`, produced lazily.
    pub fn read(&self, start: &K, stop: &K) -> Result<TreeStream<K, V, C>> {
        self.check_open()?;
        let mut scanner = TreeScanner::new(Arc::clone(&self.file), self.comparer.clone())?;
        scanner.prepare_scan(start, stop)?;
        Ok(TreeStream::new(scanner))
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.check_open()?;
        let mut scanner = TreeScanner::new(Arc::clone(&self.file), self.comparer.clone())?;
        scanner.get_value(key)
    }

    /// Leaf count, record count and height of the tree.
    pub fn tree_info(&self) -> Result<TreeInfo> {
        self.check_open()?;
        let mut tree = self.writer.lock();
        let leaves = tree.leaf_blocks()?;
        let records = tree.record_count()?;
        Ok(TreeInfo {
            leaf_blocks: leaves.len(),
            records,
            levels: tree.header().root_level + 1,
            max_leaf_children: tree.max_leaf_children(),
        })
    }

    /// Page cache counters.
    pub fn cache_stats(&self) -> StatsSnapshot {
        self.file.cache().stats().snapshot()
    }

    /// Change the page cache limit.
    pub fn set_cache_size(&self, bytes: usize) -> Result<()> {
        self.file.cache().set_maximum_size(bytes)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Release the database's cached pages. Uncommitted changes are dropped
    /// and the archive is left as of the last commit.
    ///
    /// Later calls on this database, and on streams still open on it, fail
    /// with [`Error::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _writer = self.writer.lock();
            self.file.close();
            info!(name = %self.config.name, "disconnected database");
        }
    }

    /// Close and drop the database.
    pub fn disconnect(self) {
        self.close();
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistorianKey, HistorianValue};
    use tempfile::tempdir;

    fn memory_db(cap: usize) -> Database<u64, u64> {
        Database::open(DatabaseConfig::in_memory("test").max_leaf_children(cap)).unwrap()
    }

    #[test]
    fn test_write_and_read_range() {
        let db = memory_db(8);
        for key in (0..100u64).rev() {
            assert!(db.write(key, key + 1).unwrap());
        }
        let keys: Vec<u64> = db.read(&10, &20).unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, (10..20).collect::<Vec<_>>());
        assert_eq!(db.get(&42).unwrap(), Some(43));
    }

    #[test]
    fn test_duplicate_write_returns_false() {
        let db = memory_db(8);
        assert!(db.write(1, 1).unwrap());
        assert!(!db.write(1, 2).unwrap());
        assert_eq!(db.get(&1).unwrap(), Some(1));
    }

    #[test]
    fn test_write_batch_counts_new_records() {
        let db = memory_db(8);
        let inserted = db.write_batch([(1, 1), (2, 2), (1, 3)]).unwrap();
        assert_eq!(inserted, 2);
    }

    #[test]
    fn test_cancel_stops_stream() {
        let db = memory_db(8);
        db.write_batch((0..50u64).map(|k| (k, k))).unwrap();

        let mut stream = db.read(&0, &50).unwrap();
        let handle = stream.cancel_handle();
        assert!(stream.next().is_some());
        handle.cancel();
        assert!(stream.next().is_none());
        assert!(stream.is_cancelled());
        assert_eq!(db.tree_info().unwrap().records, 50);
    }

    #[test]
    fn test_closed_database_rejects_calls() {
        let db = memory_db(8);
        db.write(1, 1).unwrap();
        let mut stream = db.read(&0, &10).unwrap();
        db.close();
        assert!(matches!(db.write(2, 2), Err(Error::Closed)));
        assert!(matches!(db.hard_commit(), Err(Error::Closed)));
        assert!(matches!(stream.next(), Some(Err(Error::Closed))));
    }

    #[test]
    fn test_historian_records_on_disk() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig::on_disk("Scada", dir.path().join("archive"));
        {
            let db = Database::<HistorianKey, HistorianValue>::open(config.clone()).unwrap();
            for t in 0..500u64 {
                db.write(HistorianKey::new(t, 1, 0), HistorianValue::new(t, 0, 0))
                    .unwrap();
            }
            db.hard_commit().unwrap();
            db.disconnect();
        }
        assert!(dir.path().join("archive").join("Scada.d2").is_file());

        let db = Database::<HistorianKey, HistorianValue>::open(config).unwrap();
        let start = HistorianKey::new(100, 0, 0);
        let stop = HistorianKey::new(110, 0, 0);
        let values: Vec<u64> = db
            .read(&start, &stop)
            .unwrap()
            .map(|r| r.unwrap().1.value1)
            .collect();
        assert_eq!(values, (100..110).collect::<Vec<_>>());
    }

    #[test]
    fn test_immediate_durability_flushes_each_write() {
        let db = Database::<u64, u64>::open(
            DatabaseConfig::in_memory("imm").durability(DurabilityMode::Immediate),
        )
        .unwrap();
        db.write(5, 5).unwrap();
        assert!(db.cache_stats().pages_written > 0);
    }
}

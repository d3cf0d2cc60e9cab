//! Forward range scans over the leaf chain.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::io::PagedFile;
use crate::tree::node::{read_tree_header, validate_tree_header, Layout, LeafSeek, LeafSlot, NodeIo};
use crate::types::{KeyComparer, NaturalOrder, TreeType};

#[derive(Debug)]
enum ScanState<K> {
    Idle,
    Active {
        block: u32,
        index: usize,
        start: K,
        stop: K,
        last: Option<K>,
    },
    Done,
}

/// A read-only cursor over a tree.
///
/// Each scanner owns its own cursor and reads the leaf chain through
/// short page leases, so any number of scanners can run next to the
/// single writer.
///
/// # Consistency
/// There is no snapshot. A scan sees the leaves as they are when it reaches
/// them: a record inserted after the scan started shows up if it lands
/// ahead of the scan position. Keys are yielded strictly ascending; a
/// record shifted under the cursor by a concurrent insert is skipped rather
/// than yielded twice.
pub struct TreeScanner<K, V, C = NaturalOrder> {
    io: NodeIo<K, V, C>,
    state: ScanState<K>,
}

impl<K, V, C> TreeScanner<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    /// Open a scanner on an initialized tree.
    pub fn new(file: Arc<PagedFile>, comparer: C) -> Result<Self> {
        let block_size = file.page_size();
        let mut io = NodeIo::new(file, Layout::new::<K, V>(block_size, None)?, comparer);
        let header = read_tree_header(&mut io.stream)?
            .ok_or_else(|| Error::corruption("archive has no tree header"))?;
        validate_tree_header::<K, V>(&header, block_size)?;
        io.layout = Layout::new::<K, V>(block_size, Some(header.max_leaf_children as usize))?;
        Ok(Self {
            io,
            state: ScanState::Idle,
        })
    }

    /// Walk from the current root to the leaf covering `key`.
    fn find_leaf(&mut self, key: &K) -> Result<LeafSeek<V>> {
        // The root moves when the tree grows; always start from the latest.
        let header = read_tree_header(&mut self.io.stream)?
            .ok_or_else(|| Error::corruption("archive has no tree header"))?;
        let mut path = Vec::new();
        self.io.descend(header.root, header.root_level, key, &mut path)
    }

    /// Value stored under `key`, if any.
    pub fn get_value(&mut self, key: &K) -> Result<Option<V>> {
        Ok(self.find_leaf(key)?.value)
    }

    /// Position the scan on the first key `>= start`. The scan ends before
    /// the first key `>= stop`.
    pub fn prepare_scan(&mut self, start: &K, stop: &K) -> Result<()> {
        if self.io.compare(start, stop) != Ordering::Less {
            self.state = ScanState::Done;
            return Ok(());
        }
        let seek = self.find_leaf(start)?;
        self.state = ScanState::Active {
            block: seek.block,
            index: seek.index,
            start: *start,
            stop: *stop,
            last: None,
        };
        Ok(())
    }

    /// Next record of the prepared scan, or `None` once it is exhausted.
    ///
    /// A scan that returned `None` or an error stays finished until
    /// [`TreeScanner::prepare_scan`] is called again.
    pub fn next_record(&mut self) -> Result<Option<(K, V)>> {
        let result = self.advance();
        if !matches!(result, Ok(Some(_))) {
            self.state = ScanState::Done;
        }
        result
    }

    fn advance(&mut self) -> Result<Option<(K, V)>> {
        let ScanState::Active {
            mut block,
            mut index,
            start,
            stop,
            last,
        } = self.state
        else {
            return Ok(None);
        };

        loop {
            // Key and value come from the same lease as the count that
            // vouches for them.
            let (key, value) = match self.io.leaf_slot(block, index)? {
                LeafSlot::Record(key, value) => (key, value),
                LeafSlot::Next(next) => {
                    block = next;
                    index = 0;
                    continue;
                }
                LeafSlot::End => return Ok(None),
            };
            if self.io.compare(&key, &stop) != Ordering::Less {
                return Ok(None);
            }
            index += 1;
            // A split can move the cursor's records into a node that also
            // holds keys below the scan start.
            if self.io.compare(&key, &start) == Ordering::Less {
                continue;
            }
            if let Some(last) = &last {
                if self.io.compare(&key, last) != Ordering::Greater {
                    continue;
                }
            }

            self.state = ScanState::Active {
                block,
                index,
                start,
                stop,
                last: Some(key),
            };
            return Ok(Some((key, value)));
        }
    }

    /// True once the scan has ended.
    pub fn is_done(&self) -> bool {
        matches!(self.state, ScanState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PageCache;
    use crate::storage::MemoryStore;
    use crate::tree::SortedTree;

    fn setup(cap: usize, keys: impl IntoIterator<Item = u64>) -> (SortedTree<u64, u64>, Arc<PagedFile>) {
        let cache = Arc::new(PageCache::new(512, 128 * 512).unwrap());
        let store = Arc::new(MemoryStore::new(512).unwrap());
        let file = Arc::new(PagedFile::open(cache, store).unwrap());
        let mut tree = SortedTree::create(Arc::clone(&file), NaturalOrder, Some(cap)).unwrap();
        for key in keys {
            tree.insert(key, key * 2).unwrap();
        }
        (tree, file)
    }

    fn collect(scanner: &mut TreeScanner<u64, u64>, start: u64, stop: u64) -> Vec<u64> {
        scanner.prepare_scan(&start, &stop).unwrap();
        let mut keys = Vec::new();
        while let Some((key, value)) = scanner.next_record().unwrap() {
            assert_eq!(value, key * 2);
            keys.push(key);
        }
        keys
    }

    #[test]
    fn test_scan_crosses_leaves() {
        let (_tree, file) = setup(4, (0..40).map(|k| k * 10));
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        assert_eq!(collect(&mut scanner, 95, 205), (10..=20).map(|k| k * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_is_exclusive() {
        let (_tree, file) = setup(4, 0..20);
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        assert_eq!(collect(&mut scanner, 5, 9), vec![5, 6, 7, 8]);
        assert!(collect(&mut scanner, 7, 7).is_empty());
        assert!(collect(&mut scanner, 9, 3).is_empty());
    }

    #[test]
    fn test_exhausted_scan_stays_done() {
        let (_tree, file) = setup(4, 0..3);
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        scanner.prepare_scan(&0, &100).unwrap();
        for _ in 0..3 {
            assert!(scanner.next_record().unwrap().is_some());
        }
        assert!(scanner.next_record().unwrap().is_none());
        assert!(scanner.is_done());
        assert!(scanner.next_record().unwrap().is_none());
    }

    #[test]
    fn test_scan_sees_later_insert_ahead_of_cursor() {
        let (mut tree, file) = setup(4, (0..10).map(|k| k * 10));
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        scanner.prepare_scan(&0, &1000).unwrap();
        assert_eq!(scanner.next_record().unwrap().map(|r| r.0), Some(0));

        tree.insert(55, 110).unwrap();
        tree.insert(5, 10).unwrap();

        let mut rest = Vec::new();
        while let Some((key, _)) = scanner.next_record().unwrap() {
            rest.push(key);
        }
        assert!(rest.contains(&55));
        assert!(rest.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_get_value() {
        let (_tree, file) = setup(4, [3, 1, 2]);
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        assert_eq!(scanner.get_value(&2).unwrap(), Some(4));
        assert_eq!(scanner.get_value(&9).unwrap(), None);
    }

    #[test]
    fn test_parked_scan_keeps_start_bound_across_split() {
        let (mut tree, file) = setup(4, [10, 20, 30, 40]);
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        scanner.prepare_scan(&35, &100).unwrap();

        // Splits the leaf the scan is parked on; 30 moves right with 40.
        tree.insert(5, 10).unwrap();
        assert_eq!(tree.leaf_blocks().unwrap().len(), 2);

        let mut keys = Vec::new();
        while let Some((key, _)) = scanner.next_record().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys, vec![40]);
    }

    #[test]
    fn test_records_never_pair_with_foreign_values() {
        let (mut tree, file) = setup(4, (0..40).map(|k| k * 10));
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        scanner.prepare_scan(&0, &u64::MAX).unwrap();
        let mut seen = 0;
        // Interleave inserts that shift records under the cursor.
        while let Some((key, value)) = scanner.next_record().unwrap() {
            assert_eq!(value, key * 2);
            seen += 1;
            if key % 50 == 0 && key < 390 {
                tree.insert(key + 1, (key + 1) * 2).unwrap();
                tree.insert(key + 2, (key + 2) * 2).unwrap();
            }
        }
        assert!(seen >= 40);
    }
}

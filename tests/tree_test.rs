//! B+Tree integration tests: ordering, splits and scan boundaries.

use historiandb::buffer::PageCache;
use historiandb::io::PagedFile;
use historiandb::storage::MemoryStore;
use historiandb::tree::{SortedTree, TreeScanner};
use historiandb::types::{HistorianKey, HistorianValue, KeyComparer, NaturalOrder};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

const BLOCK: usize = 1024;

fn new_file() -> Arc<PagedFile> {
    let cache = Arc::new(PageCache::new(BLOCK, 512 * BLOCK).unwrap());
    let store = Arc::new(MemoryStore::new(BLOCK).unwrap());
    Arc::new(PagedFile::open(cache, store).unwrap())
}

fn new_tree(cap: Option<usize>) -> (SortedTree<u64, u64>, Arc<PagedFile>) {
    let file = new_file();
    let tree = SortedTree::create(Arc::clone(&file), NaturalOrder, cap).unwrap();
    (tree, file)
}

fn scan(file: &Arc<PagedFile>, start: u64, stop: u64) -> Vec<(u64, u64)> {
    let mut scanner = TreeScanner::<u64, u64>::new(Arc::clone(file), NaturalOrder).unwrap();
    scanner.prepare_scan(&start, &stop).unwrap();
    let mut records = Vec::new();
    while let Some(record) = scanner.next_record().unwrap() {
        records.push(record);
    }
    records
}

// ============================================================================
// Split correctness
// ============================================================================

fn assert_two_linked_leaves(tree: &mut SortedTree<u64, u64>, total: usize) {
    let leaves = tree.leaf_blocks().unwrap();
    assert_eq!(leaves.len(), 2);
    let (left, right) = (leaves[0], leaves[1]);

    let left_header = tree.node_header(left).unwrap();
    let right_header = tree.node_header(right).unwrap();
    assert_eq!(left_header.next_node, right);
    assert_eq!(right_header.previous_node, left);
    assert_eq!(left_header.previous_node, 0);
    assert_eq!(right_header.next_node, 0);

    let left_max = tree
        .leaf_key(left, left_header.child_count as usize - 1)
        .unwrap();
    let right_min = tree.leaf_key(right, 0).unwrap();
    assert!(left_max < right_min);
    assert_eq!(
        left_header.child_count as usize + right_header.child_count as usize,
        total
    );
}

#[test]
fn test_sequential_overflow_makes_two_leaves() {
    let (mut tree, _file) = new_tree(Some(16));
    let cap = tree.max_leaf_children();
    for key in 0..=cap as u64 {
        assert!(tree.insert(key, key).unwrap());
    }
    assert_two_linked_leaves(&mut tree, cap + 1);
}

#[test]
fn test_unordered_overflow_makes_two_leaves() {
    let (mut tree, _file) = new_tree(Some(16));
    let cap = tree.max_leaf_children();
    for key in (0..=cap as u64).map(|k| (k * 7) % (cap as u64 + 1)) {
        assert!(tree.insert(key, key).unwrap());
    }
    assert_two_linked_leaves(&mut tree, cap + 1);
    assert_eq!(tree.record_count().unwrap(), cap as u64 + 1);
}

#[test]
fn test_leaves_never_exceed_fan_out() {
    let (mut tree, _file) = new_tree(Some(10));
    for key in (0..2_000u64).rev() {
        tree.insert(key * 3, key).unwrap();
    }
    for block in tree.leaf_blocks().unwrap() {
        let header = tree.node_header(block).unwrap();
        assert!(header.child_count as usize <= 10);
        assert!(header.child_count >= 1);
    }
    assert!(tree.header().root_level >= 2);
}

// ============================================================================
// Scan boundaries
// ============================================================================

#[test]
fn test_scan_yields_exactly_half_open_range() {
    let (mut tree, file) = new_tree(Some(8));
    for key in (0..300u64).map(|k| k * 2) {
        tree.insert(key, key + 1).unwrap();
    }

    let keys: Vec<u64> = scan(&file, 101, 151).into_iter().map(|r| r.0).collect();
    assert_eq!(keys, (51..76).map(|k| k * 2).collect::<Vec<_>>());

    assert!(scan(&file, 150, 150).is_empty());
    assert!(scan(&file, 9_000, 10_000).is_empty());
    assert_eq!(scan(&file, 0, u64::MAX).len(), 300);
}

/// Scans run without a snapshot: a record inserted after the scan started
/// is visible when it lands ahead of the cursor, and is missed when it
/// lands behind it. Either way the scan stays strictly ascending.
#[test]
fn test_scan_observes_inserts_ahead_of_cursor() {
    let (mut tree, file) = new_tree(Some(8));
    for key in (0..100u64).map(|k| k * 10) {
        tree.insert(key, key).unwrap();
    }

    let mut scanner = TreeScanner::<u64, u64>::new(Arc::clone(&file), NaturalOrder).unwrap();
    scanner.prepare_scan(&0, &1_000).unwrap();
    let mut seen = Vec::new();
    for _ in 0..50 {
        seen.push(scanner.next_record().unwrap().unwrap().0);
    }
    assert_eq!(*seen.last().unwrap(), 490);

    // Behind the cursor, then ahead of it, with enough volume to split the
    // leaf the scan is parked on.
    tree.insert(5, 5).unwrap();
    for key in 491..499u64 {
        tree.insert(key, key).unwrap();
    }
    tree.insert(995, 995).unwrap();

    while let Some((key, _)) = scanner.next_record().unwrap() {
        seen.push(key);
    }
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert!(!seen.contains(&5));
    assert!(seen.contains(&995));
}

// ============================================================================
// Custom key order
// ============================================================================

/// Groups historian keys by point, then by time.
#[derive(Debug, Clone, Copy, Default)]
struct PointMajor;

impl KeyComparer<HistorianKey> for PointMajor {
    fn compare(&self, a: &HistorianKey, b: &HistorianKey) -> std::cmp::Ordering {
        (a.point_id, a.timestamp, a.entry_number).cmp(&(b.point_id, b.timestamp, b.entry_number))
    }
}

/// Orders keys from largest to smallest.
#[derive(Debug, Clone, Copy, Default)]
struct Descending;

impl KeyComparer<u64> for Descending {
    fn compare(&self, a: &u64, b: &u64) -> std::cmp::Ordering {
        b.cmp(a)
    }
}

#[test]
fn test_point_major_order_scans_one_point() {
    let file = new_file();
    let mut tree: SortedTree<HistorianKey, HistorianValue, PointMajor> =
        SortedTree::create(Arc::clone(&file), PointMajor, Some(6)).unwrap();
    // Time-major arrival lands in the middle of a point-major tree.
    for t in 0..200u64 {
        for point in 0..5u64 {
            let inserted = tree
                .insert(HistorianKey::new(t, point, 0), HistorianValue::new(t * 10 + point, 0, 0))
                .unwrap();
            assert!(inserted);
        }
    }
    assert!(tree.header().root_level >= 2);

    let mut scanner: TreeScanner<HistorianKey, HistorianValue, PointMajor> =
        TreeScanner::new(file, PointMajor).unwrap();
    scanner
        .prepare_scan(&HistorianKey::new(0, 3, 0), &HistorianKey::new(0, 4, 0))
        .unwrap();
    let mut expected = 0u64;
    while let Some((key, value)) = scanner.next_record().unwrap() {
        assert_eq!((key.point_id, key.timestamp), (3, expected));
        assert_eq!(value.value1, expected * 10 + 3);
        expected += 1;
    }
    assert_eq!(expected, 200);

    let key = HistorianKey::new(150, 1, 0);
    assert_eq!(scanner.get_value(&key).unwrap().map(|v| v.value1), Some(1501));
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Sequential,
    Reverse,
    Random,
}

fn ordered_keys(pattern: Pattern, mut keys: Vec<u64>) -> Vec<u64> {
    match pattern {
        Pattern::Sequential => {
            keys.sort_unstable();
            keys
        }
        Pattern::Reverse => {
            keys.sort_unstable_by(|a, b| b.cmp(a));
            keys
        }
        Pattern::Random => keys,
    }
}

fn pattern() -> impl Strategy<Value = Pattern> {
    prop_oneof![
        Just(Pattern::Sequential),
        Just(Pattern::Reverse),
        Just(Pattern::Random),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_full_scan_is_strictly_ascending(
        keys in prop::collection::vec(0u64..5_000, 1..600),
        pattern in pattern(),
        cap in 2usize..12,
    ) {
        let (mut tree, file) = new_tree(Some(cap));
        let mut model = BTreeMap::new();
        for key in ordered_keys(pattern, keys) {
            let inserted = tree.insert(key, key ^ 0xFF).unwrap();
            prop_assert_eq!(inserted, model.insert(key, key ^ 0xFF).is_none());
        }

        let scanned = scan(&file, 0, u64::MAX);
        prop_assert!(scanned.windows(2).all(|w| w[0].0 < w[1].0));
        let expected: Vec<(u64, u64)> = model.into_iter().collect();
        prop_assert_eq!(scanned, expected);
    }

    #[test]
    fn prop_inserted_values_read_back(
        keys in prop::collection::vec(any::<u64>(), 1..400),
        pattern in pattern(),
    ) {
        let (mut tree, _file) = new_tree(Some(6));
        let mut model = BTreeMap::new();
        let mut last_count = 0u64;
        for key in ordered_keys(pattern, keys) {
            let value = key.wrapping_mul(31);
            tree.insert(key, value).unwrap();
            model.entry(key).or_insert(value);

            // There is no removal, so the record count never goes down.
            let count = tree.record_count().unwrap();
            prop_assert!(count >= last_count);
            last_count = count;
        }
        prop_assert_eq!(last_count, model.len() as u64);
        for (key, value) in &model {
            prop_assert_eq!(tree.get_value(key).unwrap(), Some(*value));
        }
    }

    #[test]
    fn prop_scan_respects_bounds(
        keys in prop::collection::btree_set(0u64..2_000, 1..300),
        start in 0u64..2_100,
        len in 0u64..500,
    ) {
        let (mut tree, file) = new_tree(Some(5));
        for &key in &keys {
            tree.insert(key, key).unwrap();
        }
        let stop = start + len;
        let scanned: Vec<u64> = scan(&file, start, stop).into_iter().map(|r| r.0).collect();
        let expected: Vec<u64> = keys.range(start..stop).copied().collect();
        prop_assert_eq!(scanned, expected);
    }

    #[test]
    fn prop_descending_order_matches_model(
        keys in prop::collection::vec(1u64..5_000, 1..500),
        cap in 2usize..8,
    ) {
        let file = new_file();
        let mut tree: SortedTree<u64, u64, Descending> =
            SortedTree::create(Arc::clone(&file), Descending, Some(cap)).unwrap();
        let mut model = BTreeMap::new();
        for key in keys {
            tree.insert(key, key + 7).unwrap();
            model.entry(key).or_insert(key + 7);
        }
        for (key, value) in &model {
            prop_assert_eq!(tree.get_value(key).unwrap(), Some(*value));
        }

        // Everything above 0 in descending order.
        let mut scanner = TreeScanner::<u64, u64, Descending>::new(file, Descending).unwrap();
        scanner.prepare_scan(&u64::MAX, &0).unwrap();
        let mut scanned = Vec::new();
        while let Some(record) = scanner.next_record().unwrap() {
            scanned.push(record);
        }
        let expected: Vec<(u64, u64)> = model.into_iter().rev().collect();
        prop_assert_eq!(scanned, expected);
    }
}

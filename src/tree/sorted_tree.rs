//! The tree writer: point lookup, ordered insert and node splits.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::common::le::put_u32;
use crate::common::{Error, PageId, Result};
use crate::io::PagedFile;
use crate::tree::header::{NodeHeader, TreeHeader};
use crate::tree::node::{read_tree_header, validate_tree_header, Layout, NodeIo};
use crate::types::{KeyComparer, NaturalOrder, TreeType};

/// Where a key is, or would be, in its leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekResult {
    /// True if the key is stored.
    pub found: bool,
    /// Leaf block covering the key.
    pub block: u32,
    /// Record index of the key, or the index it would be inserted at.
    pub index: usize,
    /// Byte offset of that record within the file.
    pub offset: u64,
}

/// A sorted tree of fixed-size records in one paged file.
///
/// Block 0 holds the [`TreeHeader`]. Every other block is a node: leaves at
/// level 0 hold `(key, value)` records, index nodes above them hold
/// `(key, child)` entries where the key is the smallest key routed to that
/// child. Nodes at the same level form a doubly linked chain.
///
/// A `SortedTree` is the single writer of its file. Readers use
/// [`TreeScanner`](super::TreeScanner) with their own cursor.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use historiandb::buffer::PageCache;
/// use historiandb::io::PagedFile;
/// use historiandb::storage::MemoryStore;
/// use historiandb::tree::SortedTree;
///
/// let cache = Arc::new(PageCache::new(4096, 1 << 20).unwrap());
/// let store = Arc::new(MemoryStore::new(4096).unwrap());
/// let file = Arc::new(PagedFile::open(cache, store).unwrap());
///
/// let mut tree = SortedTree::<u64, u64>::create(file, Default::default(), None).unwrap();
/// assert!(tree.insert(7, 70).unwrap());
/// assert!(!tree.insert(7, 71).unwrap());
/// assert_eq!(tree.get_value(&7).unwrap(), Some(70));
/// ```
pub struct SortedTree<K, V, C = NaturalOrder> {
    io: NodeIo<K, V, C>,
    header: TreeHeader,
}

impl<K, V, C> SortedTree<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    // ========================================================================
    // Construction
    // ========================================================================

    /// Initialize a new tree in `file`: header in block 0, an empty root
    /// leaf in block 1.
    ///
    /// `max_leaf_children` caps leaf fan-out below what the block size
    /// allows. The cap is stored in the header and applies on reopen.
    pub fn create(file: Arc<PagedFile>, comparer: C, max_leaf_children: Option<usize>) -> Result<Self> {
        let block_size = file.page_size();
        let layout = Layout::new::<K, V>(block_size, max_leaf_children)?;
        let header = TreeHeader {
            block_size: block_size as u32,
            key_type: K::TYPE_ID,
            value_type: V::TYPE_ID,
            root: 1,
            root_level: 0,
            next_free_block: 2,
            max_leaf_children: layout.max_leaf_children as u32,
        };

        let mut tree = Self {
            io: NodeIo::new(file, layout, comparer),
            header,
        };
        tree.io.write_header(1, &NodeHeader::new(0, 0, 0))?;
        tree.persist_header()?;
        debug!(
            block_size,
            max_leaf_children = layout.max_leaf_children,
            "created tree"
        );
        Ok(tree)
    }

    /// Open an existing tree, validating its header against `K`, `V` and
    /// the file's block size.
    pub fn open(file: Arc<PagedFile>, comparer: C) -> Result<Self> {
        let block_size = file.page_size();
        let mut io = NodeIo::new(file, Layout::new::<K, V>(block_size, None)?, comparer);
        let header = read_tree_header(&mut io.stream)?
            .ok_or_else(|| Error::corruption("archive has no tree header"))?;
        validate_tree_header::<K, V>(&header, block_size)?;
        io.layout = Layout::new::<K, V>(block_size, Some(header.max_leaf_children as usize))?;

        debug!(
            root = header.root,
            root_level = header.root_level,
            blocks = header.next_free_block,
            "opened tree"
        );
        Ok(Self { io, header })
    }

    /// Open the tree in `file`, creating it if the file is empty.
    pub fn open_or_create(
        file: Arc<PagedFile>,
        comparer: C,
        max_leaf_children: Option<usize>,
    ) -> Result<Self> {
        let mut stream = crate::io::BinaryStream::new(Arc::clone(&file));
        match read_tree_header(&mut stream)? {
            Some(_) => Self::open(file, comparer),
            None => Self::create(file, comparer, max_leaf_children),
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Locate `key` in the leaf that covers it.
    pub fn seek_to_key(&mut self, key: &K) -> Result<SeekResult> {
        let mut path = Vec::new();
        let seek = self
            .io
            .descend(self.header.root, self.header.root_level, key, &mut path)?;
        Ok(SeekResult {
            found: seek.found,
            block: seek.block,
            index: seek.index,
            offset: self.io.layout.entry_offset(seek.block, 0, seek.index),
        })
    }

    /// Value stored under `key`, if any.
    pub fn get_value(&mut self, key: &K) -> Result<Option<V>> {
        let mut path = Vec::new();
        let seek = self
            .io
            .descend(self.header.root, self.header.root_level, key, &mut path)?;
        Ok(seek.value)
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert a record. Returns `false`, leaving the tree unchanged, if the
    /// key is already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool> {
        let mut path = Vec::new();
        let seek = self
            .io
            .descend(self.header.root, self.header.root_level, &key, &mut path)?;
        if seek.found {
            return Ok(false);
        }

        let full = seek.header.child_count as usize >= self.io.layout.max_leaf_children;
        let (block, index, split) = if full {
            let (block, index, split) = self.make_room(seek.block, seek.header, seek.index, &key)?;
            (block, index, Some(split))
        } else {
            (seek.block, seek.index, None)
        };

        let key_size = self.io.layout.key_size;
        self.io.insert_entry(block, 0, index, |slot| {
            key.write_bytes(&mut slot[..key_size]);
            value.write_bytes(&mut slot[key_size..]);
        })?;
        if let Some((separator, upper)) = split {
            self.insert_separator(&mut path, 0, separator, upper)?;
        }
        Ok(true)
    }

    /// Split the full node `block` so an entry for `key` fits at `index`.
    ///
    /// Returns the node and position that now receive the entry, and the
    /// separator and block the parent must route to once the entry is in
    /// place. When the node is the last at its level and the key sorts after
    /// every entry, a new empty sibling is started instead of moving half
    /// the entries.
    fn make_room(
        &mut self,
        block: u32,
        header: NodeHeader,
        index: usize,
        key: &K,
    ) -> Result<(u32, usize, (K, u32))> {
        let count = header.child_count as usize;
        let append = header.next_node == 0 && index == count;
        if !append && count < 2 {
            return Err(Error::corruption(format!(
                "cannot split block {} holding {} entries",
                block, count
            )));
        }
        let keep = if append { count } else { count >> 1 };

        let upper = self.split_node(block, header, keep)?;
        let separator = if append {
            *key
        } else {
            self.io.key(upper, 0)?.ok_or_else(|| {
                Error::corruption(format!("split left block {} empty", upper))
            })?
        };
        let split = (separator, upper);

        if append {
            Ok((upper, 0, split))
        } else if self.io.compare(key, &separator) != Ordering::Less {
            Ok((upper, index - keep, split))
        } else {
            Ok((block, index, split))
        }
    }

    /// Move entries `keep..` of `block` into a newly allocated right sibling.
    ///
    /// Returns the new block. Until the caller routes a separator to it, the
    /// new block is reachable only through the sibling chain.
    fn split_node(&mut self, block: u32, header: NodeHeader, keep: usize) -> Result<u32> {
        let layout = self.io.layout;
        let moved = header.child_count as usize - keep;
        let upper = self.allocate_block()?;

        if moved > 0 {
            self.io.stream.copy(
                layout.entry_offset(block, header.level, keep),
                layout.entry_offset(upper, header.level, 0),
                moved * layout.entry_size(header.level),
            )?;
        }

        // The new node must be complete before anything links to it.
        let upper_header = NodeHeader {
            level: header.level,
            child_count: moved as u16,
            previous_node: block,
            next_node: header.next_node,
        };
        self.io.write_header(upper, &upper_header)?;

        let kept = NodeHeader {
            child_count: keep as u16,
            next_node: upper,
            ..header
        };
        self.io.write_header(block, &kept)?;

        if header.next_node != 0 {
            self.io.with_node_mut(header.next_node, |next, _| {
                next.previous_node = upper;
                Ok(())
            })?;
        }

        debug!(block, upper, level = header.level, keep, moved, "split node");
        Ok(upper)
    }

    /// Route `key` to `child` from the level above `child_level`.
    fn insert_separator(
        &mut self,
        path: &mut Vec<u32>,
        child_level: u8,
        key: K,
        child: u32,
    ) -> Result<()> {
        let Some(parent) = path.pop() else {
            return self.grow_root(child_level, key, child);
        };

        let (header, found, index) = self.io.seek(parent, &key)?;
        if header.level != child_level + 1 {
            return Err(Error::corruption(format!(
                "index block {} is at level {}, expected {}",
                parent,
                header.level,
                child_level + 1
            )));
        }
        if found {
            return Err(Error::corruption(format!(
                "separator already present in index block {}",
                parent
            )));
        }

        let full = header.child_count as usize >= self.io.layout.max_index_children;
        let (block, index, split) = if full {
            let (block, index, split) = self.make_room(parent, header, index, &key)?;
            (block, index, Some(split))
        } else {
            (parent, index, None)
        };

        let key_size = self.io.layout.key_size;
        self.io.insert_entry(block, header.level, index, |slot| {
            key.write_bytes(&mut slot[..key_size]);
            put_u32(slot, key_size, child);
        })?;
        match split {
            Some((separator, upper)) => self.insert_separator(path, header.level, separator, upper),
            None => Ok(()),
        }
    }

    /// Put a new root above the current one.
    fn grow_root(&mut self, child_level: u8, key: K, child: u32) -> Result<()> {
        let old_root = self.header.root;
        if child_level == u8::MAX {
            return Err(Error::corruption("tree height overflow"));
        }
        let level = child_level + 1;
        let root = self.allocate_block()?;

        let layout = self.io.layout;
        let key_size = layout.key_size;
        self.io.file().with_page_mut(PageId::new(root), |bytes| {
            // Entry 0 routes everything below `key`; its key is never read.
            let first = layout.entry_start(level, 0);
            K::default().write_bytes(&mut bytes[first..first + key_size]);
            put_u32(bytes, first + key_size, old_root);
            let second = layout.entry_start(level, 1);
            key.write_bytes(&mut bytes[second..second + key_size]);
            put_u32(bytes, second + key_size, child);
            NodeHeader {
                level,
                child_count: 2,
                previous_node: 0,
                next_node: 0,
            }
            .write(bytes);
        })?;

        self.header.root = root;
        self.header.root_level = level;
        self.persist_header()?;
        debug!(root, levels = level + 1, "tree grew");
        Ok(())
    }

    fn allocate_block(&mut self) -> Result<u32> {
        let block = self.header.next_free_block;
        if block == u32::MAX {
            return Err(Error::InvalidConfiguration(
                "archive has no addressable blocks left".into(),
            ));
        }
        self.header.next_free_block += 1;
        self.persist_header()?;
        trace!(block, "allocated block");
        Ok(block)
    }

    fn persist_header(&mut self) -> Result<()> {
        self.io.stream.set_position(0);
        self.io.stream.write_all(&self.header.to_bytes())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// The archive header as last written.
    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    /// Leaf fan-out in effect.
    pub fn max_leaf_children(&self) -> usize {
        self.io.layout.max_leaf_children
    }

    /// Header of any node block.
    pub fn node_header(&mut self, block: u32) -> Result<NodeHeader> {
        self.io.read_header(block)
    }

    /// Leaf blocks from the left end of the chain to the right.
    pub fn leaf_blocks(&mut self) -> Result<Vec<u32>> {
        let (mut block, mut header) = self
            .io
            .leftmost_leaf(self.header.root, self.header.root_level)?;
        let mut blocks = vec![block];
        while header.next_node != 0 {
            if blocks.len() as u64 >= u64::from(self.header.next_free_block) {
                return Err(Error::corruption("leaf chain does not terminate"));
            }
            block = header.next_node;
            header = self.io.read_leaf_header(block)?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Total number of records.
    pub fn record_count(&mut self) -> Result<u64> {
        let mut total = 0u64;
        for block in self.leaf_blocks()? {
            total += u64::from(self.io.read_leaf_header(block)?.child_count);
        }
        Ok(total)
    }

    /// Key stored at `index` in leaf `block`.
    pub fn leaf_key(&mut self, block: u32, index: usize) -> Result<K> {
        self.io.read_leaf_header(block)?;
        self.io.key(block, index)?.ok_or_else(|| {
            Error::corruption(format!("record {} past the end of leaf {}", index, block))
        })
    }

    /// The file this tree lives in.
    pub fn file(&self) -> &Arc<PagedFile> {
        self.io.stream.file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PageCache;
    use crate::storage::MemoryStore;
    use crate::tree::TreeScanner;

    /// Orders keys from largest to smallest.
    #[derive(Debug, Clone, Copy, Default)]
    struct Descending;

    impl KeyComparer<u64> for Descending {
        fn compare(&self, a: &u64, b: &u64) -> Ordering {
            b.cmp(a)
        }
    }

    fn tree(block_size: usize, cap: Option<usize>) -> SortedTree<u64, u64> {
        let cache = Arc::new(PageCache::new(block_size, 256 * block_size).unwrap());
        let store = Arc::new(MemoryStore::new(block_size).unwrap());
        let file = Arc::new(PagedFile::open(cache, store).unwrap());
        SortedTree::create(file, NaturalOrder, cap).unwrap()
    }

    fn leaf_keys(tree: &mut SortedTree<u64, u64>, block: u32) -> Vec<u64> {
        let count = tree.node_header(block).unwrap().child_count as usize;
        (0..count).map(|i| tree.leaf_key(block, i).unwrap()).collect()
    }

    #[test]
    fn test_empty_tree() {
        let mut tree = tree(512, None);
        assert_eq!(tree.get_value(&1).unwrap(), None);
        assert_eq!(tree.leaf_blocks().unwrap(), vec![1]);
        assert_eq!(tree.record_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_keeps_leaf_sorted() {
        let mut tree = tree(512, None);
        for key in [5u64, 1, 9, 3, 7] {
            assert!(tree.insert(key, key * 10).unwrap());
        }
        assert_eq!(leaf_keys(&mut tree, 1), vec![1, 3, 5, 7, 9]);
        assert_eq!(tree.get_value(&7).unwrap(), Some(70));
    }

    #[test]
    fn test_duplicate_rejected_without_overwrite() {
        let mut tree = tree(512, None);
        assert!(tree.insert(4, 40).unwrap());
        assert!(!tree.insert(4, 41).unwrap());
        assert_eq!(tree.get_value(&4).unwrap(), Some(40));
        assert_eq!(tree.record_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_into_full_leaf_does_not_split() {
        let mut tree = tree(512, Some(4));
        for key in 0..4u64 {
            tree.insert(key, key).unwrap();
        }
        assert!(!tree.insert(2, 0).unwrap());
        assert_eq!(tree.leaf_blocks().unwrap().len(), 1);
    }

    #[test]
    fn test_seek_to_key_offsets() {
        let mut tree = tree(512, None);
        tree.insert(10, 0).unwrap();
        tree.insert(20, 0).unwrap();

        let hit = tree.seek_to_key(&20).unwrap();
        assert!(hit.found);
        assert_eq!(hit.index, 1);
        assert_eq!(hit.offset, 512 + 11 + 16);

        let miss = tree.seek_to_key(&15).unwrap();
        assert!(!miss.found);
        assert_eq!(miss.index, 1);
    }

    #[test]
    fn test_halving_split_links_siblings() {
        let mut tree = tree(512, Some(6));
        // Reverse order never takes the append path.
        for key in (0..7u64).rev() {
            tree.insert(key, key).unwrap();
        }
        let leaves = tree.leaf_blocks().unwrap();
        assert_eq!(leaves.len(), 2);

        let left = tree.node_header(leaves[0]).unwrap();
        let right = tree.node_header(leaves[1]).unwrap();
        assert_eq!(left.next_node, leaves[1]);
        assert_eq!(right.previous_node, leaves[0]);
        assert_eq!(left.child_count + right.child_count, 7);

        let low = leaf_keys(&mut tree, leaves[0]);
        let high = leaf_keys(&mut tree, leaves[1]);
        assert!(low.last() < high.first());
    }

    #[test]
    fn test_split_patches_next_previous_link() {
        let mut tree = tree(512, Some(4));
        for key in [10u64, 20, 30, 40] {
            tree.insert(key, 0).unwrap();
        }
        // Append path: 50 starts a new right leaf.
        tree.insert(50, 0).unwrap();
        // Halving split of the left leaf, whose next is the right leaf.
        tree.insert(15, 0).unwrap();

        let leaves = tree.leaf_blocks().unwrap();
        assert_eq!(leaves.len(), 3);
        for pair in leaves.windows(2) {
            assert_eq!(tree.node_header(pair[0]).unwrap().next_node, pair[1]);
            assert_eq!(tree.node_header(pair[1]).unwrap().previous_node, pair[0]);
        }
    }

    #[test]
    fn test_sequential_append_fills_leaves() {
        let mut tree = tree(4096, Some(100));
        for key in 0..1000u64 {
            tree.insert(key, key).unwrap();
        }
        let leaves = tree.leaf_blocks().unwrap();
        assert_eq!(leaves.len(), 10);
        for block in leaves {
            assert_eq!(tree.node_header(block).unwrap().child_count, 100);
        }
    }

    #[test]
    fn test_root_grows_through_index_splits() {
        // 512-byte blocks: 31 records per leaf, 41 entries per index node.
        let mut tree = tree(512, None);
        for key in (0..5000u64).map(|i| (i * 7919) % 5000) {
            assert!(tree.insert(key, key + 1).unwrap());
        }
        assert!(tree.header().root_level >= 2);
        for key in 0..5000u64 {
            assert_eq!(tree.get_value(&key).unwrap(), Some(key + 1));
        }
        assert_eq!(tree.record_count().unwrap(), 5000);
    }

    #[test]
    fn test_reopen_validates_types() {
        let cache = Arc::new(PageCache::new(512, 64 * 512).unwrap());
        let store = Arc::new(MemoryStore::new(512).unwrap());
        let file = Arc::new(PagedFile::open(cache, store).unwrap());

        let mut tree = SortedTree::<u64, u64>::create(Arc::clone(&file), NaturalOrder, Some(8)).unwrap();
        tree.insert(1, 2).unwrap();
        drop(tree);

        let mut reopened = SortedTree::<u64, u64>::open(Arc::clone(&file), NaturalOrder).unwrap();
        assert_eq!(reopened.max_leaf_children(), 8);
        assert_eq!(reopened.get_value(&1).unwrap(), Some(2));

        assert!(matches!(
            SortedTree::<u32, u64>::open(file, NaturalOrder),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_leaf_expected_but_index_found() {
        let mut tree = tree(512, None);
        tree.insert(1, 1).unwrap();
        // Mark the root leaf as an index node behind the tree's back.
        let file = Arc::clone(tree.file());
        file.write(512, &[1]).unwrap();
        let err = tree.leaf_blocks().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_lookup_follows_split_before_parent_update() {
        let mut tree = tree(512, Some(4));
        for key in [10u64, 20, 30, 40] {
            tree.insert(key, key + 1).unwrap();
        }
        // Split the root leaf but stop before any separator is written.
        let header = tree.node_header(1).unwrap();
        let upper = tree.split_node(1, header, 2).unwrap();
        assert_eq!(tree.header().root, 1);

        let file = Arc::clone(tree.file());
        let mut scanner = TreeScanner::<u64, u64>::new(file, NaturalOrder).unwrap();
        for key in [10u64, 20, 30, 40] {
            assert_eq!(scanner.get_value(&key).unwrap(), Some(key + 1));
        }
        assert_eq!(scanner.get_value(&35).unwrap(), None);
        assert_eq!(tree.seek_to_key(&40).unwrap().block, upper);

        scanner.prepare_scan(&0, &100).unwrap();
        let mut keys = Vec::new();
        while let Some((key, _)) = scanner.next_record().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_custom_order_across_index_levels() {
        let cache = Arc::new(PageCache::new(512, 256 * 512).unwrap());
        let store = Arc::new(MemoryStore::new(512).unwrap());
        let file = Arc::new(PagedFile::open(cache, store).unwrap());
        let mut tree: SortedTree<u64, u64, Descending> =
            SortedTree::create(file, Descending, Some(4)).unwrap();

        for key in (0..300u64).map(|i| (i * 37) % 300) {
            assert!(tree.insert(key, key * 3).unwrap());
        }
        assert!(tree.header().root_level >= 2);
        for key in 0..300u64 {
            assert_eq!(tree.get_value(&key).unwrap(), Some(key * 3));
        }
        assert_eq!(tree.get_value(&300).unwrap(), None);

        let mut keys = Vec::new();
        for block in tree.leaf_blocks().unwrap() {
            let count = tree.node_header(block).unwrap().child_count as usize;
            for index in 0..count {
                keys.push(tree.leaf_key(block, index).unwrap());
            }
        }
        assert_eq!(keys, (0..300u64).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_custom_order_sequential_appends() {
        let cache = Arc::new(PageCache::new(512, 256 * 512).unwrap());
        let store = Arc::new(MemoryStore::new(512).unwrap());
        let file = Arc::new(PagedFile::open(cache, store).unwrap());
        let mut tree: SortedTree<u64, u64, Descending> =
            SortedTree::create(file, Descending, Some(4)).unwrap();

        // Descending keys arrive in tree order and take the append path.
        for key in (0..200u64).rev() {
            tree.insert(key, key).unwrap();
        }
        assert!(tree.header().root_level >= 1);
        for block in tree.leaf_blocks().unwrap() {
            assert_eq!(tree.node_header(block).unwrap().child_count, 4);
        }
        assert_eq!(tree.get_value(&0).unwrap(), Some(0));
        assert_eq!(tree.get_value(&199).unwrap(), Some(199));
    }
}

//! Node access shared by the writer and the scanners.
//!
//! A block is exactly one cache page, so every node visit below runs under a
//! single page lease: the header and the entries it describes always come
//! from the same state of the page. A writer changes a node under one write
//! lease, which makes each node update atomic to readers.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::le::get_u32;
use crate::common::{Error, PageId, Result};
use crate::io::{BinaryStream, PagedFile};
use crate::tree::header::{NodeHeader, TreeHeader};
use crate::types::{KeyComparer, TreeType};

/// Size of a child pointer in an index entry.
const CHILD_POINTER_SIZE: usize = 4;

/// Sizes derived from the block size and the key/value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub block_size: usize,
    pub key_size: usize,
    pub value_size: usize,
    pub max_leaf_children: usize,
    pub max_index_children: usize,
}

impl Layout {
    /// Compute the layout, applying an optional cap on leaf fan-out.
    ///
    /// The cap can only lower the computed fan-out.
    pub fn new<K: TreeType, V: TreeType>(block_size: usize, cap: Option<usize>) -> Result<Self> {
        let usable = block_size.saturating_sub(NodeHeader::SIZE);
        let computed = usable / (K::SIZE + V::SIZE);
        let max_leaf_children = cap.map_or(computed, |cap| cap.min(computed));
        let max_index_children = usable / (K::SIZE + CHILD_POINTER_SIZE);

        if max_leaf_children < 2 || max_index_children < 3 {
            return Err(Error::InvalidConfiguration(format!(
                "{}-byte blocks hold {} records and {} index entries; need at least 2 and 3",
                block_size, max_leaf_children, max_index_children
            )));
        }
        let max_leaf_children = max_leaf_children.min(u16::MAX as usize);
        let max_index_children = max_index_children.min(u16::MAX as usize);

        Ok(Self {
            block_size,
            key_size: K::SIZE,
            value_size: V::SIZE,
            max_leaf_children,
            max_index_children,
        })
    }

    /// Bytes per leaf record.
    #[inline]
    pub fn record_size(&self) -> usize {
        self.key_size + self.value_size
    }

    /// Bytes per entry at `level`.
    #[inline]
    pub fn entry_size(&self, level: u8) -> usize {
        if level == 0 {
            self.record_size()
        } else {
            self.key_size + CHILD_POINTER_SIZE
        }
    }

    /// Maximum entries in a node at `level`.
    #[inline]
    pub fn capacity(&self, level: u8) -> usize {
        if level == 0 {
            self.max_leaf_children
        } else {
            self.max_index_children
        }
    }

    #[inline]
    pub fn block_offset(&self, block: u32) -> u64 {
        u64::from(block) * self.block_size as u64
    }

    /// Offset of entry `index` within its block.
    #[inline]
    pub fn entry_start(&self, level: u8, index: usize) -> usize {
        NodeHeader::SIZE + index * self.entry_size(level)
    }

    /// Byte offset of entry `index` in `block`.
    #[inline]
    pub fn entry_offset(&self, block: u32, level: u8, index: usize) -> u64 {
        self.block_offset(block) + self.entry_start(level, index) as u64
    }

    /// Decode the key of entry `index` from a block's bytes.
    #[inline]
    pub fn key_at<K: TreeType>(&self, bytes: &[u8], level: u8, index: usize) -> K {
        let at = self.entry_start(level, index);
        K::from_bytes(&bytes[at..at + self.key_size])
    }

    /// Decode the value of leaf record `index` from a block's bytes.
    #[inline]
    pub fn value_at<V: TreeType>(&self, bytes: &[u8], index: usize) -> V {
        let at = self.entry_start(0, index) + self.key_size;
        V::from_bytes(&bytes[at..at + self.value_size])
    }

    /// Child pointer of index entry `index`.
    #[inline]
    pub fn child_at(&self, bytes: &[u8], level: u8, index: usize) -> u32 {
        get_u32(bytes, self.entry_start(level, index) + self.key_size)
    }
}

/// Read the archive header from block 0.
pub(crate) fn read_tree_header(stream: &mut BinaryStream) -> Result<Option<TreeHeader>> {
    let mut buf = [0u8; TreeHeader::SIZE];
    stream.set_position(0);
    stream.read_exact(&mut buf)?;
    TreeHeader::from_bytes(&buf)
}

/// Check that an archive header matches this file and these types.
pub(crate) fn validate_tree_header<K: TreeType, V: TreeType>(
    header: &TreeHeader,
    block_size: usize,
) -> Result<()> {
    if header.block_size as usize != block_size {
        return Err(Error::InvalidConfiguration(format!(
            "archive block size is {}, file is opened with {}",
            header.block_size, block_size
        )));
    }
    if header.key_type != K::TYPE_ID {
        return Err(Error::TypeMismatch {
            expected: K::TYPE_ID,
            found: header.key_type,
        });
    }
    if header.value_type != V::TYPE_ID {
        return Err(Error::TypeMismatch {
            expected: V::TYPE_ID,
            found: header.value_type,
        });
    }
    if header.root == 0 || header.next_free_block <= header.root {
        return Err(Error::corruption(format!(
            "root block {} outside allocated range 1..{}",
            header.root, header.next_free_block
        )));
    }
    Ok(())
}

fn check_node(layout: &Layout, block: u32, header: &NodeHeader) -> Result<()> {
    if header.child_count as usize > layout.capacity(header.level) {
        return Err(Error::corruption(format!(
            "block {} holds {} entries, capacity is {}",
            block,
            header.child_count,
            layout.capacity(header.level)
        )));
    }
    Ok(())
}

/// Where a key is, or would be, in the leaf that covers it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeafSeek<V> {
    pub block: u32,
    pub header: NodeHeader,
    pub found: bool,
    pub index: usize,
    /// The stored value, read under the same lease as the search.
    pub value: Option<V>,
}

/// What one record position of a leaf holds.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LeafSlot<K, V> {
    Record(K, V),
    /// Past the last record; continue in this block.
    Next(u32),
    /// Past the last record of the last leaf.
    End,
}

enum Visit<V> {
    Leaf(LeafSeek<V>),
    Index {
        header: NodeHeader,
        slot: usize,
        child: u32,
    },
}

/// Typed access to the nodes of one archive.
///
/// Holds no node state of its own: every call names the block it works on
/// and returns header snapshots taken under the same lease as the entries.
pub(crate) struct NodeIo<K, V, C> {
    pub stream: BinaryStream,
    pub layout: Layout,
    pub comparer: C,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C> NodeIo<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    pub fn new(file: Arc<PagedFile>, layout: Layout, comparer: C) -> Self {
        Self {
            stream: BinaryStream::new(file),
            layout,
            comparer,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn file(&self) -> &Arc<PagedFile> {
        self.stream.file()
    }

    #[inline]
    pub fn compare(&self, a: &K, b: &K) -> Ordering {
        self.comparer.compare(a, b)
    }

    // ========================================================================
    // Single-lease node access
    // ========================================================================

    /// Run `f` over a node's header and bytes under one read lease.
    pub fn with_node<R>(
        &self,
        block: u32,
        f: impl FnOnce(&NodeHeader, &[u8]) -> Result<R>,
    ) -> Result<R> {
        if block == 0 {
            return Err(Error::corruption("block 0 referenced as a node"));
        }
        let layout = self.layout;
        self.file().with_page(PageId::new(block), |bytes| {
            let header = NodeHeader::read(bytes);
            check_node(&layout, block, &header)?;
            f(&header, bytes)
        })?
    }

    /// Run `f` over a node under one write lease. The header is written
    /// back if `f` succeeds.
    pub fn with_node_mut<R>(
        &self,
        block: u32,
        f: impl FnOnce(&mut NodeHeader, &mut [u8]) -> Result<R>,
    ) -> Result<R> {
        if block == 0 {
            return Err(Error::corruption("block 0 referenced as a node"));
        }
        let layout = self.layout;
        self.file().with_page_mut(PageId::new(block), |bytes| {
            let mut header = NodeHeader::read(bytes);
            check_node(&layout, block, &header)?;
            let result = f(&mut header, bytes)?;
            header.write(bytes);
            Ok(result)
        })?
    }

    /// Read and sanity-check a node header.
    pub fn read_header(&self, block: u32) -> Result<NodeHeader> {
        self.with_node(block, |header, _| Ok(*header))
    }

    /// Read a header that must belong to a leaf.
    pub fn read_leaf_header(&self, block: u32) -> Result<NodeHeader> {
        let header = self.read_header(block)?;
        if !header.is_leaf() {
            return Err(expected_leaf(block, &header));
        }
        Ok(header)
    }

    pub fn write_header(&self, block: u32, header: &NodeHeader) -> Result<()> {
        if block == 0 {
            return Err(Error::corruption("block 0 referenced as a node"));
        }
        self.file()
            .with_page_mut(PageId::new(block), |bytes| header.write(bytes))
    }

    /// Key of entry `index`, or `None` past the end of the node.
    pub fn key(&self, block: u32, index: usize) -> Result<Option<K>> {
        let layout = self.layout;
        self.with_node(block, |header, bytes| {
            let present = index < header.child_count as usize;
            Ok(present.then(|| layout.key_at(bytes, header.level, index)))
        })
    }

    /// Record `index` of a leaf, or where the scan goes next.
    pub fn leaf_slot(&self, block: u32, index: usize) -> Result<LeafSlot<K, V>> {
        let layout = self.layout;
        self.with_node(block, |header, bytes| {
            if !header.is_leaf() {
                return Err(expected_leaf(block, header));
            }
            Ok(if index < header.child_count as usize {
                LeafSlot::Record(layout.key_at(bytes, 0, index), layout.value_at(bytes, index))
            } else if header.next_node != 0 {
                LeafSlot::Next(header.next_node)
            } else {
                LeafSlot::End
            })
        })
    }

    /// Binary search the entries of a node.
    ///
    /// Returns `(true, i)` if entry `i` equals `key`, else `(false, i)` where
    /// `i` is the position that keeps the node sorted. Entry 0 of an index
    /// node is the lower bound of everything routed through the node and is
    /// never compared, so its key may hold any value.
    pub fn search(&self, header: &NodeHeader, bytes: &[u8], key: &K) -> (bool, usize) {
        let count = header.child_count as usize;
        let mut low = if header.is_leaf() { 0 } else { count.min(1) };
        let mut high = count;
        while low < high {
            let mid = low + (high - low) / 2;
            let entry: K = self.layout.key_at(bytes, header.level, mid);
            match self.compare(&entry, key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return (true, mid),
            }
        }
        (false, low)
    }

    /// Search one node under a single lease.
    pub fn seek(&self, block: u32, key: &K) -> Result<(NodeHeader, bool, usize)> {
        self.with_node(block, |header, bytes| {
            let (found, index) = self.search(header, bytes, key);
            Ok((*header, found, index))
        })
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// True if `key` sorts at or after the first entry of `sibling`.
    fn belongs_right(&self, sibling: u32, level: u8, key: &K) -> Result<bool> {
        let layout = self.layout;
        self.with_node(sibling, |header, bytes| {
            if header.level != level {
                return Err(Error::corruption(format!(
                    "sibling block {} is at level {}, expected {}",
                    sibling, header.level, level
                )));
            }
            if header.child_count == 0 {
                return Ok(false);
            }
            let first: K = layout.key_at(bytes, level, 0);
            Ok(self.compare(key, &first) != Ordering::Less)
        })
    }

    /// Walk from the root to the leaf covering `key`, recording every index
    /// block descended through in `path`.
    ///
    /// A split publishes the new right node before its parent learns about
    /// it. A lookup that reaches the end of a node whose right sibling
    /// already covers the key moves right, so readers never take the lock
    /// the writer holds.
    pub fn descend(
        &self,
        root: u32,
        root_level: u8,
        key: &K,
        path: &mut Vec<u32>,
    ) -> Result<LeafSeek<V>> {
        let layout = self.layout;
        let mut block = root;
        let mut level = root_level;
        loop {
            let visit = self.with_node(block, |header, bytes| {
                if header.level != level {
                    return Err(Error::corruption(format!(
                        "block {} is at level {}, expected {}",
                        block, header.level, level
                    )));
                }
                let (found, index) = self.search(header, bytes, key);
                if header.is_leaf() {
                    return Ok(Visit::Leaf(LeafSeek {
                        block,
                        header: *header,
                        found,
                        index,
                        value: found.then(|| layout.value_at(bytes, index)),
                    }));
                }
                if header.child_count == 0 {
                    return Err(Error::corruption(format!("index block {} is empty", block)));
                }
                // Last entry whose key is <= the search key.
                let slot = if found { index } else { index - 1 };
                Ok(Visit::Index {
                    header: *header,
                    slot,
                    child: layout.child_at(bytes, level, slot),
                })
            })?;

            match visit {
                Visit::Leaf(seek) => {
                    let at_end = !seek.found && seek.index == seek.header.child_count as usize;
                    let next = seek.header.next_node;
                    if at_end && next != 0 && self.belongs_right(next, 0, key)? {
                        block = next;
                        continue;
                    }
                    return Ok(seek);
                }
                Visit::Index {
                    header,
                    slot,
                    child,
                } => {
                    let last = slot + 1 == header.child_count as usize;
                    let next = header.next_node;
                    if last && next != 0 && self.belongs_right(next, level, key)? {
                        block = next;
                        continue;
                    }
                    path.push(block);
                    block = child;
                    level -= 1;
                }
            }
        }
    }

    /// The first leaf of the chain, found through child 0 at every level.
    pub fn leftmost_leaf(&self, root: u32, root_level: u8) -> Result<(u32, NodeHeader)> {
        let layout = self.layout;
        let mut block = root;
        let mut level = root_level;
        loop {
            let (header, child) = self.with_node(block, |header, bytes| {
                if header.level != level {
                    return Err(Error::corruption(format!(
                        "block {} is at level {}, expected {}",
                        block, header.level, level
                    )));
                }
                if header.is_leaf() {
                    return Ok((*header, 0));
                }
                if header.child_count == 0 {
                    return Err(Error::corruption(format!("index block {} is empty", block)));
                }
                Ok((*header, layout.child_at(bytes, level, 0)))
            })?;
            if header.is_leaf() {
                return Ok((block, header));
            }
            block = child;
            level -= 1;
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Open a slot at `index` of a node, let `fill` write the entry and bump
    /// the count, all under one write lease.
    pub fn insert_entry(
        &self,
        block: u32,
        level: u8,
        index: usize,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<()> {
        let layout = self.layout;
        self.with_node_mut(block, |header, bytes| {
            let count = header.child_count as usize;
            if header.level != level || index > count || count >= layout.capacity(level) {
                return Err(Error::corruption(format!(
                    "cannot place entry {} in block {} (level {}, {} entries)",
                    index, block, header.level, count
                )));
            }
            let size = layout.entry_size(level);
            let at = layout.entry_start(level, index);
            let end = layout.entry_start(level, count);
            bytes.copy_within(at..end, at + size);
            fill(&mut bytes[at..at + size]);
            header.child_count += 1;
            Ok(())
        })
    }
}

fn expected_leaf(block: u32, header: &NodeHeader) -> Error {
    Error::corruption(format!(
        "block {} is at level {}, expected a leaf",
        block, header.level
    ))
}

//! Block headers: the per-node header and the archive header in block 0.

use uuid::Uuid;

use crate::common::le::{get_u16, get_u32, get_u64, put_u16, put_u32, put_u64};
use crate::common::{Error, Result};

// ============================================================================
// Node header
// ============================================================================

/// Fixed header at the start of every node block.
///
/// # Layout
/// ```text
/// ┌───────┬────────────┬──────────────┬──────────┐
/// │ Level │ ChildCount │ PreviousNode │ NextNode │
/// │  1B   │     2B     │      4B      │    4B    │
/// └───────┴────────────┴──────────────┴──────────┘
/// ```
/// Level 0 is a leaf. Sibling links of 0 mean "none", since block 0 is
/// always the archive header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeHeader {
    pub level: u8,
    pub child_count: u16,
    pub previous_node: u32,
    pub next_node: u32,
}

impl NodeHeader {
    /// Serialized size.
    pub const SIZE: usize = 11;

    /// An empty node at `level` with the given siblings.
    pub fn new(level: u8, previous_node: u32, next_node: u32) -> Self {
        Self {
            level,
            child_count: 0,
            previous_node,
            next_node,
        }
    }

    /// True for level 0.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Decode from the first [`NodeHeader::SIZE`] bytes of a block.
    pub fn read(bytes: &[u8]) -> Self {
        Self {
            level: bytes[0],
            child_count: get_u16(bytes, 1),
            previous_node: get_u32(bytes, 3),
            next_node: get_u32(bytes, 7),
        }
    }

    /// Encode into the first [`NodeHeader::SIZE`] bytes of a block.
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.level;
        put_u16(bytes, 1, self.child_count);
        put_u32(bytes, 3, self.previous_node);
        put_u32(bytes, 7, self.next_node);
    }
}

// ============================================================================
// Tree header
// ============================================================================

/// "HSTTREE1"
const MAGIC: u64 = 0x3145_4552_5454_5348;

/// Current archive format version.
pub const FORMAT_VERSION: u16 = 1;

/// Archive header stored at the start of block 0.
///
/// # Layout
/// ```text
/// Offset  Size  Field
///      0     8  magic
///      8     2  version
///     10     4  block_size
///     14    16  key type id
///     30    16  value type id
///     46     4  root block
///     50     1  root level
///     51     4  next free block
///     55     4  max leaf children
///     59     4  crc32 of bytes 0..59
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    pub block_size: u32,
    pub key_type: Uuid,
    pub value_type: Uuid,
    pub root: u32,
    pub root_level: u8,
    pub next_free_block: u32,
    pub max_leaf_children: u32,
}

impl TreeHeader {
    /// Serialized size including the checksum.
    pub const SIZE: usize = 63;

    const CHECKSUM_OFFSET: usize = 59;

    /// Encode with a fresh checksum.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        put_u64(&mut buf, 0, MAGIC);
        put_u16(&mut buf, 8, FORMAT_VERSION);
        put_u32(&mut buf, 10, self.block_size);
        buf[14..30].copy_from_slice(self.key_type.as_bytes());
        buf[30..46].copy_from_slice(self.value_type.as_bytes());
        put_u32(&mut buf, 46, self.root);
        buf[50] = self.root_level;
        put_u32(&mut buf, 51, self.next_free_block);
        put_u32(&mut buf, 55, self.max_leaf_children);
        let crc = crc32fast::hash(&buf[..Self::CHECKSUM_OFFSET]);
        put_u32(&mut buf, Self::CHECKSUM_OFFSET, crc);
        buf
    }

    /// Decode and verify a header.
    ///
    /// Returns `Ok(None)` when the bytes are all zero, i.e. the archive has
    /// never been initialized.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        let bytes = &bytes[..Self::SIZE];
        if bytes.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let magic = get_u64(bytes, 0);
        if magic != MAGIC {
            return Err(Error::corruption(format!(
                "bad archive magic {:#018x}",
                magic
            )));
        }
        let expected = get_u32(bytes, Self::CHECKSUM_OFFSET);
        let actual = crc32fast::hash(&bytes[..Self::CHECKSUM_OFFSET]);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        let version = get_u16(bytes, 8);
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported archive version {}",
                version
            )));
        }

        let mut key = [0u8; 16];
        key.copy_from_slice(&bytes[14..30]);
        let mut value = [0u8; 16];
        value.copy_from_slice(&bytes[30..46]);

        Ok(Some(Self {
            block_size: get_u32(bytes, 10),
            key_type: Uuid::from_bytes(key),
            value_type: Uuid::from_bytes(value),
            root: get_u32(bytes, 46),
            root_level: bytes[50],
            next_free_block: get_u32(bytes, 51),
            max_leaf_children: get_u32(bytes, 55),
        }))
    }
}

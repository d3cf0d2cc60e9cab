//! Configuration constants for HistorianDB.

/// Default size of a block (and of the cache page holding it) in bytes.
///
/// A page is the in-memory copy of exactly one block, so block size and
/// page size are always the same number for a given archive file.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Smallest block size accepted. The tree header in block 0 must fit.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Largest block size accepted.
///
/// `ChildCount` is stored in 2 bytes, so a block may never hold more than
/// `u16::MAX` records. With 64KB blocks and 1-byte records that still holds.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Default upper bound on resident cache memory per database (64MB).
pub const DEFAULT_CACHE_SIZE_BYTES: usize = 64 * 1024 * 1024;

/// Maximum block index representable in a 4-byte sibling/child pointer.
pub const MAX_BLOCKS: u64 = u32::MAX as u64;

/// Returns true if `size` is an acceptable block size.
pub fn is_valid_block_size(size: usize) -> bool {
    size.is_power_of_two() && (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&size)
}

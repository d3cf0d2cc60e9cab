//! Page identifier type.

use std::fmt;

/// Identifies a page (one block) within a single archive file.
///
/// The page with index `n` lives at byte offset `n * page_size`. Blocks are
/// addressed with 4-byte pointers on disk, so `u32` covers every block a
/// file can reference.
///
/// Page 0 always holds the tree header, which is why sibling and child
/// pointers use 0 to mean "none".
///
/// # Example
/// ```
/// use historiandb::PageId;
///
/// let page_id = PageId::new(3);
/// assert_eq!(page_id.byte_offset(4096), 12288);
/// assert!(PageId::HEADER.is_header());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// The header page of an archive file.
    pub const HEADER: PageId = PageId(0);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    /// Page containing the given byte offset.
    #[inline]
    pub fn containing(offset: u64, page_size: usize) -> Self {
        PageId((offset / page_size as u64) as u32)
    }

    /// Byte offset of the first byte of this page.
    #[inline]
    pub fn byte_offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }

    /// Whether this is the header page (also the "no block" sentinel).
    #[inline]
    pub fn is_header(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}

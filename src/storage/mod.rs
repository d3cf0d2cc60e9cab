//! Storage layer - page stores and the page buffer.
//!
//! This module handles persistent (and non-persistent) block storage:
//! - [`PageStore`] - The I/O contract the page cache reads and writes through
//! - [`FileStore`] - One archive file on disk
//! - [`MemoryStore`] - In-memory mode with the identical block layout
//! - [`page`] - The page buffer type

mod file_store;
mod memory_store;
pub mod page;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

use crate::common::{PageId, Result};
use page::Page;

/// Backing storage for one archive, addressed in whole pages.
///
/// Pages that were never written read back as zeros; writing past the end
/// extends the store. This is the "load-or-create" behavior the page cache
/// relies on when a tree allocates a new block.
///
/// # Thread Safety
/// Implementations serialize their own I/O; the page cache calls them from
/// whichever thread triggered a miss, an eviction or a flush.
pub trait PageStore: Send + Sync {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;

    /// Fill `page` with the stored contents of `page_id`.
    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()>;

    /// Persist `page` as the contents of `page_id`.
    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()>;

    /// Force previously written pages to durable storage.
    fn sync(&self) -> Result<()>;

    /// Number of pages currently backed by storage.
    fn page_count(&self) -> u32;
}

//! Memory store - in-memory mode for archives.

use parking_lot::Mutex;

use crate::common::config::is_valid_block_size;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::PageStore;

/// A page store that keeps every page in memory.
///
/// Used for in-memory databases. Block and record layout are byte-for-byte
/// the same as in a [`FileStore`](super::FileStore); only the medium differs.
/// `sync` is a no-op.
pub struct MemoryStore {
    page_size: usize,
    pages: Mutex<Vec<Box<[u8]>>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new(page_size: usize) -> Result<Self> {
        if !is_valid_block_size(page_size) {
            return Err(Error::InvalidConfiguration(format!(
                "page size {} is not a power of two in the supported range",
                page_size
            )));
        }
        Ok(Self {
            page_size,
            pages: Mutex::new(Vec::new()),
        })
    }
}

impl PageStore for MemoryStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        let pages = self.pages.lock();
        match pages.get(page_id.0 as usize) {
            Some(stored) => page.copy_from(stored),
            None => page.reset(),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()> {
        let mut pages = self.pages.lock();
        let index = page_id.0 as usize;
        if index >= pages.len() {
            let page_size = self.page_size;
            pages.resize_with(index + 1, || vec![0u8; page_size].into_boxed_slice());
        }
        pages[index].copy_from_slice(page.as_slice());
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.pages.lock().len() as u32
    }
}

//! Paged file - byte-addressed access to one store through the page cache.

use std::sync::Arc;

use tracing::debug;

use crate::buffer::PageCache;
use crate::common::{Error, FileId, PageId, Result};
use crate::storage::PageStore;

/// A byte stream over one registered store.
///
/// Offsets map to pages as `offset / page_size`. Every access leases the
/// pages it touches for the duration of the call only, so any number of
/// [`BinaryStream`](super::BinaryStream) cursors can share one `PagedFile`
/// and see each other's writes without a flush.
///
/// Dropping the last handle unregisters the file from the cache. Unflushed
/// changes are discarded at that point; call [`PagedFile::flush`] first to
/// keep them.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use historiandb::buffer::PageCache;
/// use historiandb::io::PagedFile;
/// use historiandb::storage::MemoryStore;
///
/// let cache = Arc::new(PageCache::new(512, 64 * 512).unwrap());
/// let store = Arc::new(MemoryStore::new(512).unwrap());
/// let file = PagedFile::open(cache, store).unwrap();
///
/// file.write(510, &[1, 2, 3, 4]).unwrap();
/// let mut buf = [0u8; 4];
/// file.read(510, &mut buf).unwrap();
/// assert_eq!(buf, [1, 2, 3, 4]);
/// ```
pub struct PagedFile {
    cache: Arc<PageCache>,
    file: FileId,
    page_size: usize,
}

impl PagedFile {
    /// Register `store` with `cache` and wrap it.
    pub fn open(cache: Arc<PageCache>, store: Arc<dyn PageStore>) -> Result<Self> {
        let file = cache.register(store)?;
        let page_size = cache.page_size();
        Ok(Self {
            cache,
            file,
            page_size,
        })
    }

    /// Id the file's pages are cached under.
    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// Size of one page (and one tree block) in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The cache backing this file.
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Split `[offset, offset + len)` into per-page pieces.
    fn pieces(&self, offset: u64, len: usize) -> impl Iterator<Item = (PageId, usize, usize, usize)> {
        let page_size = self.page_size;
        let mut done = 0usize;
        std::iter::from_fn(move || {
            if done >= len {
                return None;
            }
            let at = offset + done as u64;
            let page = PageId::containing(at, page_size);
            let in_page = (at % page_size as u64) as usize;
            let n = (page_size - in_page).min(len - done);
            let piece = (page, in_page, done, n);
            done += n;
            Some(piece)
        })
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| Error::InvalidConfiguration("offset overflow".into()))?;
        let last_page = end.saturating_sub(1) / self.page_size as u64;
        if last_page > u64::from(u32::MAX) {
            return Err(Error::InvalidConfiguration(format!(
                "offset {} is beyond the last addressable page",
                end
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Byte access
    // ========================================================================

    /// Read `buf.len()` bytes starting at `offset`.
    ///
    /// Bytes that were never written read as zeros.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        for (page, in_page, at, n) in self.pieces(offset, buf.len()) {
            let guard = self.cache.lease_read(self.file, page)?;
            buf[at..at + n].copy_from_slice(&guard.as_slice()[in_page..in_page + n]);
        }
        Ok(())
    }

    /// Write `buf` starting at `offset`.
    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        for (page, in_page, at, n) in self.pieces(offset, buf.len()) {
            let mut guard = self.cache.lease_write(self.file, page)?;
            guard.as_mut_slice()[in_page..in_page + n].copy_from_slice(&buf[at..at + n]);
        }
        Ok(())
    }

    /// Run `f` over one page under a single read lease.
    ///
    /// Everything `f` sees comes from one consistent state of the page.
    pub fn with_page<R>(&self, page: PageId, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let guard = self.cache.lease_read(self.file, page)?;
        Ok(f(guard.as_slice()))
    }

    /// Run `f` over one page under a single write lease.
    pub fn with_page_mut<R>(&self, page: PageId, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut guard = self.cache.lease_write(self.file, page)?;
        Ok(f(guard.as_mut_slice()))
    }

    /// Move `len` bytes from `src` to `dst`. The ranges may overlap and may
    /// straddle page boundaries; the result is as if the source were first
    /// copied to a scratch buffer.
    pub fn copy(&self, src: u64, dst: u64, len: usize) -> Result<()> {
        if len == 0 || src == dst {
            return Ok(());
        }
        self.check_range(src, len)?;
        self.check_range(dst, len)?;

        let page_size = self.page_size as u64;
        let mut scratch = Vec::new();

        // Chunks never cross a page boundary on either side. Walking away
        // from the overlap means each chunk is read before it is overwritten.
        let forward = dst < src;
        let mut remaining = len as u64;
        while remaining > 0 {
            let (chunk_src, chunk_dst, n) = if forward {
                let done = len as u64 - remaining;
                let s = src + done;
                let d = dst + done;
                let n = remaining
                    .min(page_size - s % page_size)
                    .min(page_size - d % page_size);
                (s, d, n)
            } else {
                let s_end = src + remaining;
                let d_end = dst + remaining;
                let n = remaining
                    .min((s_end - 1) % page_size + 1)
                    .min((d_end - 1) % page_size + 1);
                (s_end - n, d_end - n, n)
            };
            self.copy_chunk(chunk_src, chunk_dst, n as usize, &mut scratch)?;
            remaining -= n;
        }
        Ok(())
    }

    fn copy_chunk(&self, src: u64, dst: u64, n: usize, scratch: &mut Vec<u8>) -> Result<()> {
        let src_page = PageId::containing(src, self.page_size);
        let dst_page = PageId::containing(dst, self.page_size);
        let src_in = (src % self.page_size as u64) as usize;
        let dst_in = (dst % self.page_size as u64) as usize;

        if src_page == dst_page {
            let mut guard = self.cache.lease_write(self.file, dst_page)?;
            guard
                .as_mut_slice()
                .copy_within(src_in..src_in + n, dst_in);
            return Ok(());
        }

        scratch.clear();
        {
            let guard = self.cache.lease_read(self.file, src_page)?;
            scratch.extend_from_slice(&guard.as_slice()[src_in..src_in + n]);
        }
        let mut guard = self.cache.lease_write(self.file, dst_page)?;
        guard.as_mut_slice()[dst_in..dst_in + n].copy_from_slice(scratch);
        Ok(())
    }

    /// Open a gap of `length` bytes at `position` by moving the
    /// `shift_length` bytes that follow it forward.
    ///
    /// The gap keeps its old contents until overwritten.
    pub fn insert_bytes(&self, position: u64, length: usize, shift_length: usize) -> Result<()> {
        self.copy(position, position + length as u64, shift_length)
    }

    /// Write every dirty page of this file, lowest page first, and sync.
    ///
    /// Returning `Ok` is the durability boundary.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush_file(self.file)
    }

    /// Discard this file's cached pages and unregister it.
    ///
    /// Later access through any handle fails with [`Error::Closed`].
    pub fn close(&self) {
        self.cache.unregister(self.file);
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        debug!(file = %self.file, "closing paged file");
        self.cache.unregister(self.file);
    }
}

impl std::fmt::Debug for PagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedFile")
            .field("file", &self.file)
            .field("page_size", &self.page_size)
            .finish()
    }
}

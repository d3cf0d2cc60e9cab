//! Frame - a slot in the page cache arena.
//!
//! A [`Frame`] holds a [`Page`] plus metadata needed for cache management:
//! - Which `(file, page)` is loaded (if any)
//! - Pin (lease) count
//! - Dirty flag for write-back tracking

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{FileId, PageId};
use crate::storage::page::Page;

/// Cache key: one page of one registered file.
pub type PageKey = (FileId, PageId);

/// A frame in the page cache.
///
/// The page buffer sits behind an `Arc<RwLock<_>>` so lease guards can own
/// their lock independently of the arena vector, which may grow while they
/// are alive.
///
/// # Thread Safety
/// - `page`: `RwLock` for read/write synchronization
/// - `key`: `Mutex` for safe updates
/// - `pin_count`: `AtomicU32`, only modified under the cache state lock
/// - `is_dirty`: `AtomicBool` for lock-free dirty tracking
pub struct Frame {
    page: Arc<RwLock<Page>>,
    key: Mutex<Option<PageKey>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new empty frame with a buffer of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(page_size))),
            key: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Shared handle to the page lock, for `read_arc`/`write_arc`.
    #[inline]
    pub(crate) fn page_lock(&self) -> &Arc<RwLock<Page>> {
        &self.page
    }

    /// Get the key of the loaded page.
    #[inline]
    pub fn key(&self) -> Option<PageKey> {
        *self.key.lock()
    }

    /// Set the key.
    #[inline]
    pub fn set_key(&self, key: Option<PageKey>) {
        *self.key.lock() = key;
    }

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    /// Get the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Check if the frame is currently leased.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Mark the frame as dirty (modified).
    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag.
    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Release);
    }

    /// Check if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Check if the frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.key().is_none()
    }

    /// Drop the page buffer. The frame keeps its arena slot.
    pub(crate) fn release_memory(&self) {
        *self.page.write() = Page::new(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() {
        let frame = Frame::new(512);
        assert!(frame.is_empty());
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
        assert_eq!(frame.page_lock().read().len(), 512);
    }

    #[test]
    fn test_frame_pin_unpin() {
        let frame = Frame::new(512);

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert!(frame.is_pinned());
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    #[should_panic(expected = "pin count underflow")]
    fn test_frame_unpin_underflow() {
        let frame = Frame::new(512);
        frame.unpin();
    }

    #[test]
    fn test_frame_key() {
        let frame = Frame::new(512);
        let key = (FileId(1), PageId::new(42));
        frame.set_key(Some(key));
        assert_eq!(frame.key(), Some(key));
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_frame_reinit_and_release() {
        let frame = Frame::new(512);
        frame.page_lock().write().as_mut_slice()[3] = 7;

        frame.page_lock().write().reinit(512);
        assert_eq!(frame.page_lock().read().as_slice()[3], 0);

        frame.release_memory();
        assert!(frame.page_lock().read().is_empty());

        frame.page_lock().write().reinit(1024);
        assert_eq!(frame.page_lock().read().len(), 1024);
    }
}

//! RAII lease guards for page access.
//!
//! - [`PageReadGuard`] - Shared read lease (multiple allowed)
//! - [`PageWriteGuard`] - Exclusive write lease (marks the page dirty)
//!
//! Both guards release their lease when dropped. A lease is meant to live
//! for one cursor operation, never across an I/O wait.

use std::ops::{Deref, DerefMut};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::buffer::frame::PageKey;
use crate::common::{FileId, FrameId, PageId};
use crate::storage::page::Page;

use super::page_cache::PageCache;

/// Guard for read-only page access.
pub struct PageReadGuard<'a> {
    cache: &'a PageCache,
    frame_id: FrameId,
    key: PageKey,
    lock: ArcRwLockReadGuard<RawRwLock, Page>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        cache: &'a PageCache,
        frame_id: FrameId,
        key: PageKey,
        lock: ArcRwLockReadGuard<RawRwLock, Page>,
    ) -> Self {
        Self {
            cache,
            frame_id,
            key,
            lock,
        }
    }

    /// File this page belongs to.
    #[inline]
    pub fn file_id(&self) -> FileId {
        self.key.0
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.key.1
    }

    /// Get the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.cache.release(self.frame_id, false);
    }
}

/// Guard for exclusive write access to a page.
///
/// The page is marked dirty while the lock is still held, so a concurrent
/// flush can never clear the flag between the write and the release.
pub struct PageWriteGuard<'a> {
    cache: &'a PageCache,
    frame_id: FrameId,
    key: PageKey,
    lock: ArcRwLockWriteGuard<RawRwLock, Page>,
    dirty: bool,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        cache: &'a PageCache,
        frame_id: FrameId,
        key: PageKey,
        lock: ArcRwLockWriteGuard<RawRwLock, Page>,
    ) -> Self {
        Self {
            cache,
            frame_id,
            key,
            lock,
            dirty: false,
        }
    }

    /// File this page belongs to.
    #[inline]
    pub fn file_id(&self) -> FileId {
        self.key.0
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.key.1
    }

    /// Get the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Explicitly mark the page dirty. Any `DerefMut` access does this too.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.dirty = true;
        &mut self.lock
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.cache.release(self.frame_id, self.dirty);
    }
}

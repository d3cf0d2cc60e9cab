//! Page cache - the shared in-memory layer above archive files.
//!
//! The [`PageCache`] provides:
//! - Leased page access keyed by `(file, page)`
//! - Pin-based reference counting
//! - Dirty tracking with explicit write-back
//! - Clock eviction that prefers clean pages
//! - A byte limit that can be changed at runtime

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::{debug, trace, warn};

use crate::buffer::frame::{Frame, PageKey};
use crate::buffer::replacer::ClockReplacer;
use crate::buffer::stats::CacheStats;
use crate::buffer::{PageReadGuard, PageWriteGuard};
use crate::common::config::is_valid_block_size;
use crate::common::{Error, FileId, FrameId, PageId, Result};
use crate::storage::page::Page;
use crate::storage::PageStore;

/// Caches fixed-size pages of any number of registered files.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │                          PageCache                           │
/// │  state: Mutex<CacheState>                                    │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐    │
/// │  │ page_table   │  │  free_list   │  │ stores           │    │
/// │  │ Key → Fid    │  │ Vec<FrameId> │  │ FileId → Store   │    │
/// │  └──────┬───────┘  └──────────────┘  └──────────────────┘    │
/// │         │          ┌──────────────┐                          │
/// │         │          │   replacer   │                          │
/// │         ▼          │ ClockReplacer│                          │
/// │  frames: RwLock<Vec<Arc<Frame>>>  └──────────────┘           │
/// │  [Frame0] [Frame1] [Frame2] ... (grows up to the limit)      │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `state`: one `Mutex` for the table, free list, replacer and stores
/// - `frames`: `RwLock`, written only to append a frame, under `state`
/// - each frame guards its page with its own `RwLock`
/// - `stats`: no lock, all atomic counters
///
/// Lock order is `state` then `frames`. A page lock is taken while holding
/// `state` only on a frame nobody has pinned.
///
/// # Usage
/// ```
/// use std::sync::Arc;
/// use historiandb::buffer::PageCache;
/// use historiandb::storage::MemoryStore;
/// use historiandb::PageId;
///
/// let cache = PageCache::new(4096, 1 << 20).unwrap();
/// let file = cache.register(Arc::new(MemoryStore::new(4096).unwrap())).unwrap();
///
/// {
///     let mut page = cache.lease_write(file, PageId::new(1)).unwrap();
///     page.as_mut_slice()[0] = 0xAB;
/// }
/// let page = cache.lease_read(file, PageId::new(1)).unwrap();
/// assert_eq!(page.as_slice()[0], 0xAB);
/// ```
pub struct PageCache {
    page_size: usize,
    frames: RwLock<Vec<Arc<Frame>>>,
    state: Mutex<CacheState>,
    stats: CacheStats,
}

struct CacheState {
    page_table: HashMap<PageKey, FrameId>,
    free_list: Vec<FrameId>,
    replacer: ClockReplacer,
    stores: HashMap<FileId, Arc<dyn PageStore>>,
    max_pages: usize,
}

/// Outcome of one attempt to map a key onto a frame.
enum Slot {
    /// Page was resident; the frame is pinned.
    Hit(FrameId, Arc<Frame>),
    /// Frame was claimed for the key and its page lock is held exclusively.
    Load(
        FrameId,
        ArcRwLockWriteGuard<RawRwLock, Page>,
        Arc<dyn PageStore>,
    ),
    /// Only dirty pages can be reclaimed; this one is pinned for write-back.
    WriteBack(FrameId, Arc<Frame>, PageKey, Arc<dyn PageStore>),
}

impl PageCache {
    /// Create a cache for pages of `page_size` bytes holding at most
    /// `max_bytes` worth of pages.
    ///
    /// # Errors
    /// `Error::InvalidConfiguration` if the page size is not a supported
    /// power of two or the limit is smaller than one page.
    pub fn new(page_size: usize, max_bytes: usize) -> Result<Self> {
        if !is_valid_block_size(page_size) {
            return Err(Error::InvalidConfiguration(format!(
                "page size {} is not a power of two in the supported range",
                page_size
            )));
        }
        let max_pages = Self::pages_for(page_size, max_bytes)?;

        Ok(Self {
            page_size,
            frames: RwLock::new(Vec::new()),
            state: Mutex::new(CacheState {
                page_table: HashMap::new(),
                free_list: Vec::new(),
                replacer: ClockReplacer::new(),
                stores: HashMap::new(),
                max_pages,
            }),
            stats: CacheStats::new(),
        })
    }

    fn pages_for(page_size: usize, max_bytes: usize) -> Result<usize> {
        let pages = max_bytes / page_size;
        if pages == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "cache limit of {} bytes holds no {}-byte page",
                max_bytes, page_size
            )));
        }
        Ok(pages)
    }

    // ========================================================================
    // Public API: Files
    // ========================================================================

    /// Register a backing store and return the id its pages are cached under.
    ///
    /// # Errors
    /// `Error::InvalidConfiguration` if the store's page size differs from
    /// the cache's.
    pub fn register(&self, store: Arc<dyn PageStore>) -> Result<FileId> {
        if store.page_size() != self.page_size {
            return Err(Error::InvalidConfiguration(format!(
                "store page size {} does not match cache page size {}",
                store.page_size(),
                self.page_size
            )));
        }
        let file = FileId::next();
        self.state.lock().stores.insert(file, store);
        debug!(%file, "registered store");
        Ok(file)
    }

    /// Forget a file and discard its cached pages without writing them.
    ///
    /// Pages still leased are dropped from the cache when their lease ends.
    pub fn unregister(&self, file: FileId) {
        let mut state = self.state.lock();
        state.stores.remove(&file);

        let keys: Vec<PageKey> = state
            .page_table
            .keys()
            .filter(|key| key.0 == file)
            .copied()
            .collect();
        let frames = self.frames.read();
        for key in &keys {
            if let Some(frame_id) = state.page_table.remove(key) {
                let frame = &frames[frame_id.index()];
                frame.set_key(None);
                frame.clear_dirty();
                if !frame.is_pinned() {
                    state.replacer.remove(frame_id);
                    state.free_list.push(frame_id);
                }
            }
        }
        debug!(%file, discarded = keys.len(), "unregistered store");
    }

    // ========================================================================
    // Public API: Leases
    // ========================================================================

    /// Lease a page for reading (shared access).
    ///
    /// Loads the page from its store on a miss, evicting another page when
    /// the cache is full. Pages past the end of the store read as zeros.
    ///
    /// # Errors
    /// - `Error::Closed` if the file is not registered
    /// - `Error::CacheExhausted` if every resident page is leased
    /// - I/O errors from the store
    pub fn lease_read(&self, file: FileId, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let key = (file, page_id);
        loop {
            match self.acquire(key)? {
                Slot::Hit(frame_id, frame) => {
                    let lock = frame.page_lock().read_arc();
                    if frame.key() != Some(key) {
                        drop(lock);
                        self.release(frame_id, false);
                        continue;
                    }
                    return Ok(PageReadGuard::new(self, frame_id, key, lock));
                }
                Slot::Load(frame_id, lock, store) => {
                    let lock = self.load(frame_id, key, lock, store.as_ref())?;
                    let lock = ArcRwLockWriteGuard::downgrade(lock);
                    return Ok(PageReadGuard::new(self, frame_id, key, lock));
                }
                Slot::WriteBack(frame_id, frame, victim, store) => {
                    self.write_back(frame_id, &frame, victim, store.as_ref())?;
                }
            }
        }
    }

    /// Lease a page for writing (exclusive access).
    ///
    /// The page is marked dirty when the guard is dropped after any mutable
    /// access. Errors are the same as [`PageCache::lease_read`].
    pub fn lease_write(&self, file: FileId, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let key = (file, page_id);
        loop {
            match self.acquire(key)? {
                Slot::Hit(frame_id, frame) => {
                    let lock = frame.page_lock().write_arc();
                    if frame.key() != Some(key) {
                        drop(lock);
                        self.release(frame_id, false);
                        continue;
                    }
                    return Ok(PageWriteGuard::new(self, frame_id, key, lock));
                }
                Slot::Load(frame_id, lock, store) => {
                    let lock = self.load(frame_id, key, lock, store.as_ref())?;
                    return Ok(PageWriteGuard::new(self, frame_id, key, lock));
                }
                Slot::WriteBack(frame_id, frame, victim, store) => {
                    self.write_back(frame_id, &frame, victim, store.as_ref())?;
                }
            }
        }
    }

    /// End a lease. Called by the guards while they still hold the page lock.
    pub(crate) fn release(&self, frame_id: FrameId, dirty: bool) {
        let frame = self.frame(frame_id);
        if dirty && frame.key().is_some() {
            frame.mark_dirty();
        }

        let mut state = self.state.lock();
        if frame.unpin() > 0 {
            return;
        }
        match frame.key() {
            None => {
                state.replacer.remove(frame_id);
                state.free_list.push(frame_id);
            }
            Some(key) if state.page_table.len() > state.max_pages && !frame.is_dirty() => {
                // Over the limit after a shrink; drop the page now.
                state.page_table.remove(&key);
                state.replacer.remove(frame_id);
                frame.set_key(None);
                state.free_list.push(frame_id);
                CacheStats::bump(&self.stats.evictions);
            }
            Some(_) => state.replacer.set_evictable(frame_id, true),
        }
    }

    // ========================================================================
    // Public API: Write-back
    // ========================================================================

    /// Write one page to its store if it is resident and dirty.
    ///
    /// Returns true if a write was issued.
    pub fn flush_page(&self, file: FileId, page_id: PageId) -> Result<bool> {
        let key = (file, page_id);
        let (frame_id, frame, store) = {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&key) else {
                return Ok(false);
            };
            let store = state.stores.get(&file).cloned().ok_or(Error::Closed)?;
            let frame = self.frame(frame_id);
            if !frame.is_dirty() {
                return Ok(false);
            }
            frame.pin();
            state.replacer.set_evictable(frame_id, false);
            (frame_id, frame, store)
        };

        let result = self.write_frame(&frame, key, store.as_ref());
        self.release(frame_id, false);
        result
    }

    /// Write every dirty page of `file` in ascending page order, then sync
    /// the store.
    ///
    /// Leases taken after the dirty set is captured are not waited for.
    pub fn flush_file(&self, file: FileId) -> Result<()> {
        let (mut dirty, store) = {
            let mut state = self.state.lock();
            let store = state.stores.get(&file).cloned().ok_or(Error::Closed)?;
            let frames = self.frames.read();
            let mut dirty = Vec::new();
            for (&key, &frame_id) in &state.page_table {
                let frame = &frames[frame_id.index()];
                if key.0 == file && frame.is_dirty() {
                    frame.pin();
                    dirty.push((key, frame_id, Arc::clone(frame)));
                }
            }
            drop(frames);
            for (_, frame_id, _) in &dirty {
                state.replacer.set_evictable(*frame_id, false);
            }
            (dirty, store)
        };
        dirty.sort_by_key(|(key, _, _)| key.1);

        let mut result = Ok(());
        for (key, frame_id, frame) in &dirty {
            if result.is_ok() {
                result = self.write_frame(frame, *key, store.as_ref()).map(|_| ());
            }
            self.release(*frame_id, false);
        }
        result?;

        store.sync()?;
        debug!(%file, pages = dirty.len(), "flushed file");
        Ok(())
    }

    // ========================================================================
    // Public API: Limits and introspection
    // ========================================================================

    /// Change the byte limit, reclaiming pages until the cache fits.
    ///
    /// Clean pages go first; dirty pages are written back before they are
    /// reclaimed. Leased pages are dropped as their leases end.
    ///
    /// # Errors
    /// `Error::InvalidConfiguration` if the limit is smaller than one page.
    pub fn set_maximum_size(&self, max_bytes: usize) -> Result<()> {
        let max_pages = Self::pages_for(self.page_size, max_bytes)?;
        self.state.lock().max_pages = max_pages;

        loop {
            let mut state = self.state.lock();
            if state.page_table.len() <= state.max_pages {
                break;
            }
            let frames = self.frames.read();
            let clean = state
                .replacer
                .evict(|fid| !frames[fid.index()].is_dirty());
            if let Some(frame_id) = clean {
                let frame = &frames[frame_id.index()];
                if let Some(key) = frame.key() {
                    state.page_table.remove(&key);
                }
                frame.set_key(None);
                frame.release_memory();
                state.free_list.push(frame_id);
                CacheStats::bump(&self.stats.evictions);
                continue;
            }

            let Some(frame_id) = state.replacer.find_victim(|_| true) else {
                warn!(
                    resident = state.page_table.len(),
                    max_pages, "cache over limit with every page leased"
                );
                break;
            };
            let frame = Arc::clone(&frames[frame_id.index()]);
            drop(frames);
            let Some(key) = frame.key() else {
                break;
            };
            let Some(store) = state.stores.get(&key.0).cloned() else {
                break;
            };
            frame.pin();
            state.replacer.set_evictable(frame_id, false);
            drop(state);
            self.write_back(frame_id, &frame, key, store.as_ref())?;
        }

        // Free frames beyond the limit keep no memory.
        let state = self.state.lock();
        let frames = self.frames.read();
        for frame_id in &state.free_list {
            frames[frame_id.index()].release_memory();
        }
        debug!(max_pages, "cache limit changed");
        Ok(())
    }

    /// Size of every cached page in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Current limit in pages.
    pub fn max_pages(&self) -> usize {
        self.state.lock().max_pages
    }

    /// Number of pages currently cached.
    pub fn resident_pages(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Number of cached pages with unwritten changes.
    pub fn dirty_pages(&self) -> usize {
        let state = self.state.lock();
        let frames = self.frames.read();
        state
            .page_table
            .values()
            .filter(|fid| frames[fid.index()].is_dirty())
            .count()
    }

    /// True if the page is resident.
    pub fn contains(&self, file: FileId, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&(file, page_id))
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn frame(&self, frame_id: FrameId) -> Arc<Frame> {
        Arc::clone(&self.frames.read()[frame_id.index()])
    }

    /// Map `key` onto a frame, pinning it.
    fn acquire(&self, key: PageKey) -> Result<Slot> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&key) {
            let frame = self.frame(frame_id);
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            CacheStats::bump(&self.stats.cache_hits);
            return Ok(Slot::Hit(frame_id, frame));
        }

        let store = state.stores.get(&key.0).cloned().ok_or(Error::Closed)?;

        let frame_id = if state.page_table.len() < state.max_pages {
            match state.free_list.pop() {
                Some(frame_id) => frame_id,
                None => {
                    let mut frames = self.frames.write();
                    frames.push(Arc::new(Frame::new(self.page_size)));
                    FrameId::new(frames.len() - 1)
                }
            }
        } else {
            let frames = self.frames.read();
            let clean = state
                .replacer
                .evict(|fid| !frames[fid.index()].is_dirty());
            match clean {
                Some(frame_id) => {
                    let frame = &frames[frame_id.index()];
                    if let Some(old) = frame.key() {
                        state.page_table.remove(&old);
                        trace!(file = %old.0, page = %old.1, %frame_id, "evicted clean page");
                    }
                    frame.set_key(None);
                    CacheStats::bump(&self.stats.evictions);
                    frame_id
                }
                None => {
                    let Some(frame_id) = state.replacer.find_victim(|_| true) else {
                        return Err(Error::CacheExhausted(state.page_table.len()));
                    };
                    let frame = Arc::clone(&frames[frame_id.index()]);
                    drop(frames);
                    let victim = frame.key().ok_or_else(|| {
                        Error::corruption(format!("{} is evictable but holds no page", frame_id))
                    })?;
                    let victim_store = state
                        .stores
                        .get(&victim.0)
                        .cloned()
                        .ok_or(Error::Closed)?;
                    frame.pin();
                    state.replacer.set_evictable(frame_id, false);
                    return Ok(Slot::WriteBack(frame_id, frame, victim, victim_store));
                }
            }
        };

        let frame = self.frame(frame_id);
        frame.set_key(Some(key));
        frame.clear_dirty();
        frame.pin();
        state.page_table.insert(key, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        // Unpinned and unmapped until now, so nobody else holds this lock.
        let lock = frame.page_lock().write_arc();
        CacheStats::bump(&self.stats.cache_misses);
        Ok(Slot::Load(frame_id, lock, store))
    }

    /// Fill a freshly claimed frame from its store.
    fn load(
        &self,
        frame_id: FrameId,
        key: PageKey,
        mut lock: ArcRwLockWriteGuard<RawRwLock, Page>,
        store: &dyn PageStore,
    ) -> Result<ArcRwLockWriteGuard<RawRwLock, Page>> {
        lock.reinit(self.page_size);
        if let Err(e) = store.read_page(key.1, &mut lock) {
            self.abandon(frame_id, key);
            drop(lock);
            self.release(frame_id, false);
            return Err(e);
        }
        CacheStats::bump(&self.stats.pages_read);
        Ok(lock)
    }

    /// Unmap a frame whose load failed. Waiters see the cleared key and retry.
    fn abandon(&self, frame_id: FrameId, key: PageKey) {
        let mut state = self.state.lock();
        if state.page_table.get(&key) == Some(&frame_id) {
            state.page_table.remove(&key);
        }
        self.frame(frame_id).set_key(None);
    }

    /// Write back a pinned dirty victim and drop the pin.
    fn write_back(
        &self,
        frame_id: FrameId,
        frame: &Frame,
        key: PageKey,
        store: &dyn PageStore,
    ) -> Result<()> {
        let result = self.write_frame(frame, key, store);
        if let Ok(true) = result {
            CacheStats::bump(&self.stats.dirty_evictions);
            debug!(file = %key.0, page = %key.1, %frame_id, "wrote back dirty page for eviction");
        }
        self.release(frame_id, false);
        result.map(|_| ())
    }

    /// Write a pinned frame if it still holds `key` and is dirty.
    fn write_frame(&self, frame: &Frame, key: PageKey, store: &dyn PageStore) -> Result<bool> {
        let page = frame.page_lock().read();
        if frame.key() != Some(key) || !frame.is_dirty() {
            return Ok(false);
        }
        store.write_page(key.1, &page)?;
        frame.clear_dirty();
        CacheStats::bump(&self.stats.pages_written);
        Ok(true)
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages())
            .field("resident_pages", &self.resident_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    const PAGE: usize = 512;

    fn memory_cache(max_pages: usize) -> (PageCache, FileId, Arc<MemoryStore>) {
        let cache = PageCache::new(PAGE, max_pages * PAGE).unwrap();
        let store = Arc::new(MemoryStore::new(PAGE).unwrap());
        let file = cache.register(store.clone()).unwrap();
        (cache, file, store)
    }

    fn write_byte(cache: &PageCache, file: FileId, page: u32, byte: u8) {
        let mut guard = cache.lease_write(file, PageId::new(page)).unwrap();
        guard.as_mut_slice()[0] = byte;
    }

    fn read_byte(cache: &PageCache, file: FileId, page: u32) -> u8 {
        cache.lease_read(file, PageId::new(page)).unwrap().as_slice()[0]
    }

    /// Store whose reads fail while `fail` is set.
    struct FlakyStore {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    impl PageStore for FlakyStore {
        fn page_size(&self) -> usize {
            self.inner.page_size()
        }
        fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("injected").into());
            }
            self.inner.read_page(page_id, page)
        }
        fn write_page(&self, page_id: PageId, page: &Page) -> Result<()> {
            self.inner.write_page(page_id, page)
        }
        fn sync(&self) -> Result<()> {
            Ok(())
        }
        fn page_count(&self) -> u32 {
            self.inner.page_count()
        }
    }

    #[test]
    fn test_new_rejects_bad_sizes() {
        assert!(PageCache::new(1000, 1 << 20).is_err());
        assert!(PageCache::new(PAGE, PAGE - 1).is_err());
        assert!(PageCache::new(PAGE, PAGE).is_ok());
    }

    #[test]
    fn test_register_rejects_page_size_mismatch() {
        let cache = PageCache::new(PAGE, 8 * PAGE).unwrap();
        let store = Arc::new(MemoryStore::new(1024).unwrap());
        assert!(matches!(
            cache.register(store),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unknown_file_is_closed() {
        let cache = PageCache::new(PAGE, 8 * PAGE).unwrap();
        assert!(matches!(
            cache.lease_read(FileId(u32::MAX), PageId::new(0)),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_missing_page_reads_zero() {
        let (cache, file, _) = memory_cache(4);
        let guard = cache.lease_read(file, PageId::new(9)).unwrap();
        assert!(guard.as_slice().iter().all(|&b| b == 0));
        assert_eq!(guard.page_id(), PageId::new(9));
        assert_eq!(guard.file_id(), file);
    }

    #[test]
    fn test_hit_and_miss_counted() {
        let (cache, file, _) = memory_cache(4);
        read_byte(&cache, file, 1);
        read_byte(&cache, file, 1);
        let snap = cache.stats().snapshot();
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hits, 1);
    }

    #[test]
    fn test_write_marks_dirty_until_flushed() {
        let (cache, file, store) = memory_cache(4);
        write_byte(&cache, file, 2, 0x5A);
        assert_eq!(cache.dirty_pages(), 1);
        assert_eq!(store.page_count(), 0);

        assert!(cache.flush_page(file, PageId::new(2)).unwrap());
        assert_eq!(cache.dirty_pages(), 0);
        assert!(!cache.flush_page(file, PageId::new(2)).unwrap());

        let mut page = Page::new(PAGE);
        store.read_page(PageId::new(2), &mut page).unwrap();
        assert_eq!(page.as_slice()[0], 0x5A);
    }

    #[test]
    fn test_read_lease_does_not_dirty() {
        let (cache, file, _) = memory_cache(4);
        read_byte(&cache, file, 0);
        let guard = cache.lease_write(file, PageId::new(0)).unwrap();
        assert_eq!(guard.as_slice()[0], 0);
        drop(guard);
        assert_eq!(cache.dirty_pages(), 0);
    }

    #[test]
    fn test_cache_never_exceeds_limit() {
        let (cache, file, _) = memory_cache(3);
        for page in 0..20 {
            write_byte(&cache, file, page, page as u8 + 1);
            assert!(cache.resident_pages() <= 3);
        }
        for page in 0..20 {
            assert_eq!(read_byte(&cache, file, page), page as u8 + 1);
        }
        assert!(cache.stats().snapshot().dirty_evictions > 0);
    }

    #[test]
    fn test_clean_pages_evicted_first() {
        let (cache, file, _) = memory_cache(2);
        write_byte(&cache, file, 0, 1);
        read_byte(&cache, file, 1);
        read_byte(&cache, file, 2);

        assert!(cache.contains(file, PageId::new(0)));
        assert!(!cache.contains(file, PageId::new(1)));
        assert_eq!(cache.stats().snapshot().dirty_evictions, 0);
    }

    #[test]
    fn test_exhausted_when_all_leased() {
        let (cache, file, _) = memory_cache(2);
        let _a = cache.lease_read(file, PageId::new(0)).unwrap();
        let _b = cache.lease_read(file, PageId::new(1)).unwrap();
        assert!(matches!(
            cache.lease_read(file, PageId::new(2)),
            Err(Error::CacheExhausted(2))
        ));
    }

    #[test]
    fn test_shared_read_leases() {
        let (cache, file, _) = memory_cache(2);
        let a = cache.lease_read(file, PageId::new(0)).unwrap();
        let b = cache.lease_read(file, PageId::new(0)).unwrap();
        assert_eq!(a.frame_id(), b.frame_id());
        assert_eq!(cache.resident_pages(), 1);
    }

    #[test]
    fn test_shrink_writes_back_dirty_pages() {
        let (cache, file, store) = memory_cache(8);
        for page in 0..8 {
            write_byte(&cache, file, page, 7);
        }
        cache.set_maximum_size(2 * PAGE).unwrap();
        assert_eq!(cache.max_pages(), 2);
        assert!(cache.resident_pages() <= 2);
        assert!(store.page_count() >= 6);
        for page in 0..8 {
            assert_eq!(read_byte(&cache, file, page), 7);
        }
    }

    #[test]
    fn test_shrink_to_zero_rejected() {
        let (cache, _, _) = memory_cache(2);
        assert!(cache.set_maximum_size(0).is_err());
        assert_eq!(cache.max_pages(), 2);
    }

    #[test]
    fn test_unregister_discards_without_flush() {
        let (cache, file, store) = memory_cache(4);
        write_byte(&cache, file, 0, 9);
        cache.unregister(file);
        assert_eq!(cache.resident_pages(), 0);
        assert_eq!(store.page_count(), 0);
        assert!(matches!(cache.flush_file(file), Err(Error::Closed)));
    }

    #[test]
    fn test_failed_load_leaves_no_entry() {
        let cache = PageCache::new(PAGE, 4 * PAGE).unwrap();
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(PAGE).unwrap(),
            fail: AtomicBool::new(true),
        });
        let file = cache.register(store.clone()).unwrap();

        assert!(cache.lease_read(file, PageId::new(3)).is_err());
        assert_eq!(cache.resident_pages(), 0);

        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(read_byte(&cache, file, 3), 0);
    }

    #[test]
    fn test_flush_file_persists_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.d2");

        {
            let cache = PageCache::new(PAGE, 4 * PAGE).unwrap();
            let store = Arc::new(FileStore::create(&path, PAGE).unwrap());
            let file = cache.register(store).unwrap();
            for page in 0..3 {
                write_byte(&cache, file, page, 0x10 + page as u8);
            }
            cache.flush_file(file).unwrap();
            assert_eq!(cache.dirty_pages(), 0);
        }

        let cache = PageCache::new(PAGE, 4 * PAGE).unwrap();
        let store = Arc::new(FileStore::open(&path, PAGE).unwrap());
        let file = cache.register(store).unwrap();
        for page in 0..3 {
            assert_eq!(read_byte(&cache, file, page), 0x10 + page as u8);
        }
    }

    #[test]
    fn test_two_files_share_cache() {
        let (cache, a, _) = memory_cache(4);
        let b = cache
            .register(Arc::new(MemoryStore::new(PAGE).unwrap()))
            .unwrap();
        write_byte(&cache, a, 0, 1);
        write_byte(&cache, b, 0, 2);
        assert_eq!(read_byte(&cache, a, 0), 1);
        assert_eq!(read_byte(&cache, b, 0), 2);
        assert_eq!(cache.resident_pages(), 2);
    }

    #[test]
    fn test_concurrent_leases() {
        use std::thread;

        let (cache, file, _) = memory_cache(4);
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let page = (t * 3 + i) % 10;
                        if i % 3 == 0 {
                            let mut guard = cache.lease_write(file, PageId::new(page)).unwrap();
                            guard.as_mut_slice()[1] = page as u8;
                        } else {
                            let guard = cache.lease_read(file, PageId::new(page)).unwrap();
                            let byte = guard.as_slice()[1];
                            assert!(byte == 0 || byte == page as u8);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.resident_pages() <= 4);
    }
}

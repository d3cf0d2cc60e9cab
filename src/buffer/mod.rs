//! Page cache management.
//!
//! The page cache sits between archive files and every cursor reading or
//! writing them. One cache serves all files of a database; pages are leased
//! for the duration of a single operation and never held across I/O waits.
//!
//! # Components
//! - [`PageCache`] - The shared page cache
//! - [`Frame`] - A slot in the cache holding a page + metadata
//! - [`PageReadGuard`] / [`PageWriteGuard`] - RAII leases for page access
//! - [`CacheStats`] - Performance statistics
//! - [`replacer`] - Eviction policy

mod frame;
mod page_cache;
mod page_guard;
pub mod replacer;
mod stats;

pub use frame::{Frame, PageKey};
pub use page_cache::PageCache;
pub use page_guard::{PageReadGuard, PageWriteGuard};
pub use stats::{CacheStats, StatsSnapshot};

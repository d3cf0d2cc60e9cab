//! File identifier type.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies one registered page store inside a page cache.
///
/// The cache is keyed by `(FileId, PageId)`, so several files can share a
/// single cache without their page indices colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    /// Allocate a process-unique file id.
    pub fn next() -> Self {
        FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.0)
    }
}

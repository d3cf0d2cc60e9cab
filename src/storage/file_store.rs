//! File store - positioned file I/O for archive pages.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::config::is_valid_block_size;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::PageStore;

/// Manages disk I/O for a single archive file.
///
/// # File Layout
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │(header) │ (node)  │ (node)  │         │ (node)  │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0    1×size   2×size    ...    N×size
/// ```
///
/// # Durability
/// Writes are not synced individually. [`PageStore::sync`] issues the
/// `fsync`; the page cache calls it at the end of a flush.
pub struct FileStore {
    path: PathBuf,
    page_size: usize,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    /// Number of pages in the file, rounding a partial tail page up.
    page_count: u32,
}

impl FileStore {
    /// Create a new archive file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;

        debug!(path = %path.as_ref().display(), page_size, "created archive file");
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            page_size,
            inner: Mutex::new(FileInner {
                file,
                page_count: 0,
            }),
        })
    }

    /// Open an existing archive file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let file_size = file.metadata()?.len();
        let page_count = file_size.div_ceil(page_size as u64) as u32;

        debug!(path = %path.as_ref().display(), page_count, "opened archive file");
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            page_size,
            inner: Mutex::new(FileInner { file, page_count }),
        })
    }

    /// Open an existing archive file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, page_size)
        } else {
            Self::create(path, page_size)
        }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the total size of the file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.inner.lock().file.metadata()?.len())
    }
}

impl PageStore for FileStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        debug_assert_eq!(page.len(), self.page_size);
        let mut inner = self.inner.lock();

        if page_id.0 >= inner.page_count {
            page.reset();
            return Ok(());
        }

        inner
            .file
            .seek(SeekFrom::Start(page_id.byte_offset(self.page_size)))?;

        // The tail page of a file may be short; zero whatever is missing.
        let buf = page.as_mut_slice();
        let mut filled = 0;
        while filled < buf.len() {
            match inner.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);

        Ok(())
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()> {
        debug_assert_eq!(page.len(), self.page_size);
        let mut inner = self.inner.lock();

        inner
            .file
            .seek(SeekFrom::Start(page_id.byte_offset(self.page_size)))?;
        inner.file.write_all(page.as_slice())?;

        if page_id.0 >= inner.page_count {
            inner.page_count = page_id.0 + 1;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.inner.lock().page_count
    }
}

fn check_page_size(page_size: usize) -> Result<()> {
    if !is_valid_block_size(page_size) {
        return Err(Error::InvalidConfiguration(format!(
            "page size {} is not a power of two in the supported range",
            page_size
        )));
    }
    Ok(())
}

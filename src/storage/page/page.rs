//! Page - the unit of I/O and caching.

/// A heap-allocated page of data.
///
/// Unlike a fixed-size array, the length is chosen at runtime so one cache
/// can serve archives created with different block sizes.
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code; copying a page is
/// always explicit through [`Page::copy_from`]. A `#[cfg(test)]` Clone is
/// provided for tests.
///
/// # Example
/// ```
/// use historiandb::storage::page::Page;
///
/// let mut page = Page::new(4096);
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert_eq!(page.len(), 4096);
/// ```
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Zero the page, reallocating first if it is not `size` bytes long.
    pub fn reinit(&mut self, size: usize) {
        if self.data.len() == size {
            self.reset();
        } else {
            self.data = vec![0u8; size].into_boxed_slice();
        }
    }

    /// Size of this page in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True once the buffer has been released by the cache.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrite this page with the contents of `src`.
    ///
    /// # Panics
    /// Panics if the lengths differ.
    pub fn copy_from(&mut self, src: &[u8]) {
        self.data.copy_from_slice(src);
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

//! Binary stream - a positioned typed cursor over a [`PagedFile`].

use std::sync::Arc;

use crate::common::{Error, Result};
use crate::io::PagedFile;

/// Largest encoding of a 7-bit variable-width `u64`.
pub const MAX_7BIT_U64_LEN: usize = 10;

/// Largest encoding of a 7-bit variable-width `u32`.
pub const MAX_7BIT_U32_LEN: usize = 5;

/// Encode `value` seven bits at a time, low bits first. The high bit of each
/// byte marks a continuation. Returns the number of bytes used.
pub fn encode_7bit(value: u64, out: &mut [u8; MAX_7BIT_U64_LEN]) -> usize {
    let mut value = value;
    let mut len = 0;
    while value >= 0x80 {
        out[len] = (value as u8) | 0x80;
        value >>= 7;
        len += 1;
    }
    out[len] = value as u8;
    len + 1
}

/// Decode a 7-bit value of at most `max_len` bytes, pulling bytes from `next`.
pub fn decode_7bit<F>(max_len: usize, mut next: F) -> Result<u64>
where
    F: FnMut() -> Result<u8>,
{
    let mut value = 0u64;
    for i in 0..max_len {
        let byte = next()?;
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            if max_len == MAX_7BIT_U32_LEN && value > u64::from(u32::MAX) {
                break;
            }
            return Ok(value);
        }
    }
    Err(Error::corruption("7-bit encoded integer is too long"))
}

macro_rules! fixed_width {
    ($($read:ident, $write:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "` and advance.")]
            pub fn $read(&mut self) -> Result<$ty> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                self.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }

            #[doc = concat!("Write a little-endian `", stringify!($ty), "` and advance.")]
            pub fn $write(&mut self, value: $ty) -> Result<()> {
                self.write_all(&value.to_le_bytes())
            }
        )*
    };
}

/// A read/write cursor over a shared [`PagedFile`].
///
/// Cursors are cheap: a file handle plus a position. Every cursor on the
/// same file resolves to the same cached pages, so a write through one is
/// visible to reads through the others immediately.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use historiandb::buffer::PageCache;
/// use historiandb::io::{BinaryStream, PagedFile};
/// use historiandb::storage::MemoryStore;
///
/// let cache = Arc::new(PageCache::new(512, 8 * 512).unwrap());
/// let store = Arc::new(MemoryStore::new(512).unwrap());
/// let file = Arc::new(PagedFile::open(cache, store).unwrap());
///
/// let mut writer = BinaryStream::new(Arc::clone(&file));
/// let mut reader = BinaryStream::new(file);
/// writer.write_u64(0xDEAD_BEEF).unwrap();
/// assert_eq!(reader.read_u64().unwrap(), 0xDEAD_BEEF);
/// ```
#[derive(Debug, Clone)]
pub struct BinaryStream {
    file: Arc<PagedFile>,
    position: u64,
}

impl BinaryStream {
    /// Create a cursor at position 0.
    pub fn new(file: Arc<PagedFile>) -> Self {
        Self { file, position: 0 }
    }

    /// The underlying file.
    pub fn file(&self) -> &Arc<PagedFile> {
        &self.file
    }

    /// Current byte position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the cursor.
    #[inline]
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Fill `buf` from the current position and advance.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Write `buf` at the current position and advance.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    // ========================================================================
    // Fixed width
    // ========================================================================

    /// Read one byte and advance.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Write one byte and advance.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    /// Read a boolean stored as one byte.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Write a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    fixed_width! {
        read_u16, write_u16 => u16;
        read_i16, write_i16 => i16;
        read_u32, write_u32 => u32;
        read_i32, write_i32 => i32;
        read_u64, write_u64 => u64;
        read_i64, write_i64 => i64;
        read_f64, write_f64 => f64;
    }

    // ========================================================================
    // Variable width
    // ========================================================================

    /// Write `value` in 7-bit variable-width encoding (1 to 5 bytes).
    pub fn write_7bit_u32(&mut self, value: u32) -> Result<()> {
        self.write_7bit_u64(u64::from(value))
    }

    /// Read a 7-bit variable-width `u32`.
    pub fn read_7bit_u32(&mut self) -> Result<u32> {
        let value = decode_7bit(MAX_7BIT_U32_LEN, || self.read_u8())?;
        // decode_7bit rejects anything wider for this length.
        Ok(value as u32)
    }

    /// Write `value` in 7-bit variable-width encoding (1 to 10 bytes).
    pub fn write_7bit_u64(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_7BIT_U64_LEN];
        let len = encode_7bit(value, &mut buf);
        self.write_all(&buf[..len])
    }

    /// Read a 7-bit variable-width `u64`.
    pub fn read_7bit_u64(&mut self) -> Result<u64> {
        decode_7bit(MAX_7BIT_U64_LEN, || self.read_u8())
    }

    // ========================================================================
    // Bulk moves
    // ========================================================================

    /// Move `length` bytes from `src` to `dst` within the file.
    pub fn copy(&self, src: u64, dst: u64, length: usize) -> Result<()> {
        self.file.copy(src, dst, length)
    }

    /// Open a gap of `length` bytes at the current position, moving the
    /// following `shift_length` bytes forward. The position is unchanged.
    pub fn insert_bytes(&self, length: usize, shift_length: usize) -> Result<()> {
        self.file.insert_bytes(self.position, length, shift_length)
    }

    /// Flush the underlying file.
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }
}

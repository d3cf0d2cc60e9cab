//! Byte-level file access on top of the page cache.
//!
//! - [`PagedFile`] - one store, addressed by byte offset, pages leased per call
//! - [`BinaryStream`] - positioned typed cursor; many may share one file

mod binary_stream;
mod paged_file;

pub use binary_stream::{
    decode_7bit, encode_7bit, BinaryStream, MAX_7BIT_U32_LEN, MAX_7BIT_U64_LEN,
};
pub use paged_file::PagedFile;

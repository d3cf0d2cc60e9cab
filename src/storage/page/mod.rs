//! Page buffer.
//!
//! A [`Page`] is the cached copy of exactly one block. Its size is fixed
//! per archive file (a power of two, see
//! [`is_valid_block_size`](crate::common::config::is_valid_block_size)).

#[allow(clippy::module_inception)]
mod page;

pub use page::Page;

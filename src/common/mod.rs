//! Common types and utilities shared across HistorianDB.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants
//! - Error types
//! - Identifiers (PageId, FrameId, FileId)
//! - Little-endian field helpers

pub mod config;
pub mod error;
mod file_id;
mod frame_id;
pub(crate) mod le;
mod page_id;

pub use error::{Error, Result};
pub use file_id::FileId;
pub use frame_id::FrameId;
pub use page_id::PageId;

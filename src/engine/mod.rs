//! Database engine: named sorted stores with a commit boundary.
//!
//! - [`Database`] - single-writer, multi-reader engine over one archive
//! - [`DatabaseConfig`] / [`DurabilityMode`] - how and where it is stored
//! - [`TreeStream`] - lazy, cancellable range read

mod config;
mod database;
mod stream;

pub use config::{DatabaseConfig, DurabilityMode, ARCHIVE_EXTENSION};
pub use database::{Database, TreeInfo};
pub use stream::{CancelHandle, TreeStream};

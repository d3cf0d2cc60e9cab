//! Client/server access to databases over TCP.
//!
//! - [`protocol`] - handshake, framing and message codes
//! - [`Server`] / [`ServerConfig`] - thread-per-connection server
//! - [`Client`] / [`ClientDatabase`] / [`ClientReader`] - blocking client
//!
//! A range read is streamed in `ReadBatch` frames as the server scans, so
//! the client starts consuming before the scan completes. A cancel is
//! honored at the next batch boundary.

mod client;
mod config;
mod database;
pub mod protocol;
mod server;

pub use client::{Client, ClientDatabase, ClientOptions, ClientReader};
pub use config::{ServerConfig, DEFAULT_PORT, DEFAULT_READ_BATCH_SIZE};
pub use database::{RawReader, ServerDatabase};
pub use protocol::DatabaseInfo;
pub use server::{Server, ServerHandle, ShutdownHandle};

//! HistorianDB - a time-series historian storage engine.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          HistorianDB                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │            Network Layer (net/)                          │   │
//! │  │   Server (thread per connection) ←─ frames ─→ Client     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │            Database Engine (engine/)                     │   │
//! │  │   single writer, many readers, hard commit, cancel       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │            B+Tree Node Engine (tree/)                    │   │
//! │  │   SortedTree (insert/split) + TreeScanner (range scan)   │   │
//! │  │   generic over TreeType keys/values (types/)             │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │            Paged File Stream (io/)                       │   │
//! │  │   PagedFile (byte offsets) + BinaryStream (cursor)       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │            Page Cache (buffer/)                          │   │
//! │  │   PageCache + Frame + CLOCK eviction + leases            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │            Storage Layer (storage/)                      │   │
//! │  │   PageStore: FileStore | MemoryStore                     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, FileId, Error, config)
//! - [`storage`] - Page stores and the page buffer
//! - [`buffer`] - Page cache and eviction
//! - [`io`] - Paged file stream and binary cursor
//! - [`types`] - Key/value serialization contract
//! - [`tree`] - B+Tree node engine
//! - [`engine`] - Database engine
//! - [`net`] - Client/server protocol
//!
//! # Quick Start
//! ```
//! use historiandb::{Database, DatabaseConfig, HistorianKey, HistorianValue};
//!
//! let db = Database::<HistorianKey, HistorianValue>::open(DatabaseConfig::in_memory("PPA")).unwrap();
//! db.write(HistorianKey::new(1_000, 7, 0), HistorianValue::new(42, 0, 0)).unwrap();
//! db.hard_commit().unwrap();
//!
//! let start = HistorianKey::new(0, 0, 0);
//! let stop = HistorianKey::new(2_000, 0, 0);
//! assert_eq!(db.read(&start, &stop).unwrap().count(), 1);
//! ```

pub mod buffer;
pub mod common;
pub mod engine;
pub mod io;
pub mod net;
pub mod storage;
pub mod tree;
pub mod types;

// Re-export commonly used items at crate root for convenience
pub use common::config::DEFAULT_BLOCK_SIZE;
pub use common::{Error, FileId, FrameId, PageId, Result};

pub use buffer::{CacheStats, PageCache, StatsSnapshot};
pub use engine::{Database, DatabaseConfig, DurabilityMode, TreeStream};
pub use io::{BinaryStream, PagedFile};
pub use net::{Client, ClientOptions, Server, ServerConfig};
pub use storage::page::Page;
pub use storage::{FileStore, MemoryStore, PageStore};
pub use tree::{SortedTree, TreeScanner};
pub use types::{HistorianKey, HistorianValue, KeyComparer, NaturalOrder, TreeType};

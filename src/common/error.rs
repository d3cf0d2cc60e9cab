//! Error types for HistorianDB.

use thiserror::Error;
use uuid::Uuid;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in HistorianDB.
///
/// Structural corruption is reported as [`Error::Corruption`] rather than a
/// panic; the engine never attempts to repair a damaged archive.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk or socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every resident page is leased and none can be reclaimed.
    #[error("page cache exhausted: all {0} resident pages are leased")]
    CacheExhausted(usize),

    /// A size, path or option was rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// On-disk structure does not match what the engine expects.
    #[error("structural corruption: {0}")]
    Corruption(String),

    /// Archive header checksum did not verify.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum computed over the header bytes.
        actual: u32,
    },

    /// Key or value type id differs from the one the archive was created with.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type id the caller asked for.
        expected: Uuid,
        /// Type id recorded in the archive or reported by the peer.
        found: Uuid,
    },

    /// No database is registered under the given name.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// A mutation was attempted on a read-only session.
    #[error("session is read-only")]
    ReadOnlySession,

    /// Malformed or unexpected protocol traffic.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reported by the remote server.
    #[error("server error: {0}")]
    Server(String),

    /// The database or connection has already been closed.
    #[error("closed")]
    Closed,
}

impl Error {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True for errors after which the data structure must not be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::ChecksumMismatch { .. })
    }
}

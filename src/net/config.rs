//! Server configuration, loaded from TOML.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::engine::DatabaseConfig;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 38402;

/// Default number of records per `ReadBatch` frame.
pub const DEFAULT_READ_BATCH_SIZE: usize = 1000;

/// Server configuration.
///
/// # Example
/// ```toml
/// host = "0.0.0.0"
/// port = 38402
/// read_only = false
///
/// [[databases]]
/// name = "PPA"
/// paths = ["/var/lib/historian"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on. 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Accept read-only sessions only.
    #[serde(default)]
    pub read_only: bool,

    /// Records per `ReadBatch`; cancellation is checked between batches.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    /// Databases served.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_read_batch_size() -> usize {
    DEFAULT_READ_BATCH_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_only: false,
            read_batch_size: default_read_batch_size(),
            databases: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidConfiguration(e.to_string()))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::InvalidConfiguration(e.to_string()))
    }

    /// Save to a TOML file, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the server settings and every database.
    pub fn validate(&self) -> Result<()> {
        if self.read_batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "read_batch_size must be at least 1".to_string(),
            ));
        }
        for (i, db) in self.databases.iter().enumerate() {
            db.validate()?;
            if self.databases[..i].iter().any(|other| other.name == db.name) {
                return Err(Error::InvalidConfiguration(format!(
                    "database '{}' is configured twice",
                    db.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve `host:port`.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::InvalidConfiguration(format!("cannot resolve {}:{}", self.host, self.port))
            })
    }

    // Builder-style setters

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn database(mut self, database: DatabaseConfig) -> Self {
        self.databases.push(database);
        self
    }
}

//! Per-database configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::config::{is_valid_block_size, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_SIZE_BYTES};
use crate::common::{Error, Result};

/// Extension of archive files.
pub const ARCHIVE_EXTENSION: &str = "d2";

/// When writes become durable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// Durable at `hard_commit`.
    #[default]
    Buffered,
    /// Every write is flushed before it is acknowledged.
    Immediate,
}

/// Configuration of one named database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Name clients connect with.
    pub name: String,

    /// Directories searched for the archive; a new archive goes in the first.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Keep everything in memory; `paths` is ignored.
    #[serde(default)]
    pub in_memory: bool,

    #[serde(default)]
    pub durability: DurabilityMode,

    /// Block (and cache page) size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Page cache limit in bytes.
    #[serde(default = "default_cache_size")]
    pub cache_size_bytes: usize,

    /// Cap on records per leaf, applied when the archive is created.
    #[serde(default)]
    pub max_leaf_children: Option<usize>,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE_BYTES
}

impl DatabaseConfig {
    /// An on-disk database stored under `path`.
    pub fn on_disk(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            paths: vec![path.into()],
            in_memory: false,
            durability: DurabilityMode::default(),
            block_size: default_block_size(),
            cache_size_bytes: default_cache_size(),
            max_leaf_children: None,
        }
    }

    /// An in-memory database.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            in_memory: true,
            paths: Vec::new(),
            ..Self::on_disk(name, PathBuf::new())
        }
    }

    /// Set the durability mode.
    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set the block size.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the cache limit.
    pub fn cache_size_bytes(mut self, bytes: usize) -> Self {
        self.cache_size_bytes = bytes;
        self
    }

    /// Cap the number of records per leaf.
    pub fn max_leaf_children(mut self, max: usize) -> Self {
        self.max_leaf_children = Some(max);
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfiguration("database name is empty".into()));
        }
        if !is_valid_block_size(self.block_size) {
            return Err(Error::InvalidConfiguration(format!(
                "block size {} is not a power of two in the supported range",
                self.block_size
            )));
        }
        if self.cache_size_bytes < self.block_size {
            return Err(Error::InvalidConfiguration(format!(
                "cache of {} bytes cannot hold one {}-byte block",
                self.cache_size_bytes, self.block_size
            )));
        }
        if !self.in_memory && self.paths.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "database '{}' has no storage path",
                self.name
            )));
        }
        Ok(())
    }

    /// File name of this database's archive.
    pub fn archive_name(&self) -> String {
        format!("{}.{}", self.name, ARCHIVE_EXTENSION)
    }

    /// The first existing archive along `paths`, if any.
    pub fn find_archive(&self) -> Option<PathBuf> {
        let name = self.archive_name();
        self.paths
            .iter()
            .map(|dir| dir.join(&name))
            .find(|path| path.is_file())
    }

    /// Where a new archive is created.
    pub fn new_archive_path(&self) -> Option<PathBuf> {
        self.paths.first().map(|dir| dir.join(self.archive_name()))
    }

    /// Directory a new archive goes in.
    pub fn primary_path(&self) -> Option<&Path> {
        self.paths.first().map(PathBuf::as_path)
    }
}

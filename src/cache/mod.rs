//! Hash caching module for MediaDupe.
//!
//! This module provides persistent storage for hashes, probe results and
//! fingerprints so that unchanged files are not re-read on later runs.
//!
//! # Architecture
//!
//! The caching system is split into two main components:
//!
//! * [`entry`]: Key derivation and the on-disk entry format.
//! * [`store`]: The [`HashCache`] directory store with atomic writes and TTL.
//!
//! # Cache Invalidation
//!
//! Keys are derived from:
//! * A namespace (`partial`, `sha256`, `probe`, ...)
//! * File path
//! * File size
//! * Modification time (mtime)
//!
//! If the size or mtime of a file changes its key changes too, so the old
//! entry is simply never read again. Entries older than the configured TTL
//! are misses. Corrupt entries are misses; reads never fail.

pub mod entry;
pub mod store;

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub use entry::{CacheKey, EntryHeader, ENTRY_VERSION};
pub use store::{CacheStats, HashCache};

/// Errors from cache writes and maintenance.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The cache root could not be created or written.
    #[error("Cache I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A payload could not be serialized.
    #[error("Cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No cache directory could be determined for this platform.
    #[error("Could not determine a cache directory")]
    NoCacheDir,
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Use the cache at all
    pub enabled: bool,
    /// Cache directory (None = platform cache dir + `hashes/`)
    pub root: Option<PathBuf>,
    /// Entry lifetime in seconds (None = never expires, 0 = always miss)
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
            ttl_seconds: None,
        }
    }
}

impl CacheConfig {
    /// Cache root to use, resolving the platform default.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NoCacheDir` when no root is configured and the
    /// platform has no cache directory.
    pub fn resolved_root(&self) -> CacheResult<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => default_cache_root().ok_or(CacheError::NoCacheDir),
        }
    }
}

/// Platform cache directory for hash entries.
#[must_use]
pub fn default_cache_root() -> Option<PathBuf> {
    ProjectDirs::from("com", "mediadupe", "mediadupe").map(|dirs| dirs.cache_dir().join("hashes"))
}

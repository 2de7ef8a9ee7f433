//! Directory-backed key/payload store.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::entry::{self, CacheKey, EntryHeader};
use super::{CacheError, CacheResult};

/// Hit/miss/write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that returned a payload
    pub hits: u64,
    /// Reads that returned nothing
    pub misses: u64,
    /// Successful writes
    pub writes: u64,
}

/// Persistent cache of payloads, one file per key.
///
/// Reads never fail: a missing, truncated, corrupt or expired entry is a
/// miss. Writes go to a temporary file that is renamed into place, so a
/// reader never observes a half-written entry.
///
/// Only one process should write to a cache root at a time; the pipeline's
/// run lock provides that guarantee.
#[derive(Debug)]
pub struct HashCache {
    root: PathBuf,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    temp_counter: AtomicU64,
}

impl HashCache {
    /// Open (creating if necessary) a cache rooted at `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Cache directory
    /// * `ttl` - Entry lifetime; `Some(Duration::ZERO)` makes every read a miss
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>, ttl: Option<Duration>) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        log::debug!("Opened hash cache at {}", root.display());
        Ok(Self {
            root,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ttl_ms(&self) -> Option<i64> {
        self.ttl
            .map(|ttl| i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    /// Payload stored under `key`, or `None` on any kind of miss.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let found = self.read_entry(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    fn read_entry(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = key.entry_path(&self.root);
        let bytes = fs::read(&path).ok()?;
        let Some((header, payload)) = entry::decode(&bytes) else {
            log::trace!("Ignoring malformed cache entry {}", path.display());
            return None;
        };
        if header.is_expired(self.ttl_ms(), chrono::Utc::now().timestamp_millis()) {
            return None;
        }
        Some(payload.to_vec())
    }

    /// Store `payload` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the entry cannot be written, or
    /// `CacheError::Serialize` if its header cannot be encoded.
    pub fn put(&self, key: &CacheKey, payload: &[u8]) -> CacheResult<()> {
        let path = key.entry_path(&self.root);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| CacheError::Io { path, source }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let temp = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let bytes = entry::encode(&EntryHeader::now(), payload)?;

        let written = File::create(&temp)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .map_err(io_err(&temp));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(CacheError::Io { path, source: e });
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Deserialize a JSON payload. Undecodable payloads are misses.
    #[must_use]
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = self.get(key)?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Store a value as a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if serialization or the write fails.
    pub fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes)
    }

    /// Delete expired and unreadable entries.
    ///
    /// Never called implicitly; expired entries are otherwise left in place
    /// and treated as misses.
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the cache root cannot be listed.
    pub fn purge_expired(&self) -> CacheResult<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let ttl = self.ttl_ms();
        let shards = fs::read_dir(&self.root).map_err(|source| CacheError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut removed = 0;
        for shard in shards.flatten() {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let Ok(entries) = fs::read_dir(&shard_path) else {
                continue;
            };
            for item in entries.flatten() {
                let path = item.path();
                if path.extension().and_then(|e| e.to_str()) != Some("entry") {
                    continue;
                }
                let stale = match fs::read(&path) {
                    Ok(bytes) => match entry::decode(&bytes) {
                        Some((header, _)) => header.is_expired(ttl, now),
                        None => true,
                    },
                    Err(_) => false,
                };
                if stale && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }

        log::debug!("Purged {} cache entries", removed);
        Ok(removed)
    }

    /// Snapshot of hit/miss/write counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

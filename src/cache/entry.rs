//! Cache keys and the on-disk entry format.
//!
//! An entry file holds one JSON header line followed by the raw payload:
//!
//! ```text
//! {"created_ms":1700000000000,"version":1}
//! <payload bytes>
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current entry format version.
pub const ENTRY_VERSION: u32 = 1;

/// Identity of a cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    digest: String,
}

impl CacheKey {
    /// Key for a value computed from a file.
    ///
    /// # Arguments
    ///
    /// * `namespace` - Kind of value (`partial`, `sha256`, `probe`, ...)
    /// * `path` - File the value was computed from
    /// * `size` - File size when the value was computed
    /// * `mtime` - Modification time when the value was computed
    #[must_use]
    pub fn for_file(namespace: &str, path: &Path, size: u64, mtime: SystemTime) -> Self {
        let nanos: i128 = match mtime.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i128,
            Err(e) => -(e.duration().as_nanos() as i128),
        };

        let mut hasher = blake3::Hasher::new();
        hasher.update(namespace.as_bytes());
        hasher.update(&[0]);
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(&size.to_le_bytes());
        hasher.update(&nanos.to_le_bytes());

        Self {
            namespace: sanitize_namespace(namespace),
            digest: hasher.finalize().to_hex().to_string(),
        }
    }

    /// Key for an arbitrary identifier.
    #[must_use]
    pub fn raw(namespace: &str, id: &str) -> Self {
        Self {
            namespace: sanitize_namespace(namespace),
            digest: blake3::hash(id.as_bytes()).to_hex().to_string(),
        }
    }

    /// Namespace, restricted to file-name-safe characters.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Hex digest.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Location of this key's entry under `root`.
    #[must_use]
    pub fn entry_path(&self, root: &Path) -> PathBuf {
        root.join(&self.digest[..2])
            .join(format!("{}-{}.entry", self.namespace, self.digest))
    }
}

fn sanitize_namespace(namespace: &str) -> String {
    let cleaned: String = namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// Header line of an entry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Creation time in milliseconds since the Unix epoch
    pub created_ms: i64,
    /// Entry format version
    pub version: u32,
}

impl EntryHeader {
    /// Header stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            created_ms: chrono::Utc::now().timestamp_millis(),
            version: ENTRY_VERSION,
        }
    }

    /// Whether an entry created at `created_ms` has outlived `ttl_ms` at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, ttl_ms: Option<i64>, now_ms: i64) -> bool {
        match ttl_ms {
            None => false,
            Some(ttl) => now_ms.saturating_sub(self.created_ms) >= ttl,
        }
    }
}

/// Serialize header and payload into entry bytes.
///
/// # Errors
///
/// Returns the `serde_json` error if the header cannot be serialized.
pub fn encode(header: &EntryHeader, payload: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(header)?;
    bytes.reserve(payload.len() + 1);
    bytes.push(b'\n');
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Split entry bytes into header and payload.
///
/// Returns `None` for a missing newline, a header that is not JSON, or an
/// unknown version.
#[must_use]
pub fn decode(bytes: &[u8]) -> Option<(EntryHeader, &[u8])> {
    let newline = bytes.iter().position(|&b| b == b'\n')?;
    let header: EntryHeader = serde_json::from_slice(&bytes[..newline]).ok()?;
    if header.version != ENTRY_VERSION {
        return None;
    }
    Some((header, &bytes[newline + 1..]))
}

//! Partial and full content hashing.
//!
//! # Overview
//!
//! Exact duplicates are confirmed with a three-step funnel:
//! 1. equal sizes,
//! 2. equal [`PartialHash`] (BLAKE3 over head/tail and optionally a middle window),
//! 3. equal full SHA-256 digest from [`sha256_file`].
//!
//! Partial equality alone is only a candidate filter; it bounds how many
//! files need a full read on large corpora.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::HashError;

/// Name reported for partial digests.
pub const PARTIAL_ALGORITHM: &str = "blake3";

/// Default head/tail window (64 KiB).
pub const DEFAULT_WINDOW: u64 = 64 * 1024;

/// Default read block for full hashing (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Digests of the sampled windows of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialHash {
    /// Digest of the first `head_bytes`
    pub head: String,
    /// Digest of the last `tail_bytes`
    pub tail: String,
    /// Digest of the middle window, when one was requested
    pub mid: Option<String>,
    /// Digest algorithm name
    pub algorithm: String,
}

impl PartialHash {
    /// Single key used to bucket candidates.
    #[must_use]
    pub fn signature(&self) -> String {
        match &self.mid {
            Some(mid) => format!("{}:{}:{}:{}", self.algorithm, self.head, self.tail, mid),
            None => format!("{}:{}:{}", self.algorithm, self.head, self.tail),
        }
    }
}

/// Window sizes used by [`ContentHasher`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HashConfig {
    /// Bytes read from the start of the file
    pub head_bytes: u64,
    /// Bytes read from the end of the file
    pub tail_bytes: u64,
    /// Bytes read around the middle (0 = no middle sample)
    pub mid_bytes: u64,
    /// Chunk size for full hashing
    pub block_size: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            head_bytes: DEFAULT_WINDOW,
            tail_bytes: DEFAULT_WINDOW,
            mid_bytes: 0,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Read at most `len` bytes starting at `offset`.
///
/// Short reads (a file that shrank, or a window past the end) are not
/// errors; whatever is available is returned.
fn read_window(file: &mut File, offset: u64, len: u64) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len.min(DEFAULT_BLOCK_SIZE as u64) as usize);
    file.by_ref().take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

fn digest_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Compute head/tail (and optional middle) digests of a file.
///
/// Reads at most `head_bytes` from the start and `tail_bytes` from the end;
/// the windows may overlap on small files. Never reads past end-of-file and
/// never fails because a file is short.
///
/// # Errors
///
/// Returns `HashError` if the file cannot be opened or read.
pub fn partial_hash(
    path: &Path,
    head_bytes: u64,
    tail_bytes: u64,
    mid_bytes: u64,
) -> Result<PartialHash, HashError> {
    let mut file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
    let len = file
        .metadata()
        .map_err(|e| HashError::from_io(path, e))?
        .len();

    let head = read_window(&mut file, 0, head_bytes.min(len))
        .map_err(|e| HashError::from_io(path, e))?;

    let tail_start = len.saturating_sub(tail_bytes);
    let tail = read_window(&mut file, tail_start, len - tail_start)
        .map_err(|e| HashError::from_io(path, e))?;

    let mid = if mid_bytes > 0 {
        let start = (len / 2).saturating_sub(mid_bytes / 2);
        let take = mid_bytes.min(len - start);
        let window =
            read_window(&mut file, start, take).map_err(|e| HashError::from_io(path, e))?;
        Some(digest_hex(&window))
    } else {
        None
    };

    Ok(PartialHash {
        head: digest_hex(&head),
        tail: digest_hex(&tail),
        mid,
        algorithm: PARTIAL_ALGORITHM.to_string(),
    })
}

/// Stream a file through SHA-256 in chunks of `block_size`.
///
/// The digest depends only on the file content, never on `block_size`.
/// A block size of 0 is treated as 1.
///
/// # Errors
///
/// Returns `HashError` if the file cannot be opened or read.
pub fn sha256_file(path: &Path, block_size: usize) -> Result<String, HashError> {
    sha256_file_interruptible(path, block_size, None)
}

fn sha256_file_interruptible(
    path: &Path,
    block_size: usize,
    shutdown: Option<&AtomicBool>,
) -> Result<String, HashError> {
    let mut file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; block_size.max(1)];

    loop {
        if shutdown.is_some_and(|f| f.load(Ordering::SeqCst)) {
            return Err(HashError::Interrupted(path.to_path_buf()));
        }
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::from_io(path, e)),
        };
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hasher bound to a window configuration and an optional shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    config: HashConfig,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl ContentHasher {
    /// Create a hasher with the given windows.
    #[must_use]
    pub fn new(config: HashConfig) -> Self {
        Self {
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag; full hashing stops between blocks once set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Window configuration in use.
    #[must_use]
    pub fn config(&self) -> &HashConfig {
        &self.config
    }

    /// Partial digests with the configured windows.
    ///
    /// # Errors
    ///
    /// Returns `HashError` if the file cannot be read.
    pub fn partial(&self, path: &Path) -> Result<PartialHash, HashError> {
        partial_hash(
            path,
            self.config.head_bytes,
            self.config.tail_bytes,
            self.config.mid_bytes,
        )
    }

    /// Full SHA-256 digest with the configured block size.
    ///
    /// # Errors
    ///
    /// Returns `HashError` if the file cannot be read or hashing was interrupted.
    pub fn full(&self, path: &Path) -> Result<String, HashError> {
        sha256_file_interruptible(path, self.config.block_size, self.shutdown_flag.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_sha256_known_vector() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "abc.bin", b"abc");
        assert_eq!(
            sha256_file(&path, 4096).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_block_size_invariance() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let path = write(&dir, "data.bin", &content);

        let reference = sha256_file(&path, 1024 * 1024).unwrap();
        for block in [0, 1, 3, 7, 64, 4096, 9_999, 10_000, 10_001] {
            assert_eq!(sha256_file(&path, block).unwrap(), reference, "block {block}");
        }
    }

    #[test]
    fn test_partial_hash_short_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "short.bin", b"tiny");

        let ph = partial_hash(&path, 64, 64, 16).unwrap();
        assert_eq!(ph.head, ph.tail);
        assert_eq!(ph.algorithm, "blake3");
        assert!(ph.mid.is_some());
    }

    #[test]
    fn test_partial_hash_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.bin", b"");

        let ph = partial_hash(&path, 64, 64, 0).unwrap();
        assert_eq!(ph.head, ph.tail);
        assert!(ph.mid.is_none());
    }

    #[test]
    fn test_partial_hash_differs_on_tail() {
        let dir = TempDir::new().unwrap();
        let mut a = vec![0u8; 1000];
        let mut b = a.clone();
        a[999] = 1;
        b[999] = 2;
        let pa = write(&dir, "a.bin", &a);
        let pb = write(&dir, "b.bin", &b);

        let ha = partial_hash(&pa, 100, 100, 0).unwrap();
        let hb = partial_hash(&pb, 100, 100, 0).unwrap();
        assert_eq!(ha.head, hb.head);
        assert_ne!(ha.tail, hb.tail);
        assert_ne!(ha.signature(), hb.signature());
    }

    #[test]
    fn test_partial_hash_missing_file() {
        let result = partial_hash(Path::new("/nonexistent/file.bin"), 10, 10, 0);
        assert!(matches!(result, Err(HashError::NotFound(_))));
    }

    #[test]
    fn test_full_hash_interrupted() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.bin", b"content");
        let flag = Arc::new(AtomicBool::new(true));

        let hasher = ContentHasher::default().with_shutdown_flag(flag);
        assert!(matches!(hasher.full(&path), Err(HashError::Interrupted(_))));
    }
}

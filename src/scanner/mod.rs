//! Scanner module for file discovery, content hashing and media probing.
//!
//! This module provides functionality for:
//! - Stack-based directory walking with pattern and depth filters
//! - Deterministic, seeded sampling of large catalogs
//! - Partial (head/tail/mid) and full SHA-256 content hashing
//! - The [`MediaProbe`] contract consumed from external probing tools
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`catalog`]: Multi-root discovery, pattern normalization and sampling
//! - [`hasher`]: Partial and full content digests
//! - [`probe`]: Media metadata and fingerprint extraction contract
//!
//! # Example
//!
//! ```no_run
//! use mediadupe::scanner::{CatalogConfig, FileCatalog};
//! use std::path::PathBuf;
//!
//! let config = CatalogConfig {
//!     patterns: vec!["mp4".to_string(), "mkv".to_string()],
//!     max_depth: Some(3),
//!     ..Default::default()
//! };
//!
//! let catalog = FileCatalog::new(config);
//! let discovery = catalog.discover(&[PathBuf::from("/media")]).unwrap();
//! for record in &discovery.records {
//!     println!("{}: {} bytes", record.path.display(), record.size);
//! }
//! ```

pub mod catalog;
pub mod hasher;
pub mod probe;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// Re-export main types
pub use catalog::{normalize_patterns, sample_records, Discovery, FileCatalog, Walker};
pub use hasher::{partial_hash, sha256_file, ContentHasher, HashConfig, PartialHash};
pub use probe::{
    audio_fingerprint, visual_fingerprint, AudioParams, Fingerprint, MediaInfo, MediaProbe,
    Modality, NullProbe, ProbeConfig, SidecarProbe,
};

/// Everything the pipeline learns about one discovered file.
///
/// Records are created by the catalog and filled in stage by stage. Once
/// every selected stage has run for a file its record is not modified again.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Position in discovery order (after sampling)
    pub index: usize,
    /// Resolved absolute path to the file
    pub path: PathBuf,
    /// Scan root the file was discovered under
    pub root: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
    /// Head/tail/mid digests, present once quick-hashed
    pub partial_hash: Option<PartialHash>,
    /// Full SHA-256 digest (hex), only computed for exact candidates
    pub full_hash: Option<String>,
    /// Probed container/stream metadata
    pub media: Option<MediaInfo>,
    /// Audio window fingerprint
    pub audio: Option<Fingerprint>,
    /// Visual frame fingerprint
    pub visual: Option<Fingerprint>,
}

impl FileRecord {
    /// Create a record with no computed attributes yet.
    ///
    /// # Arguments
    ///
    /// * `index` - Discovery position
    /// * `path` - Absolute path to the file
    /// * `root` - Scan root the file belongs to
    /// * `size` - File size in bytes
    /// * `modified` - Last modification time
    #[must_use]
    pub fn new(index: usize, path: PathBuf, root: PathBuf, size: u64, modified: SystemTime) -> Self {
        Self {
            index,
            path,
            root,
            size,
            modified,
            partial_hash: None,
            full_hash: None,
            media: None,
            audio: None,
            visual: None,
        }
    }

    /// Probed duration in seconds, if known and positive.
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        self.media
            .as_ref()
            .and_then(|m| m.duration)
            .filter(|d| d.is_finite() && *d > 0.0)
    }

    /// Pixel count (width × height), if both dimensions are known.
    #[must_use]
    pub fn pixels(&self) -> Option<u64> {
        let media = self.media.as_ref()?;
        match (media.width, media.height) {
            (Some(w), Some(h)) => Some(u64::from(w) * u64::from(h)),
            _ => None,
        }
    }

    /// Number of path components, used by the `deeper`/`shallower` criteria.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.components().count()
    }

    /// Fingerprint for the given modality, if one was extracted.
    #[must_use]
    pub fn fingerprint(&self, modality: Modality) -> Option<&Fingerprint> {
        match modality {
            Modality::Audio => self.audio.as_ref(),
            Modality::Visual => self.visual.as_ref(),
        }
    }

    /// Whether the approximate grouping phase has anything to work with.
    #[must_use]
    pub fn is_approximate_candidate(&self) -> bool {
        self.duration().is_some() || self.audio.is_some() || self.visual.is_some()
    }

    /// Path relative to its scan root, falling back to the path without
    /// its root/prefix components.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        relative_to_root(&self.path, std::slice::from_ref(&self.root))
    }
}

/// Strip the longest matching root from `path`.
///
/// When no root contains the path, the prefix and root-directory
/// components are dropped so the result can always be joined under
/// another directory.
#[must_use]
pub fn relative_to_root(path: &Path, roots: &[PathBuf]) -> PathBuf {
    let best = roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count());

    if let Some(root) = best {
        if let Ok(rel) = path.strip_prefix(root) {
            if rel.as_os_str().is_empty() {
                if let Some(name) = path.file_name() {
                    return PathBuf::from(name);
                }
            }
            return rel.to_path_buf();
        }
    }

    path.components()
        .filter(|c| {
            !matches!(
                c,
                std::path::Component::Prefix(_) | std::path::Component::RootDir
            )
        })
        .collect()
}

/// Configuration for file discovery.
///
/// Controls pattern filtering, recursion depth, exclusions and sampling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// File name patterns (`mp4`, `.mp4`, `*.MP4` are equivalent).
    /// Empty means every file matches.
    pub patterns: Vec<String>,

    /// Maximum recursion depth (0 = root directory only, None = unlimited).
    pub max_depth: Option<usize>,

    /// Fraction of discovered files to keep, in (0, 1].
    pub sample_ratio: Option<f64>,

    /// Seed for the sampling generator.
    pub seed: u64,

    /// Paths never returned by discovery (e.g. already-resolved files).
    pub excluded: Vec<PathBuf>,
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A file name pattern could not be compiled.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The normalized pattern
        pattern: String,
        /// Why it was rejected
        message: String,
    },

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Classify an I/O error for the given path.
    #[must_use]
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Hashing was cancelled by a shutdown request.
    #[error("Hashing interrupted: {0}")]
    Interrupted(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    /// Classify an I/O error for the given path.
    #[must_use]
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

//! Multi-root file discovery with pattern, depth and sampling filters.
//!
//! # Overview
//!
//! [`Walker`] is an explicit iterator over a stack of pending directories;
//! it never recurses, yields children in name order and can be restarted.
//! [`FileCatalog`] runs one walker per root, filters by normalized file name
//! patterns, removes paths already seen under another root and optionally
//! draws a deterministic sample.
//!
//! # Example
//!
//! ```no_run
//! use mediadupe::scanner::{Walker, normalize_patterns};
//! use std::path::Path;
//!
//! assert_eq!(normalize_patterns(&["MP4".into(), ".mp4".into()]), vec!["*.mp4"]);
//!
//! let walker = Walker::new(Path::new("/media"), Some(2));
//! for entry in walker {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use glob::{MatchOptions, Pattern};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{CatalogConfig, FileRecord, ScanError};

/// A regular file yielded by [`Walker`].
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path built from the walker root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

/// Stack-based directory iterator.
///
/// Directories are read one at a time; their files are queued and their
/// subdirectories pushed so that iteration order is depth-first by name.
/// Symlinked directories are never descended, which rules out cycles.
#[derive(Debug)]
pub struct Walker {
    root: PathBuf,
    max_depth: Option<usize>,
    pending_dirs: Vec<(PathBuf, usize)>,
    ready: VecDeque<Result<WalkEntry, ScanError>>,
}

impl Walker {
    /// Create a walker rooted at `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory to enumerate
    /// * `max_depth` - 0 = only files directly in `root`, None = unlimited
    #[must_use]
    pub fn new(root: &Path, max_depth: Option<usize>) -> Self {
        Self {
            root: root.to_path_buf(),
            max_depth,
            pending_dirs: vec![(root.to_path_buf(), 0)],
            ready: VecDeque::new(),
        }
    }

    /// Root directory of this walker.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Discard progress and start again from the root.
    pub fn restart(&mut self) {
        self.pending_dirs.clear();
        self.pending_dirs.push((self.root.clone(), 0));
        self.ready.clear();
    }

    fn may_descend(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth < max)
    }

    /// Read one directory, queueing its files and pushing its subdirectories.
    fn expand(&mut self, dir: &Path, depth: usize) {
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                log::warn!("Cannot read directory {}: {}", dir.display(), e);
                self.ready.push_back(Err(ScanError::from_io(dir, e)));
                return;
            }
        };

        let mut children: Vec<fs::DirEntry> = Vec::new();
        for entry in read_dir {
            match entry {
                Ok(entry) => children.push(entry),
                Err(e) => self.ready.push_back(Err(ScanError::from_io(dir, e))),
            }
        }
        children.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for child in children {
            let path = child.path();
            let file_type = match child.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    self.ready.push_back(Err(ScanError::from_io(&path, e)));
                    continue;
                }
            };

            if file_type.is_dir() {
                if self.may_descend(depth) {
                    subdirs.push(path);
                }
                continue;
            }

            // Follows symlinks to files; symlinks to directories are skipped
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    self.ready.push_back(Ok(WalkEntry {
                        path,
                        size: meta.len(),
                        modified,
                    }));
                }
                Ok(_) => {
                    log::trace!("Skipping non-regular entry {}", path.display());
                }
                Err(e) => {
                    log::debug!("Cannot stat {}: {}", path.display(), e);
                    self.ready.push_back(Err(ScanError::from_io(&path, e)));
                }
            }
        }

        // Reverse so the stack pops subdirectories in name order
        for sub in subdirs.into_iter().rev() {
            self.pending_dirs.push((sub, depth + 1));
        }
    }
}

impl Iterator for Walker {
    type Item = Result<WalkEntry, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            let (dir, depth) = self.pending_dirs.pop()?;
            self.expand(&dir, depth);
        }
    }
}

/// Normalize file name patterns to lowercase globs.
///
/// `"mp4"`, `".mp4"`, `"*.mp4"` and `"*.MP4"` all become `"*.mp4"`.
/// Patterns that already contain glob metacharacters are only lowercased.
/// Duplicates are removed, keeping the first occurrence.
#[must_use]
pub fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();

    for raw in patterns {
        let p = raw.trim().to_lowercase();
        if p.is_empty() {
            continue;
        }
        let glob = if p.starts_with('*') || p.contains(['?', '[']) {
            p
        } else if let Some(ext) = p.strip_prefix('.') {
            format!("*.{ext}")
        } else if p.contains('*') {
            p
        } else {
            format!("*.{p}")
        };
        if seen.insert(glob.clone()) {
            normalized.push(glob);
        }
    }

    normalized
}

/// Draw a deterministic sample of `records`.
///
/// Keeps `max(1, round(total × ratio))` records using a dedicated generator
/// seeded with `seed`. Candidates are sorted by path before drawing, so the
/// selection does not depend on enumeration order. The result is in path
/// order and re-indexed from 0.
#[must_use]
pub fn sample_records(mut records: Vec<FileRecord>, ratio: f64, seed: u64) -> Vec<FileRecord> {
    let total = records.len();
    if total == 0 || ratio.is_nan() || ratio >= 1.0 {
        return records;
    }

    let target = ((total as f64 * ratio).round() as usize).clamp(1, total);
    records.sort_by(|a, b| a.path.cmp(&b.path));

    let mut rng = StdRng::seed_from_u64(seed);
    let picked: HashSet<usize> = rand::seq::index::sample(&mut rng, total, target)
        .into_iter()
        .collect();

    records
        .into_iter()
        .enumerate()
        .filter(|(i, _)| picked.contains(i))
        .enumerate()
        .map(|(new_index, (_, mut rec))| {
            rec.index = new_index;
            rec
        })
        .collect()
}

/// Result of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Records in discovery order (sampled if a ratio was configured)
    pub records: Vec<FileRecord>,
    /// Number of matching files found before sampling
    pub total_discovered: usize,
    /// Whether sampling reduced the catalog
    pub sampled: bool,
    /// Non-fatal errors encountered while walking
    pub errors: Vec<ScanError>,
}

/// File discovery across one or more roots.
#[derive(Debug)]
pub struct FileCatalog {
    config: CatalogConfig,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl FileCatalog {
    /// Create a catalog with the given configuration.
    #[must_use]
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn compile_patterns(&self) -> Result<Vec<Pattern>, ScanError> {
        normalize_patterns(&self.config.patterns)
            .into_iter()
            .map(|p| {
                Pattern::new(&p).map_err(|e| ScanError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.msg.to_string(),
                })
            })
            .collect()
    }

    fn resolve_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
        roots
            .iter()
            .map(|root| {
                let resolved = fs::canonicalize(root).map_err(|e| ScanError::from_io(root, e))?;
                if resolved.is_dir() {
                    Ok(resolved)
                } else {
                    Err(ScanError::NotADirectory(resolved))
                }
            })
            .collect()
    }

    /// Check that every root is an existing directory and every pattern
    /// compiles, without walking anything.
    ///
    /// # Errors
    ///
    /// Returns the same `ScanError` that [`FileCatalog::discover`] would
    /// fail with before reading any directory.
    pub fn validate(&self, roots: &[PathBuf]) -> Result<(), ScanError> {
        self.compile_patterns()?;
        Self::resolve_roots(roots)?;
        Ok(())
    }

    /// Enumerate matching files under every root.
    ///
    /// # Errors
    ///
    /// Returns `ScanError` if a root does not exist or is not a directory,
    /// or if a pattern cannot be compiled. Unreadable entries below a root
    /// are collected in [`Discovery::errors`] instead.
    pub fn discover(&self, roots: &[PathBuf]) -> Result<Discovery, ScanError> {
        let patterns = self.compile_patterns()?;
        let resolved_roots = Self::resolve_roots(roots)?;
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let excluded: HashSet<PathBuf> = self
            .config
            .excluded
            .iter()
            .map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
            .collect();

        let mut discovery = Discovery::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for root in resolved_roots {
            log::debug!("Discovering files under {}", root.display());

            for entry in Walker::new(&root, self.config.max_depth) {
                if self.is_shutdown_requested() {
                    log::debug!("Discovery: Shutdown requested, stopping iteration");
                    break;
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        discovery.errors.push(e);
                        continue;
                    }
                };

                if !patterns.is_empty() {
                    let name = entry
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                    if !patterns.iter().any(|p| p.matches_with(&name, options)) {
                        continue;
                    }
                }

                let resolved = fs::canonicalize(&entry.path).unwrap_or(entry.path);
                if excluded.contains(&resolved) || !seen.insert(resolved.clone()) {
                    continue;
                }

                let index = discovery.records.len();
                discovery.records.push(FileRecord::new(
                    index,
                    resolved,
                    root.clone(),
                    entry.size,
                    entry.modified,
                ));
            }
        }

        discovery.total_discovered = discovery.records.len();

        if let Some(ratio) = self.config.sample_ratio {
            if ratio < 1.0 && !discovery.records.is_empty() {
                let records = std::mem::take(&mut discovery.records);
                discovery.records = sample_records(records, ratio, self.config.seed);
                discovery.sampled = true;
                log::info!(
                    "Sampling kept {} of {} files (ratio {:.3}, seed {})",
                    discovery.records.len(),
                    discovery.total_discovered,
                    ratio,
                    self.config.seed
                );
            }
        }

        log::info!(
            "Discovered {} files across {} root(s) ({} errors)",
            discovery.total_discovered,
            roots.len(),
            discovery.errors.len()
        );

        Ok(discovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn names(records: &[FileRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_normalize_patterns_collapses_variants() {
        let input = vec![
            "mp4".to_string(),
            ".mp4".to_string(),
            "*.mp4".to_string(),
            "*.MP4".to_string(),
            "MKV".to_string(),
        ];
        assert_eq!(normalize_patterns(&input), vec!["*.mp4", "*.mkv"]);
    }

    #[test]
    fn test_normalize_patterns_keeps_globs_and_skips_empty() {
        let input = vec![
            "  ".to_string(),
            "clip_*".to_string(),
            "take?.MOV".to_string(),
        ];
        assert_eq!(normalize_patterns(&input), vec!["clip_*", "take?.mov"]);
    }

    #[test]
    fn test_walker_is_sorted_and_respects_depth() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.mp4", b"b");
        touch(dir.path(), "a.mp4", b"a");
        touch(dir.path(), "sub/c.mp4", b"c");
        touch(dir.path(), "sub/deeper/d.mp4", b"d");

        let all: Vec<_> = Walker::new(dir.path(), None)
            .filter_map(Result::ok)
            .map(|e| e.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(all, vec!["a.mp4", "b.mp4", "c.mp4", "d.mp4"]);

        let shallow: Vec<_> = Walker::new(dir.path(), Some(0)).filter_map(Result::ok).collect();
        assert_eq!(shallow.len(), 2);

        let one: Vec<_> = Walker::new(dir.path(), Some(1)).filter_map(Result::ok).collect();
        assert_eq!(one.len(), 3);
    }

    #[test]
    fn test_walker_restart() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.mp4", b"a");
        touch(dir.path(), "b.mp4", b"b");

        let mut walker = Walker::new(dir.path(), None);
        assert!(walker.next().is_some());
        walker.restart();
        assert_eq!(walker.count(), 2);
    }

    #[test]
    fn test_discover_filters_by_pattern_case_insensitively() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.MP4", b"a");
        touch(dir.path(), "b.mkv", b"b");
        touch(dir.path(), "notes.txt", b"c");

        let catalog = FileCatalog::new(CatalogConfig {
            patterns: vec!["mp4".into(), "*.MKV".into()],
            ..Default::default()
        });
        let discovery = catalog.discover(&[dir.path().to_path_buf()]).unwrap();

        assert_eq!(names(&discovery.records), vec!["a.MP4", "b.mkv"]);
        assert_eq!(discovery.total_discovered, 2);
        assert!(!discovery.sampled);
    }

    #[test]
    fn test_discover_deduplicates_overlapping_roots() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.mp4", b"a");
        touch(dir.path(), "sub/b.mp4", b"b");

        let catalog = FileCatalog::new(CatalogConfig::default());
        let roots = vec![dir.path().to_path_buf(), dir.path().join("sub")];
        let discovery = catalog.discover(&roots).unwrap();

        assert_eq!(discovery.records.len(), 2);
        let indices: Vec<usize> = discovery.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_discover_missing_root_is_error() {
        let catalog = FileCatalog::new(CatalogConfig::default());
        let result = catalog.discover(&[PathBuf::from("/definitely/not/here")]);
        assert!(matches!(result, Err(ScanError::NotFound(_))));
    }

    #[test]
    fn test_validate_checks_roots_and_patterns() {
        let dir = TempDir::new().unwrap();
        let file = touch(dir.path(), "a.mp4", b"a");
        let catalog = FileCatalog::new(CatalogConfig::default());

        assert!(catalog.validate(&[dir.path().to_path_buf()]).is_ok());
        assert!(matches!(
            catalog.validate(&[dir.path().join("typo")]),
            Err(ScanError::NotFound(_))
        ));
        assert!(matches!(
            catalog.validate(&[file]),
            Err(ScanError::NotADirectory(_))
        ));

        let bad = FileCatalog::new(CatalogConfig {
            patterns: vec!["[mp4".to_string()],
            ..Default::default()
        });
        assert!(matches!(
            bad.validate(&[dir.path().to_path_buf()]),
            Err(ScanError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_discover_skips_excluded() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "a.mp4", b"a");
        touch(dir.path(), "b.mp4", b"b");

        let catalog = FileCatalog::new(CatalogConfig {
            excluded: vec![a],
            ..Default::default()
        });
        let discovery = catalog.discover(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(names(&discovery.records), vec!["b.mp4"]);
    }

    #[test]
    fn test_sample_records_is_order_independent() {
        let make = |order: &[usize]| -> Vec<FileRecord> {
            order
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    FileRecord::new(
                        i,
                        PathBuf::from(format!("/m/{n:02}.mp4")),
                        PathBuf::from("/m"),
                        1,
                        SystemTime::UNIX_EPOCH,
                    )
                })
                .collect()
        };

        let forward = make(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let backward = make(&[9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);

        let a = sample_records(forward, 0.4, 7);
        let b = sample_records(backward, 0.4, 7);

        assert_eq!(a.len(), 4);
        let pa: Vec<_> = a.iter().map(|r| r.path.clone()).collect();
        let pb: Vec<_> = b.iter().map(|r| r.path.clone()).collect();
        assert_eq!(pa, pb);
        assert_eq!(a.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sample_records_keeps_at_least_one() {
        let records = vec![FileRecord::new(
            0,
            PathBuf::from("/m/a.mp4"),
            PathBuf::from("/m"),
            1,
            SystemTime::UNIX_EPOCH,
        )];
        assert_eq!(sample_records(records, 0.01, 1).len(), 1);
    }
}

use super::support::{content, write};
use mediadupe::scanner::{CatalogConfig, FileCatalog, ScanError};
use std::path::PathBuf;
use tempfile::tempdir;

fn names(records: &[mediadupe::scanner::FileRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.relative_path().to_string_lossy().replace('\\', "/"))
        .collect()
}

#[test]
fn test_patterns_are_case_insensitive_and_normalized() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("a.MP4"), &content(1, 8));
    write(&dir.path().join("b.mkv"), &content(2, 8));
    write(&dir.path().join("c.txt"), &content(3, 8));

    for pattern in ["mp4", ".mp4", "*.mp4", "*.MP4"] {
        let catalog = FileCatalog::new(CatalogConfig {
            patterns: vec![pattern.to_string(), "mkv".to_string()],
            ..Default::default()
        });
        let found = catalog.discover(&[dir.path().to_path_buf()]).unwrap();
        let mut found = names(&found.records);
        found.sort();
        assert_eq!(found, vec!["a.MP4", "b.mkv"], "pattern {pattern}");
    }
}

#[test]
fn test_max_depth_zero_is_root_only() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("top.mp4"), &content(1, 8));
    write(&dir.path().join("nested/deep.mp4"), &content(2, 8));

    let catalog = FileCatalog::new(CatalogConfig {
        max_depth: Some(0),
        ..Default::default()
    });
    let found = catalog.discover(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(names(&found.records), vec!["top.mp4"]);
}

#[test]
fn test_indices_follow_discovery_order() {
    let dir = tempdir().unwrap();
    for name in ["c.mp4", "a.mp4", "b/x.mp4"] {
        write(&dir.path().join(name), &content(1, 8));
    }

    let found = FileCatalog::new(CatalogConfig::default())
        .discover(&[dir.path().to_path_buf()])
        .unwrap();
    let indices: Vec<_> = found.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(found.total_discovered, 3);
    assert!(!found.sampled);
}

#[test]
fn test_missing_root_is_an_error() {
    let dir = tempdir().unwrap();
    let err = FileCatalog::new(CatalogConfig::default())
        .discover(&[dir.path().join("missing")])
        .unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
}

#[test]
fn test_file_as_root_is_rejected() {
    let dir = tempdir().unwrap();
    let file = write(&dir.path().join("a.mp4"), &content(1, 8));
    let err = FileCatalog::new(CatalogConfig::default())
        .discover(&[PathBuf::from(&file)])
        .unwrap_err();
    assert!(matches!(err, ScanError::NotADirectory(_)));
}

#[test]
fn test_sample_keeps_at_least_one() {
    let dir = tempdir().unwrap();
    for i in 0..3u8 {
        write(&dir.path().join(format!("{i}.mp4")), &content(i, 8));
    }

    let found = FileCatalog::new(CatalogConfig {
        sample_ratio: Some(0.01),
        seed: 3,
        ..Default::default()
    })
    .discover(&[dir.path().to_path_buf()])
    .unwrap();
    assert_eq!(found.records.len(), 1);
    assert_eq!(found.records[0].index, 0);
    assert_eq!(found.total_discovered, 3);
    assert!(found.sampled);
}

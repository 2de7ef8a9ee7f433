use super::support::{canonical, media_config, media_library};
use mediadupe::pipeline::Pipeline;
use mediadupe::report::{ApplyConfig, ApplyEngine};
use mediadupe::scanner::SidecarProbe;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_scan_then_archive_losers() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let roots = vec![library.clone(), archive.clone()];

    let outcome = Pipeline::new(media_config(&dir.path().join("out")))
        .with_probe(Arc::new(SidecarProbe))
        .run(&roots)
        .unwrap();
    let report = outcome.report.unwrap();
    let keepers: Vec<_> = report.groups.values().map(|g| g.keep.clone()).collect();
    let losers: Vec<_> = report
        .groups
        .values()
        .flat_map(|g| g.losers.iter().cloned())
        .collect();

    let backup = dir.path().join("backup");
    let engine = ApplyEngine::new(ApplyConfig {
        dry_run: false,
        backup_root: Some(backup.clone()),
        scan_roots: roots,
    });
    let applied = engine.apply(&report);

    assert_eq!(applied.processed, 2);
    assert_eq!(applied.bytes_freed, 2_048 + 600);
    assert!(!applied.is_partial());
    assert!(keepers.iter().all(|k| k.exists()));
    assert!(losers.iter().all(|l| !l.exists()));

    // clip.mp4 sits directly under the archive root
    assert!(backup.join("clip.mp4").exists());
    let archived: Vec<_> = walk(&backup);
    assert_eq!(archived.len(), 2);

    // A second pass finds nothing left to do
    let again = engine.apply(&report);
    assert_eq!(again.processed, 0);
    assert_eq!(again.skipped_missing, 2);
    assert!(!again.is_partial());

    // The keeper of the clip group is untouched
    assert!(canonical(&library.join("movie.mp4")).exists());
}

#[test]
fn test_dry_run_changes_nothing() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());

    let report = Pipeline::new(media_config(&dir.path().join("out")))
        .with_probe(Arc::new(SidecarProbe))
        .run(&[library, archive.clone()])
        .unwrap()
        .report
        .unwrap();

    let applied = ApplyEngine::new(ApplyConfig {
        dry_run: true,
        ..Default::default()
    })
    .apply(&report);

    assert!(applied.dry_run);
    assert_eq!(applied.processed, 2);
    assert!(applied.summary().starts_with("Would free"));
    assert!(archive.join("clip.mp4").exists());
    assert!(archive.join("old/intro-copy.mp4").exists());
}

#[test]
fn test_keeper_removed_after_scan_protects_loser() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());

    let report = Pipeline::new(media_config(&dir.path().join("out")))
        .with_probe(Arc::new(SidecarProbe))
        .run(&[library.clone(), archive.clone()])
        .unwrap()
        .report
        .unwrap();

    fs::remove_file(library.join("movie.mp4")).unwrap();
    let applied = ApplyEngine::new(ApplyConfig::default()).apply(&report);

    // The clip survives because its keeper is gone; the exact pair is resolved
    assert!(archive.join("clip.mp4").exists());
    assert_eq!(applied.failure_count(), 1);
    assert_eq!(applied.processed, 1);
    assert!(applied.is_partial());
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}

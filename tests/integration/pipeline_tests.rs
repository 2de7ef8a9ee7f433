use super::support::{canonical, content, media_config, media_library, write};
use mediadupe::duplicates::Method;
use mediadupe::pipeline::{Pipeline, Stage, LOCK_FILE_NAME, REPORT_FILE_NAME};
use mediadupe::progress::RecordingReporter;
use mediadupe::report::ReportDocument;
use mediadupe::scanner::SidecarProbe;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_exact_and_clip_groups_across_roots() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let output = dir.path().join("out");

    let reporter = Arc::new(RecordingReporter::new());
    let outcome = Pipeline::new(media_config(&output))
        .with_probe(Arc::new(SidecarProbe))
        .with_reporter(reporter.clone())
        .run(&[library.clone(), archive.clone()])
        .unwrap();

    assert_eq!(outcome.records.len(), 5);
    assert_eq!(outcome.groups.len(), 2);
    assert_eq!(reporter.total_files(), Some(5));

    let hash_group = outcome
        .groups
        .iter()
        .find(|g| g.method == Method::Hash)
        .expect("exact group");
    let mut members = vec![hash_group.keep.clone()];
    members.extend(hash_group.losers.iter().cloned());
    members.sort();
    let mut expected = vec![
        canonical(&library.join("intro.mp4")),
        canonical(&archive.join("old/intro-copy.mp4")),
    ];
    expected.sort();
    assert_eq!(members, expected);

    let clip_group = outcome
        .groups
        .iter()
        .find(|g| g.method == Method::AudioSubset)
        .expect("clip group");
    assert_eq!(clip_group.keep, canonical(&library.join("movie.mp4")));
    assert_eq!(clip_group.losers, vec![canonical(&archive.join("clip.mp4"))]);
    assert_eq!(clip_group.loser_bytes, 600);

    // Report on disk matches the outcome, lock is gone
    let report_path = output.join(REPORT_FILE_NAME);
    assert_eq!(outcome.report_path.as_deref(), Some(report_path.as_path()));
    let report = ReportDocument::load(&report_path).unwrap();
    assert_eq!(report.summary.groups, 2);
    assert_eq!(report.summary.losers, 2);
    assert_eq!(report.summary.size_bytes, 2_048 + 600);
    assert_eq!(report.summary.by_method.get(&Method::Hash), Some(&1));
    assert_eq!(report.summary.by_method.get(&Method::AudioSubset), Some(&1));
    assert!(report.created_at.is_some());
    assert!(!output.join(LOCK_FILE_NAME).exists());
}

#[test]
fn test_hash_only_run_skips_approximate_groups() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());

    // Without a probe only the byte-identical pair is found
    let outcome = Pipeline::new(media_config(&dir.path().join("out")))
        .run(&[library, archive])
        .unwrap();

    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.groups[0].method, Method::Hash);
    assert!(outcome.records.iter().all(|r| r.media.is_none()));
}

#[test]
fn test_matching_windows_with_different_middle_are_not_exact() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    // Same size, same head and tail windows, one byte apart in the middle
    let original = content(7, 1024 * 1024);
    let mut altered = original.clone();
    altered[500_000] ^= 0xFF;
    write(&root.join("a.mp4"), &original);
    write(&root.join("b.mp4"), &altered);

    let outcome = Pipeline::new(media_config(&dir.path().join("out")))
        .run(&[root])
        .unwrap();

    assert_eq!(outcome.records.len(), 2);
    let (a, b) = (&outcome.records[0], &outcome.records[1]);
    assert!(a.partial_hash.is_some());
    assert_eq!(a.partial_hash, b.partial_hash);
    assert!(a.full_hash.is_some());
    assert_ne!(a.full_hash, b.full_hash);
    assert!(outcome.groups.is_empty());
    assert_eq!(outcome.report.unwrap().summary.groups, 0);
}

#[test]
fn test_stage_subset_stops_before_grouping() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let output = dir.path().join("out");

    let mut config = media_config(&output);
    config.pipeline.stages = vec![Stage::Discover, Stage::QuickHash];
    let reporter = Arc::new(RecordingReporter::new());
    let outcome = Pipeline::new(config)
        .with_probe(Arc::new(SidecarProbe))
        .with_reporter(reporter.clone())
        .run(&[library, archive])
        .unwrap();

    assert!(outcome.groups.is_empty());
    assert!(outcome.report.is_none());
    assert!(!output.join(REPORT_FILE_NAME).exists());
    assert_eq!(reporter.stages_ended(), vec![Stage::Discover, Stage::QuickHash]);

    // The identical pair was fully hashed; nothing was probed
    let full: Vec<_> = outcome
        .records
        .iter()
        .filter(|r| r.full_hash.is_some())
        .collect();
    assert_eq!(full.len(), 2);
    assert_eq!(full[0].full_hash, full[1].full_hash);
    assert!(outcome.records.iter().all(|r| r.audio.is_none()));
}

#[test]
fn test_previous_report_excludes_resolved_files() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let roots = vec![library, archive];

    let first = Pipeline::new(media_config(&dir.path().join("first")))
        .with_probe(Arc::new(SidecarProbe))
        .run(&roots)
        .unwrap();
    let report = first.report.unwrap();

    let mut config = media_config(&dir.path().join("second"));
    config.catalog.excluded = report.exclusions();
    let second = Pipeline::new(config)
        .with_probe(Arc::new(SidecarProbe))
        .run(&roots)
        .unwrap();

    // Only other.mp4 is left
    assert_eq!(second.records.len(), 1);
    assert!(second.groups.is_empty());
    assert!(second.report.unwrap().is_empty());
}

#[test]
fn test_sampling_is_reproducible() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("media");
    for i in 0..20u8 {
        write(&root.join(format!("f{i:02}.mp4")), &content(i, 100 + usize::from(i)));
    }

    let run = |seed: u64| {
        let mut config = media_config(&dir.path().join(format!("out-{seed}")));
        config.catalog.sample_ratio = Some(0.25);
        config.catalog.seed = seed;
        let outcome = Pipeline::new(config).run(&[root.clone()]).unwrap();
        assert_eq!(outcome.total_discovered, 20);
        outcome
            .records
            .into_iter()
            .map(|r| r.path)
            .collect::<Vec<_>>()
    };

    let first = run(7);
    assert_eq!(first.len(), 5);
    assert_eq!(first, run(7));
}

#[test]
fn test_overlapping_roots_do_not_duplicate_records() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("media");
    write(&root.join("a.mp4"), &content(1, 64));
    write(&root.join("sub/b.mp4"), &content(2, 64));

    let outcome = Pipeline::new(media_config(&dir.path().join("out")))
        .run(&[root.clone(), root.join("sub")])
        .unwrap();

    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.groups.is_empty());
}

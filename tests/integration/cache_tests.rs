use super::support::{content, media_config, media_library, write};
use filetime::FileTime;
use mediadupe::cache::{CacheKey, HashCache};
use mediadupe::pipeline::Pipeline;
use mediadupe::progress::RecordingReporter;
use mediadupe::scanner::SidecarProbe;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

#[test]
fn test_cache_persists_across_opens() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("cache");
    let key = CacheKey::for_file("sha256", &dir.path().join("a.mp4"), 10, SystemTime::UNIX_EPOCH);

    {
        let cache = HashCache::open(&root, None).unwrap();
        cache.put(&key, b"digest").unwrap();
    }

    let reopened = HashCache::open(&root, None).unwrap();
    assert_eq!(reopened.get(&key).as_deref(), Some(&b"digest"[..]));
    assert_eq!(reopened.stats().hits, 1);
}

#[test]
fn test_corrupt_entry_is_a_miss() {
    let dir = tempdir().unwrap();
    let cache = HashCache::open(dir.path(), None).unwrap();
    let key = CacheKey::raw("probe-sidecar", "clip");
    cache.put(&key, b"{}").unwrap();

    fs::write(key.entry_path(cache.root()), b"garbage").unwrap();
    assert!(cache.get(&key).is_none());
    assert_eq!(cache.purge_expired().unwrap(), 1);
}

#[test]
fn test_zero_ttl_expires_everything() {
    let dir = tempdir().unwrap();
    let cache = HashCache::open(dir.path(), Some(Duration::ZERO)).unwrap();
    let key = CacheKey::raw("sha256", "x");
    cache.put(&key, b"value").unwrap();
    assert!(cache.get(&key).is_none());
}

#[test]
fn test_rerun_hits_cache_and_matches_first_run() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let roots = vec![library, archive];
    let cache_root = dir.path().join("cache");

    let run = || {
        let reporter = Arc::new(RecordingReporter::new());
        let outcome = Pipeline::new(media_config(&dir.path().join("out")))
            .with_probe(Arc::new(SidecarProbe))
            .with_reporter(reporter.clone())
            .with_cache(HashCache::open(&cache_root, None).unwrap())
            .run(&roots)
            .unwrap();
        (outcome, reporter)
    };

    let (first, first_reporter) = run();
    assert_eq!(first_reporter.counter("cache_hits"), 0);

    let (second, second_reporter) = run();
    // Partial and full digests of the exact pair, plus every probe result
    assert!(second_reporter.counter("cache_hits") >= 4);
    assert_eq!(second_reporter.counter("cache_misses"), 0);
    assert_eq!(first.report.unwrap().groups, second.report.unwrap().groups);
}

#[test]
fn test_modified_file_invalidates_entry() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("media");
    let a = write(&root.join("a.mp4"), &content(1, 256));
    write(&root.join("b.mp4"), &content(1, 256));
    let cache_root = dir.path().join("cache");

    let run = || {
        Pipeline::new(media_config(&dir.path().join("out")))
            .with_cache(HashCache::open(&cache_root, None).unwrap())
            .run(&[root.clone()])
            .unwrap()
    };
    assert_eq!(run().groups.len(), 1);

    // Same size, different bytes, new mtime: stale digests must not be reused
    let mut changed = content(1, 256);
    changed[128] ^= 0xFF;
    fs::write(&a, &changed).unwrap();
    filetime::set_file_mtime(&a, FileTime::from_unix_time(1_000_000, 0)).unwrap();

    assert!(run().groups.is_empty());
}

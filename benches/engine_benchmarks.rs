use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mediadupe::config::EngineConfig;
use mediadupe::duplicates::{AlignmentConfig, AlignmentMatcher};
use mediadupe::pipeline::Pipeline;
use mediadupe::scanner::{partial_hash, sha256_file, Fingerprint, Modality};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn series(len: u64) -> Vec<u64> {
    (0..len)
        .map(|i| {
            let mut z = i.wrapping_add(0x9E37_79B9_7F4A_7C15);
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            (z ^ (z >> 31)) & 0xFFFF_FFFF
        })
        .collect()
}

// Helper to create a library with some byte-identical files
fn setup_library(root: &Path, files: usize) {
    fs::create_dir_all(root).expect("Failed to create dir");
    for i in 0..files {
        // every fifth file repeats the previous content
        let seed = if i % 5 == 0 && i > 0 { i - 1 } else { i };
        let content: Vec<u8> = (0..64 * 1024).map(|j| ((j * 7 + seed) % 251) as u8).collect();
        fs::write(root.join(format!("clip_{i:03}.mp4")), content).expect("Failed to write file");
    }
}

// 1. Hashing Benchmarks
fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");

    for size_kb in [1, 1024, 10240] {
        let data = vec![b'a'; size_kb * 1024];
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("bench_file.dat");
        fs::write(&file_path, &data).expect("Failed to write bench file");

        group.bench_with_input(format!("sha256_{}KB", size_kb), &file_path, |b, path| {
            b.iter(|| black_box(sha256_file(path, 1024 * 1024).unwrap()));
        });
        group.bench_with_input(format!("partial_{}KB", size_kb), &file_path, |b, path| {
            b.iter(|| black_box(partial_hash(path, 65_536, 65_536, 0).unwrap()));
        });
    }
    group.finish();
}

// 2. Alignment Benchmarks
fn bench_alignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("alignment");
    let matcher = AlignmentMatcher::new(AlignmentConfig::default());

    for (long, short) in [(300u64, 60usize), (900, 120)] {
        let full = series(long);
        let start = full.len() / 3;
        let superset = Fingerprint::new(Modality::Audio, 32, full.clone());
        let subset = Fingerprint::new(Modality::Audio, 32, full[start..start + short].to_vec());

        group.bench_function(format!("subset_{short}_in_{long}"), |b| {
            b.iter(|| black_box(matcher.align(&subset, &superset)));
        });
    }
    group.finish();
}

// 3. Full Pipeline Benchmark
fn bench_pipeline(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let library = temp_dir.path().join("library");
    setup_library(&library, 50);

    let mut config = EngineConfig::default();
    config.cache.enabled = false;
    config.pipeline.output_root = temp_dir.path().join("out");
    let pipeline = Pipeline::new(config);

    c.bench_function("pipeline_hash_only_50_files", |b| {
        b.iter(|| black_box(pipeline.run(&[library.clone()]).unwrap()));
    });
}

criterion_group!(benches, bench_hashing, bench_alignment, bench_pipeline);
criterion_main!(benches);

//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use mediadupe::config::EngineConfig;
use mediadupe::scanner::SidecarProbe;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Write `bytes` to `path`, creating parent directories.
pub fn write(path: &Path, bytes: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
    path.to_path_buf()
}

/// `len` bytes that differ for each `seed`.
pub fn content(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Well-mixed 32-bit digests, one per window.
pub fn series(range: std::ops::Range<u64>) -> Vec<u64> {
    range
        .map(|i| {
            let mut z = i.wrapping_add(0x9E37_79B9_7F4A_7C15);
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            (z ^ (z >> 31)) & 0xFFFF_FFFF
        })
        .collect()
}

/// Write the probe sidecar of `media` with a duration and audio windows.
pub fn sidecar(media: &Path, duration: f64, audio: &[u64]) {
    let doc = json!({
        "format": {"duration": duration.to_string(), "format_name": "mov,mp4", "bit_rate": "800000"},
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "fingerprints": {"audio": {"bits": 32, "values": audio}}
    });
    fs::write(SidecarProbe::sidecar_path(media), doc.to_string()).unwrap();
}

/// Defaults with only `.mp4` files considered and output under `output`.
pub fn media_config(output: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.catalog.patterns = vec!["mp4".to_string()];
    config.pipeline.output_root = output.to_path_buf();
    config.pipeline.workers = Some(2);
    config.cache.enabled = false;
    config
}

/// Canonical form of a fixture path, as it appears in reports.
pub fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap()
}

/// A library with one exact pair and one full-length/clip pair.
///
/// Returns the two scan roots.
pub fn media_library(base: &Path) -> (PathBuf, PathBuf) {
    let a = base.join("library");
    let b = base.join("archive");

    let intro = content(1, 2_048);
    write(&a.join("intro.mp4"), &intro);
    write(&b.join("old/intro-copy.mp4"), &intro);

    let movie = write(&a.join("movie.mp4"), &content(2, 3_000));
    let clip = write(&b.join("clip.mp4"), &content(3, 600));
    let other = write(&a.join("other.mp4"), &content(4, 1_200));

    let full = series(0..300);
    sidecar(&movie, 300.0, &full);
    sidecar(&clip, 60.0, &full[100..160]);
    sidecar(&other, 200.0, &series(1_000..1_200));

    (a, b)
}

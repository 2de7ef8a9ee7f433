//! Media metadata and fingerprint extraction contract.
//!
//! # Overview
//!
//! Probing tools (ffprobe, fingerprinting helpers) live outside this crate.
//! The engine only consumes their structured output through the
//! [`MediaProbe`] trait and treats every failure as "unknown": a file with
//! no metadata or fingerprints can still be grouped by content hash.
//!
//! Two implementations ship with the crate:
//! - [`NullProbe`] knows nothing, for hash-only runs
//! - [`SidecarProbe`] reads ffprobe-style JSON from `<file>.probe.json`

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Container and stream metadata. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Width of the first video stream in pixels
    pub width: Option<u32>,
    /// Height of the first video stream in pixels
    pub height: Option<u32>,
    /// Container format name
    pub container: Option<String>,
    /// Codec of the first video stream
    pub video_codec: Option<String>,
    /// Codec of the first audio stream
    pub audio_codec: Option<String>,
    /// Overall bitrate in bits per second
    pub overall_bitrate: Option<u64>,
    /// Video stream bitrate in bits per second
    pub video_bitrate: Option<u64>,
}

impl MediaInfo {
    /// Whether the probe returned nothing useful.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `WIDTHxHEIGHT`, when both are known.
    #[must_use]
    pub fn resolution(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

/// Which timeline a fingerprint samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Fixed-length audio windows
    Audio,
    /// Evenly spaced video frames
    Visual,
}

impl Modality {
    /// Lowercase name used in evidence tags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Visual => "visual",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered sequence of fixed-width per-window digests.
///
/// Position in `values` is timeline position. Only the low `bits` bits of
/// each value are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Timeline the digests were taken from
    pub modality: Modality,
    /// Width of each digest in bits (1..=64)
    pub bits: u32,
    /// Digests in timeline order
    pub values: Vec<u64>,
}

impl Fingerprint {
    /// Create a fingerprint, clamping `bits` into 1..=64.
    #[must_use]
    pub fn new(modality: Modality, bits: u32, values: Vec<u64>) -> Self {
        Self {
            modality,
            bits: bits.clamp(1, 64),
            values,
        }
    }

    /// Number of windows/frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the fingerprint holds no digests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Audio fingerprint extraction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParams {
    /// PCM sample rate requested from the decoder
    pub sample_rate: u32,
    /// Length of one fingerprint window in seconds
    pub window_seconds: f64,
    /// Upper bound on extracted windows
    pub max_windows: usize,
    /// Minimum fraction of the expected windows that must be present
    pub min_fraction: f64,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 11_025,
            window_seconds: 1.0,
            max_windows: 900,
            min_fraction: 0.125,
        }
    }
}

/// Probe stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Extract audio fingerprints
    pub audio: bool,
    /// Extract visual fingerprints
    pub visual: bool,
    /// Audio extraction parameters
    pub audio_params: AudioParams,
    /// Number of frames sampled for visual fingerprints
    pub frame_count: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            audio: true,
            visual: true,
            audio_params: AudioParams::default(),
            frame_count: 64,
        }
    }
}

/// Source of media metadata and fingerprints.
///
/// Implementations must not panic on unreadable or unsupported files;
/// they return `None` (or an empty [`MediaInfo`]) instead.
pub trait MediaProbe: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str {
        "probe"
    }

    /// Container and stream metadata. Partial results are fine.
    fn probe(&self, path: &Path) -> Option<MediaInfo>;

    /// Raw audio window digests, at most `max_windows` of them.
    fn audio_windows(
        &self,
        _path: &Path,
        _sample_rate: u32,
        _window_seconds: f64,
        _max_windows: usize,
    ) -> Option<Fingerprint> {
        None
    }

    /// Perceptual digests of `frame_count` evenly spaced frames.
    fn visual_frames(&self, _path: &Path, _frame_count: usize) -> Option<Fingerprint> {
        None
    }
}

/// Extract and validate an audio fingerprint.
///
/// The expected window count is `min(max_windows, floor(duration /
/// window_seconds))`. A fingerprint with fewer than `min_fraction` of the
/// expected windows is rejected, which screens out silent or truncated
/// streams. Without a known duration any non-empty fingerprint is accepted.
///
/// # Returns
///
/// The fingerprint (truncated to `max_windows`), or `None` when extraction
/// failed or the fingerprint was rejected.
pub fn audio_fingerprint(
    probe: &dyn MediaProbe,
    path: &Path,
    info: Option<&MediaInfo>,
    params: &AudioParams,
) -> Option<Fingerprint> {
    let mut fp = probe.audio_windows(
        path,
        params.sample_rate,
        params.window_seconds,
        params.max_windows,
    )?;
    if fp.modality != Modality::Audio {
        log::debug!("Ignoring non-audio fingerprint for {}", path.display());
        return None;
    }
    fp.values.truncate(params.max_windows);
    if fp.is_empty() {
        return None;
    }

    let duration = info
        .and_then(|i| i.duration)
        .filter(|d| d.is_finite() && *d > 0.0);
    if let Some(duration) = duration {
        if params.window_seconds > 0.0 {
            let expected = ((duration / params.window_seconds).floor() as usize).min(params.max_windows);
            let required = (expected as f64 * params.min_fraction).ceil() as usize;
            if fp.len() < required {
                log::debug!(
                    "Rejecting audio fingerprint for {}: {} of {} expected windows",
                    path.display(),
                    fp.len(),
                    expected
                );
                return None;
            }
        }
    }

    Some(fp)
}

/// Extract a visual fingerprint of at most `frame_count` frames.
///
/// # Returns
///
/// `None` when extraction failed or produced no frames.
pub fn visual_fingerprint(
    probe: &dyn MediaProbe,
    path: &Path,
    frame_count: usize,
) -> Option<Fingerprint> {
    let mut fp = probe.visual_frames(path, frame_count)?;
    if fp.modality != Modality::Visual {
        return None;
    }
    fp.values.truncate(frame_count);
    (!fp.is_empty()).then_some(fp)
}

/// Probe that knows nothing. Used for hash-only runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProbe;

impl MediaProbe for NullProbe {
    fn name(&self) -> &str {
        "null"
    }

    fn probe(&self, _path: &Path) -> Option<MediaInfo> {
        None
    }
}

/// Reads prober output stored next to each media file.
///
/// For `clip.mp4` the sidecar is `clip.mp4.probe.json`, holding ffprobe's
/// `-show_format -show_streams` JSON plus an optional `fingerprints`
/// object:
///
/// ```json
/// {
///   "format": {"duration": "12.5", "format_name": "mov,mp4", "bit_rate": "800000"},
///   "streams": [{"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720}],
///   "fingerprints": {"audio": {"bits": 32, "values": [1, 2, 3]}}
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarProbe;

#[derive(Deserialize)]
struct SidecarFingerprint {
    bits: u32,
    values: Vec<u64>,
}

impl SidecarProbe {
    /// Sidecar path for a media file.
    #[must_use]
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".probe.json");
        PathBuf::from(name)
    }

    fn load(path: &Path) -> Option<Value> {
        let sidecar = Self::sidecar_path(path);
        let text = fs::read_to_string(&sidecar).ok()?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!("Unreadable probe sidecar {}: {}", sidecar.display(), e);
                None
            }
        }
    }

    fn first_stream<'a>(parsed: &'a Value, codec_type: &str) -> Option<&'a Value> {
        parsed["streams"]
            .as_array()?
            .iter()
            .find(|s| s["codec_type"].as_str() == Some(codec_type))
    }

    fn fingerprint(path: &Path, modality: Modality) -> Option<Fingerprint> {
        let parsed = Self::load(path)?;
        let raw = parsed.get("fingerprints")?.get(modality.as_str())?.clone();
        let fp: SidecarFingerprint = serde_json::from_value(raw).ok()?;
        Some(Fingerprint::new(modality, fp.bits, fp.values))
    }
}

/// ffprobe reports most numbers as strings; accept both.
fn number_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

impl MediaProbe for SidecarProbe {
    fn name(&self) -> &str {
        "sidecar"
    }

    fn probe(&self, path: &Path) -> Option<MediaInfo> {
        let parsed = Self::load(path)?;
        let format = &parsed["format"];
        let video = Self::first_stream(&parsed, "video");
        let audio = Self::first_stream(&parsed, "audio");

        let info = MediaInfo {
            duration: number_f64(&format["duration"]).filter(|d| d.is_finite() && *d > 0.0),
            width: video
                .and_then(|v| number_u64(&v["width"]))
                .and_then(|w| u32::try_from(w).ok()),
            height: video
                .and_then(|v| number_u64(&v["height"]))
                .and_then(|h| u32::try_from(h).ok()),
            container: string(&format["format_name"]),
            video_codec: video.and_then(|v| string(&v["codec_name"])),
            audio_codec: audio.and_then(|a| string(&a["codec_name"])),
            overall_bitrate: number_u64(&format["bit_rate"]),
            video_bitrate: video.and_then(|v| number_u64(&v["bit_rate"])),
        };
        Some(info)
    }

    fn audio_windows(
        &self,
        path: &Path,
        _sample_rate: u32,
        _window_seconds: f64,
        max_windows: usize,
    ) -> Option<Fingerprint> {
        let mut fp = Self::fingerprint(path, Modality::Audio)?;
        fp.values.truncate(max_windows);
        Some(fp)
    }

    fn visual_frames(&self, path: &Path, frame_count: usize) -> Option<Fingerprint> {
        let mut fp = Self::fingerprint(path, Modality::Visual)?;
        fp.values.truncate(frame_count);
        Some(fp)
    }
}

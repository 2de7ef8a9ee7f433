//! Confidence scoring for approximate duplicate candidates.
//!
//! # Overview
//!
//! Two pure entry points turn raw comparisons into a [`ScoreResult`]:
//!
//! - [`score_subset_candidate`] converts a fingerprint alignment into a
//!   confidence, penalizing implausibly short matches and short clips.
//! - [`score_metadata_candidate`] compares duration, size and bitrate
//!   gaps against a relative tolerance, with small categorical bonuses.
//!
//! Neither function does I/O or fails. Degenerate input yields the
//! lowest-confidence result with a named penalty.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::alignment::AlignmentResult;
use crate::scanner::{FileRecord, MediaInfo, Modality};

/// Approximate detector that produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Detector {
    /// Audio fingerprint subset alignment
    AudioSubset,
    /// Visual fingerprint subset alignment
    VisualSubset,
    /// Container metadata comparison
    Metadata,
}

impl Detector {
    /// Every detector, in reporting order.
    pub const ALL: [Detector; 3] = [Self::AudioSubset, Self::VisualSubset, Self::Metadata];

    /// Stable name used in reports and evidence tags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioSubset => "audio_subset",
            Self::VisualSubset => "visual_subset",
            Self::Metadata => "metadata",
        }
    }

    /// Fingerprint detector for a modality.
    #[must_use]
    pub fn for_modality(modality: Modality) -> Self {
        match modality {
            Modality::Audio => Self::AudioSubset,
            Modality::Visual => Self::VisualSubset,
        }
    }

    /// Modality a fingerprint detector aligns, if any.
    #[must_use]
    pub fn modality(self) -> Option<Modality> {
        match self {
            Self::AudioSubset => Some(Modality::Audio),
            Self::VisualSubset => Some(Modality::Visual),
            Self::Metadata => None,
        }
    }
}

/// Positive evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    /// Fingerprints aligned (`<detector>:<modality>`)
    Aligned(Detector, Modality),
    /// The alignment distance was exactly zero
    PerfectAlignment,
    /// Durations within tolerance
    DurationMatch,
    /// Sizes within tolerance
    SizeMatch,
    /// Bitrates within tolerance
    BitrateMatch,
    /// Identical resolution
    SameResolution,
    /// Identical codec
    SameCodec,
    /// Identical container
    SameContainer,
}

/// Negative evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Penalty {
    /// Matched span implausibly short for either clip
    DurationMismatch,
    /// A clip is too short for its fingerprint to be reliable
    ShortClip,
    /// Alignment distance above the ceiling
    DistanceCeiling,
    /// Empty or unusable input
    DegenerateInput,
    /// Duration or size information missing
    MissingMetadata,
    /// Duration gap beyond tolerance
    DurationGap,
    /// Size gap beyond tolerance
    SizeGap,
    /// Bitrate gap beyond tolerance
    BitrateGap,
    /// Resolutions differ
    ResolutionGap,
    /// Codecs differ
    CodecGap,
    /// Containers differ
    ContainerGap,
}

impl Penalty {
    /// Stable snake_case tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DurationMismatch => "duration_mismatch",
            Self::ShortClip => "short_clip",
            Self::DistanceCeiling => "distance_ceiling",
            Self::DegenerateInput => "degenerate_input",
            Self::MissingMetadata => "missing_metadata",
            Self::DurationGap => "duration_gap",
            Self::SizeGap => "size_gap",
            Self::BitrateGap => "bitrate_gap",
            Self::ResolutionGap => "resolution_gap",
            Self::CodecGap => "codec_gap",
            Self::ContainerGap => "container_gap",
        }
    }

    const ALL: [Penalty; 11] = [
        Self::DurationMismatch,
        Self::ShortClip,
        Self::DistanceCeiling,
        Self::DegenerateInput,
        Self::MissingMetadata,
        Self::DurationGap,
        Self::SizeGap,
        Self::BitrateGap,
        Self::ResolutionGap,
        Self::CodecGap,
        Self::ContainerGap,
    ];
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aligned(detector, modality) => write!(f, "{detector}:{modality}"),
            Self::PerfectAlignment => f.write_str("perfect_alignment"),
            Self::DurationMatch => f.write_str("duration_match"),
            Self::SizeMatch => f.write_str("size_match"),
            Self::BitrateMatch => f.write_str("bitrate_match"),
            Self::SameResolution => f.write_str("same_resolution"),
            Self::SameCodec => f.write_str("same_codec"),
            Self::SameContainer => f.write_str("same_container"),
        }
    }
}

/// An evidence tag that could not be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown tag: {0}")]
pub struct UnknownTag(pub String);

impl FromStr for Detector {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

impl FromStr for Penalty {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

impl FromStr for Signal {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((detector, modality)) = s.split_once(':') {
            let detector: Detector = detector.parse()?;
            let modality = match modality {
                "audio" => Modality::Audio,
                "visual" => Modality::Visual,
                _ => return Err(UnknownTag(s.to_string())),
            };
            return Ok(Self::Aligned(detector, modality));
        }
        match s {
            "perfect_alignment" => Ok(Self::PerfectAlignment),
            "duration_match" => Ok(Self::DurationMatch),
            "size_match" => Ok(Self::SizeMatch),
            "bitrate_match" => Ok(Self::BitrateMatch),
            "same_resolution" => Ok(Self::SameResolution),
            "same_codec" => Ok(Self::SameCodec),
            "same_container" => Ok(Self::SameContainer),
            _ => Err(UnknownTag(s.to_string())),
        }
    }
}

macro_rules! string_serde {
    ($($ty:ty),*) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(self)
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(serde::de::Error::custom)
                }
            }
        )*
    };
}

string_serde!(Detector, Signal, Penalty);

/// Outcome of scoring one candidate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Confidence in `[0, 1]`
    #[serde(rename = "final")]
    pub final_score: f64,
    /// Positive evidence
    pub positives: BTreeSet<Signal>,
    /// Penalties applied
    pub negatives: BTreeSet<Penalty>,
    /// Detector that produced the score
    pub detector: Detector,
}

impl ScoreResult {
    fn lowest(detector: Detector, penalty: Penalty) -> Self {
        Self {
            final_score: 0.0,
            positives: BTreeSet::new(),
            negatives: BTreeSet::from([penalty]),
            detector,
        }
    }
}

/// Scoring thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Alignment distance at (and above) which confidence is zero
    pub distance_ceiling: f64,
    /// Minimum fraction of the shorter clip that must take part in the match
    pub min_coverage: f64,
    /// Allowed excess of subset duration over superset duration
    pub duration_tolerance: f64,
    /// Clips shorter than this (seconds) are unreliable
    pub min_reliable_duration: f64,
    /// Relative gap tolerated by metadata comparison
    pub metadata_tolerance: f64,
    /// Reward equal resolutions in metadata comparison
    pub prefer_same_resolution: bool,
    /// Reward equal codecs in metadata comparison
    pub prefer_same_codec: bool,
    /// Reward equal containers in metadata comparison
    pub prefer_same_container: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            distance_ceiling: 0.35,
            min_coverage: 0.5,
            duration_tolerance: 0.05,
            min_reliable_duration: 5.0,
            metadata_tolerance: 0.02,
            prefer_same_resolution: true,
            prefer_same_codec: false,
            prefer_same_container: false,
        }
    }
}

const DURATION_MISMATCH_FACTOR: f64 = 0.5;
const SHORT_CLIP_FACTOR: f64 = 0.6;
const CATEGORY_BONUS: f64 = 0.05;
const CATEGORY_PENALTY: f64 = 0.1;

/// Score a fingerprint alignment of `subset` inside `superset`.
///
/// `base = 1 - distance / distance_ceiling`. A distance at or above the
/// ceiling forces the score to zero. The result is then scaled down for
/// each penalty:
/// - `duration_mismatch` when less than `min_coverage` of the shorter
///   sequence matched, or the subset's duration exceeds the superset's by
///   more than `duration_tolerance`
/// - `short_clip` when either duration is below `min_reliable_duration`
///
/// Increasing `alignment.distance` with everything else fixed never
/// increases the score.
#[must_use]
pub fn score_subset_candidate(
    subset: &FileRecord,
    superset: &FileRecord,
    alignment: &AlignmentResult,
    detector: Detector,
    config: &ScoringConfig,
) -> ScoreResult {
    if alignment.shorter_len == 0 || !alignment.distance.is_finite() {
        return ScoreResult::lowest(detector, Penalty::DegenerateInput);
    }

    let distance = alignment.distance.max(0.0);
    if distance > config.distance_ceiling {
        return ScoreResult::lowest(detector, Penalty::DistanceCeiling);
    }

    let mut score = if config.distance_ceiling > 0.0 {
        1.0 - distance / config.distance_ceiling
    } else if distance == 0.0 {
        1.0
    } else {
        0.0
    };

    let mut result = ScoreResult {
        final_score: 0.0,
        positives: BTreeSet::new(),
        negatives: BTreeSet::new(),
        detector,
    };
    if let Some(modality) = detector.modality() {
        result.positives.insert(Signal::Aligned(detector, modality));
    }
    if distance == 0.0 {
        result.positives.insert(Signal::PerfectAlignment);
    }

    let too_long = match (subset.duration(), superset.duration()) {
        (Some(sub), Some(sup)) => sub > sup * (1.0 + config.duration_tolerance),
        _ => false,
    };
    if alignment.subset_coverage() < config.min_coverage || too_long {
        result.negatives.insert(Penalty::DurationMismatch);
        score *= DURATION_MISMATCH_FACTOR;
    }

    let shortest = [subset.duration(), superset.duration()]
        .into_iter()
        .flatten()
        .fold(f64::INFINITY, f64::min);
    if shortest < config.min_reliable_duration {
        result.negatives.insert(Penalty::ShortClip);
        score *= SHORT_CLIP_FACTOR;
    }

    result.final_score = score.clamp(0.0, 1.0);
    result
}

/// Closeness in `[0, 1]` of two positive quantities under a relative tolerance.
fn closeness(a: f64, b: f64, tolerance: f64) -> (f64, bool) {
    let gap = (a - b).abs() / a.max(b);
    let within = gap <= tolerance;
    let value = if tolerance > 0.0 {
        (1.0 - gap / tolerance).max(0.0)
    } else if gap == 0.0 {
        1.0
    } else {
        0.0
    };
    (value, within)
}

/// Score two files from container metadata alone.
///
/// Duration (weight 0.5), size (0.25) and overall bitrate (0.25) are each
/// compared by relative gap against `tolerance`; dimensions missing on
/// either side are left out of the weighted mean. Each enabled preference
/// adds a small bonus when the attribute matches and subtracts a penalty
/// when both sides know it and it differs.
///
/// Missing or zero durations yield the lowest result tagged
/// `missing_metadata`.
#[must_use]
pub fn score_metadata_candidate(
    reference: &FileRecord,
    candidate: &FileRecord,
    tolerance: f64,
    prefer_same_resolution: bool,
    prefer_same_codec: bool,
    prefer_same_container: bool,
) -> ScoreResult {
    let (Some(da), Some(db)) = (reference.duration(), candidate.duration()) else {
        return ScoreResult::lowest(Detector::Metadata, Penalty::MissingMetadata);
    };

    let mut result = ScoreResult {
        final_score: 0.0,
        positives: BTreeSet::new(),
        negatives: BTreeSet::new(),
        detector: Detector::Metadata,
    };
    let mut weighted = 0.0;
    let mut weights = 0.0;
    let mut dimension = |a: f64, b: f64, weight: f64, hit: Signal, miss: Penalty| {
        let (value, within) = closeness(a, b, tolerance);
        weighted += value * weight;
        weights += weight;
        if within {
            result.positives.insert(hit);
        } else {
            result.negatives.insert(miss);
        }
    };

    dimension(da, db, 0.5, Signal::DurationMatch, Penalty::DurationGap);
    if reference.size > 0 && candidate.size > 0 {
        dimension(
            reference.size as f64,
            candidate.size as f64,
            0.25,
            Signal::SizeMatch,
            Penalty::SizeGap,
        );
    }
    let bitrate = |r: &FileRecord| r.media.as_ref().and_then(|m| m.overall_bitrate).filter(|b| *b > 0);
    if let (Some(ba), Some(bb)) = (bitrate(reference), bitrate(candidate)) {
        dimension(ba as f64, bb as f64, 0.25, Signal::BitrateMatch, Penalty::BitrateGap);
    }

    let mut score = weighted / weights;

    let ma = reference.media.clone().unwrap_or_default();
    let mb = candidate.media.clone().unwrap_or_default();
    let codec = |m: &MediaInfo| m.video_codec.clone().or_else(|| m.audio_codec.clone());
    let categories = [
        (
            prefer_same_resolution,
            ma.resolution().zip(mb.resolution()).map(|(a, b)| a == b),
            Signal::SameResolution,
            Penalty::ResolutionGap,
        ),
        (
            prefer_same_codec,
            codec(&ma).zip(codec(&mb)).map(|(a, b)| a.eq_ignore_ascii_case(&b)),
            Signal::SameCodec,
            Penalty::CodecGap,
        ),
        (
            prefer_same_container,
            ma.container.clone().zip(mb.container.clone()).map(|(a, b)| a.eq_ignore_ascii_case(&b)),
            Signal::SameContainer,
            Penalty::ContainerGap,
        ),
    ];
    for (enabled, same, hit, miss) in categories {
        match (enabled, same) {
            (true, Some(true)) => {
                score += CATEGORY_BONUS;
                result.positives.insert(hit);
            }
            (true, Some(false)) => {
                score -= CATEGORY_PENALTY;
                result.negatives.insert(miss);
            }
            _ => {}
        }
    }

    result.final_score = score.clamp(0.0, 1.0);
    result
}

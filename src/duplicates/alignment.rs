//! Offset/stride alignment between fingerprint sequences.
//!
//! # Overview
//!
//! A clip cut from a longer recording produces a fingerprint that matches
//! a contiguous (possibly slightly stretched) slice of the longer file's
//! fingerprint. [`AlignmentMatcher`] slides the shorter sequence along the
//! longer one, trying each configured step multiplier, and keeps the
//! placement with the lowest mean per-element distance.
//!
//! Element distance is the Hamming distance between two digests divided
//! by the digest width, so every distance lies in `[0, 1]` and `0` is a
//! perfect subset match. Deciding whether a distance is "good enough" is
//! left to the scoring engine.
//!
//! # Example
//!
//! ```
//! use mediadupe::duplicates::{AlignmentConfig, AlignmentMatcher};
//! use mediadupe::scanner::{Fingerprint, Modality};
//!
//! let long = Fingerprint::new(Modality::Audio, 32, (0..100).collect());
//! let clip = Fingerprint::new(Modality::Audio, 32, (40..60).collect());
//!
//! let matcher = AlignmentMatcher::new(AlignmentConfig::default());
//! let result = matcher.align(&clip, &long);
//! assert_eq!(result.distance, 0.0);
//! assert_eq!(result.base_offset, 40);
//! ```

use serde::{Deserialize, Serialize};

use crate::scanner::{FileRecord, Fingerprint};

/// Best placement of the shorter sequence inside the longer one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Mean element distance in `[0, 1]`; lower is better
    pub distance: f64,
    /// Index in the longer sequence where the match begins
    pub base_offset: usize,
    /// Leading elements of the shorter sequence that were skipped
    pub start_offset: usize,
    /// Step multiplier applied to the shorter sequence's positions
    pub step: f64,
    /// Length of the shorter sequence
    pub shorter_len: usize,
    /// Length of the longer sequence
    pub longer_len: usize,
}

impl AlignmentResult {
    /// Result for input that cannot be aligned at all.
    #[must_use]
    pub fn degenerate(shorter_len: usize, longer_len: usize) -> Self {
        Self {
            distance: 1.0,
            base_offset: 0,
            start_offset: 0,
            step: 1.0,
            shorter_len,
            longer_len,
        }
    }

    /// Number of shorter-sequence elements that took part in the match.
    #[must_use]
    pub fn matched_len(&self) -> usize {
        self.shorter_len.saturating_sub(self.start_offset)
    }

    /// Fraction of the shorter sequence covered by the match.
    #[must_use]
    pub fn subset_coverage(&self) -> f64 {
        if self.shorter_len == 0 {
            0.0
        } else {
            self.matched_len() as f64 / self.shorter_len as f64
        }
    }

    /// Fraction of the longer sequence spanned by the match.
    #[must_use]
    pub fn superset_coverage(&self) -> f64 {
        if self.longer_len == 0 {
            0.0
        } else {
            (self.matched_len() as f64 * self.step / self.longer_len as f64).clamp(0.0, 1.0)
        }
    }
}

/// Search window configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Step multipliers tried, absorbing small sampling-rate differences
    pub steps: Vec<f64>,
    /// Cap on offsets tried per step (None = every feasible offset)
    pub max_offsets: Option<usize>,
    /// Distance between consecutive offsets tried
    pub offset_stride: usize,
    /// Leading elements of the shorter sequence that may be skipped
    pub max_head_skip: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            steps: vec![1.0, 0.95, 1.05],
            max_offsets: None,
            offset_stride: 1,
            max_head_skip: 0,
        }
    }
}

/// Cheap metadata gates applied before alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefilterGates {
    /// Minimum shorter/longer duration ratio
    pub min_duration_ratio: f64,
    /// Minimum smaller/larger size ratio
    pub min_size_ratio: f64,
}

/// Whether two records are worth comparing at all.
///
/// Both gates compare a min/max ratio against a floor. When either
/// duration is unknown the duration gate passes only if the records share
/// a fingerprint modality.
#[must_use]
pub fn prefilter(a: &FileRecord, b: &FileRecord, gates: &PrefilterGates) -> bool {
    let duration_ok = match (a.duration(), b.duration()) {
        (Some(da), Some(db)) => da.min(db) / da.max(db) >= gates.min_duration_ratio,
        _ => {
            (a.audio.is_some() && b.audio.is_some()) || (a.visual.is_some() && b.visual.is_some())
        }
    };
    if !duration_ok {
        return false;
    }

    let (small, large) = (a.size.min(b.size), a.size.max(b.size));
    large == 0 || small as f64 / large as f64 >= gates.min_size_ratio
}

/// Normalized Hamming distance between two `bits`-wide digests.
#[must_use]
pub fn element_distance(a: u64, b: u64, bits: u32) -> f64 {
    let bits = bits.clamp(1, 64);
    let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    f64::from(((a ^ b) & mask).count_ones()) / f64::from(bits)
}

/// Sliding alignment search.
#[derive(Debug, Clone, Default)]
pub struct AlignmentMatcher {
    config: AlignmentConfig,
}

impl AlignmentMatcher {
    /// Create a matcher with the given search window.
    #[must_use]
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    /// Search configuration.
    #[must_use]
    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Align `subset` inside `superset`.
    ///
    /// If `subset` is the longer of the two the roles are swapped, so
    /// `shorter_len <= longer_len` always holds. Never fails: empty
    /// sequences, differing modalities or widths, and sequences with no
    /// feasible placement produce [`AlignmentResult::degenerate`].
    ///
    /// Candidates are visited in (skip, step, offset) order and only a
    /// strictly better distance replaces the current best, so ties keep
    /// the earliest candidate.
    #[must_use]
    pub fn align(&self, subset: &Fingerprint, superset: &Fingerprint) -> AlignmentResult {
        let (short, long) = if subset.len() <= superset.len() {
            (subset, superset)
        } else {
            (superset, subset)
        };
        let (ls, ll) = (short.len(), long.len());

        if ls == 0 || short.modality != long.modality || short.bits != long.bits {
            return AlignmentResult::degenerate(ls, ll);
        }

        let bits = short.bits;
        let stride = self.config.offset_stride.max(1);
        let max_skip = self.config.max_head_skip.min(ls - 1);
        let mut best: Option<AlignmentResult> = None;

        for skip in 0..=max_skip {
            let sub = &short.values[skip..];
            let last = sub.len() - 1;

            for &step in &self.config.steps {
                if !step.is_finite() || step <= 0.0 {
                    continue;
                }
                let span = (last as f64 * step).round() as usize;
                if span >= ll {
                    continue;
                }
                let max_base = ll - 1 - span;
                let offsets = (0..=max_base)
                    .step_by(stride)
                    .take(self.config.max_offsets.unwrap_or(usize::MAX));

                for base in offsets {
                    let total: f64 = sub
                        .iter()
                        .enumerate()
                        .map(|(i, &v)| {
                            let j = base + (i as f64 * step).round() as usize;
                            element_distance(v, long.values[j], bits)
                        })
                        .sum();
                    let distance = total / sub.len() as f64;

                    if best.is_none_or(|b| distance < b.distance) {
                        let candidate = AlignmentResult {
                            distance,
                            base_offset: base,
                            start_offset: skip,
                            step,
                            shorter_len: ls,
                            longer_len: ll,
                        };
                        // nothing can beat a perfect match
                        if distance == 0.0 {
                            return candidate;
                        }
                        best = Some(candidate);
                    }
                }
            }
        }

        best.unwrap_or_else(|| AlignmentResult::degenerate(ls, ll))
    }
}

//! Keeper selection within duplicate groups.
//!
//! Criteria are applied in order as successive tie-breaks: each criterion
//! narrows the remaining candidates to those with the best value, and the
//! first criterion that leaves a single candidate decides. When every
//! criterion is exhausted the earliest remaining member in discovery order
//! wins. A member with no value for a criterion (e.g. unknown duration)
//! loses to any member that has one.

use std::fmt;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use super::groups::{group_id, Cluster, DuplicateGroup};
use crate::scanner::FileRecord;

/// A keeper comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criterion {
    /// Longest duration
    Longer,
    /// Shortest duration
    Shorter,
    /// Most pixels
    Resolution,
    /// Highest video stream bitrate
    VideoBitrate,
    /// Highest overall bitrate
    Bitrate,
    /// Most recently modified
    Newer,
    /// Least recently modified
    Older,
    /// Fewest bytes
    Smaller,
    /// Most bytes
    Larger,
    /// Most path components
    Deeper,
    /// Fewest path components
    Shallower,
}

impl Criterion {
    /// Every criterion.
    pub const ALL: [Criterion; 11] = [
        Self::Longer,
        Self::Shorter,
        Self::Resolution,
        Self::VideoBitrate,
        Self::Bitrate,
        Self::Newer,
        Self::Older,
        Self::Smaller,
        Self::Larger,
        Self::Deeper,
        Self::Shallower,
    ];

    /// Name used in configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Longer => "longer",
            Self::Shorter => "shorter",
            Self::Resolution => "resolution",
            Self::VideoBitrate => "video-bitrate",
            Self::Bitrate => "bitrate",
            Self::Newer => "newer",
            Self::Older => "older",
            Self::Smaller => "smaller",
            Self::Larger => "larger",
            Self::Deeper => "deeper",
            Self::Shallower => "shallower",
        }
    }

    /// Sort key for a record; higher is better, `None` loses to any value.
    fn key(self, record: &FileRecord) -> Option<i128> {
        let duration_ms = || record.duration().map(|d| (d * 1000.0).round() as i128);
        let media = record.media.as_ref();
        let mtime = || {
            Some(match record.modified.duration_since(UNIX_EPOCH) {
                Ok(d) => d.as_nanos() as i128,
                Err(e) => -(e.duration().as_nanos() as i128),
            })
        };
        match self {
            Self::Longer => duration_ms(),
            Self::Shorter => duration_ms().map(|d| -d),
            Self::Resolution => record.pixels().map(i128::from),
            Self::VideoBitrate => media.and_then(|m| m.video_bitrate).map(i128::from),
            Self::Bitrate => media.and_then(|m| m.overall_bitrate).map(i128::from),
            Self::Newer => mtime(),
            Self::Older => mtime().map(|t| -t),
            Self::Smaller => Some(-i128::from(record.size)),
            Self::Larger => Some(i128::from(record.size)),
            Self::Deeper => Some(record.depth() as i128),
            Self::Shallower => Some(-(record.depth() as i128)),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A criterion name that is not recognized.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown winner criterion '{name}'{}", suggestion.as_ref().map(|s| format!(" (did you mean '{s}'?)")).unwrap_or_default())]
pub struct UnknownCriterion {
    /// The rejected name
    pub name: String,
    /// Closest known name, if any is close
    pub suggestion: Option<String>,
}

impl FromStr for Criterion {
    type Err = UnknownCriterion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        if let Some(c) = Self::ALL.into_iter().find(|c| c.as_str() == normalized) {
            return Ok(c);
        }
        let suggestion = Self::ALL
            .into_iter()
            .map(|c| (strsim::levenshtein(&normalized, c.as_str()), c))
            .filter(|(d, _)| *d <= 3)
            .min_by_key(|(d, _)| *d)
            .map(|(_, c)| c.as_str().to_string());
        Err(UnknownCriterion {
            name: s.to_string(),
            suggestion,
        })
    }
}

/// Parse a list of criterion names.
///
/// # Errors
///
/// Returns the first unknown name, with a suggestion when one is close.
pub fn parse_criteria<S: AsRef<str>>(names: &[S]) -> Result<Vec<Criterion>, UnknownCriterion> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// Keeper selection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinnerConfig {
    /// Criterion names, most important first
    pub criteria: Vec<String>,
}

impl Default for WinnerConfig {
    fn default() -> Self {
        Self {
            criteria: ["longer", "resolution", "video-bitrate", "newer", "smaller", "deeper"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Pick the keeper of one cluster.
///
/// # Returns
///
/// The record index of the keeper.
#[must_use]
pub fn choose_keeper(members: &[usize], records: &[FileRecord], criteria: &[Criterion]) -> usize {
    let mut candidates: Vec<usize> = members.to_vec();
    candidates.sort_by_key(|&m| records[m].index);

    for criterion in criteria {
        if candidates.len() <= 1 {
            break;
        }
        let best = candidates
            .iter()
            .map(|&m| criterion.key(&records[m]))
            .max()
            .flatten();
        candidates.retain(|&m| criterion.key(&records[m]) == best);
    }

    candidates[0]
}

/// Turn clusters into groups with a keeper and losers.
///
/// Deterministic and pure: the same clusters, records and criteria always
/// give the same groups. Losers keep discovery order.
#[must_use]
pub fn choose_winners(
    clusters: Vec<Cluster>,
    records: &[FileRecord],
    criteria: &[Criterion],
) -> Vec<DuplicateGroup> {
    clusters
        .into_iter()
        .filter(|c| c.members.len() > 1)
        .map(|cluster| {
            let keep_index = choose_keeper(&cluster.members, records, criteria);
            let mut loser_indices: Vec<usize> = cluster
                .members
                .iter()
                .copied()
                .filter(|&m| m != keep_index)
                .collect();
            loser_indices.sort_by_key(|&m| records[m].index);

            let id = group_id(cluster.members.iter().map(|&m| &records[m].path));
            let loser_bytes = loser_indices.iter().map(|&m| records[m].size).sum();
            log::debug!(
                "Group {}: keeping {} over {} loser(s)",
                id,
                records[keep_index].path.display(),
                loser_indices.len()
            );

            DuplicateGroup {
                id,
                keep_index,
                keep: records[keep_index].path.clone(),
                losers: loser_indices.iter().map(|&m| records[m].path.clone()).collect(),
                loser_indices,
                method: cluster.method,
                evidence: cluster.evidence,
                overlap_hints: cluster.overlap_hints,
                loser_bytes,
            }
        })
        .collect()
}

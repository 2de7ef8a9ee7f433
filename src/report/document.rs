//! The report document.
//!
//! On disk:
//!
//! ```json
//! {
//!   "summary": {"groups": 1, "losers": 1, "size_bytes": 1024, "by_method": {"hash": 1}},
//!   "groups": {
//!     "3f2a...": {
//!       "keep": "/media/a.mp4",
//!       "losers": ["/backup/a.mp4"],
//!       "method": "hash",
//!       "evidence": {"sha256": "..."},
//!       "overlap_hints": {}
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{write_atomic, ReportError};
use crate::duplicates::{DuplicateGroup, Evidence, Method};

/// Report totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of groups
    pub groups: usize,
    /// Number of loser files across all groups
    pub losers: usize,
    /// Bytes held by losers
    pub size_bytes: u64,
    /// Groups per detection method
    pub by_method: BTreeMap<Method, usize>,
}

/// One group as stored in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// The member that is kept
    pub keep: PathBuf,
    /// Members to resolve away, in discovery order
    pub losers: Vec<PathBuf>,
    /// How the group was detected
    pub method: Method,
    /// Signals behind the decision
    #[serde(default)]
    pub evidence: Evidence,
    /// Member path to matched fraction
    #[serde(default)]
    pub overlap_hints: BTreeMap<PathBuf, f64>,
    /// Bytes held by the losers
    #[serde(default)]
    pub loser_bytes: u64,
}

impl GroupRecord {
    /// The keeper followed by the losers.
    pub fn members(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.keep).chain(self.losers.iter())
    }
}

impl From<&DuplicateGroup> for GroupRecord {
    fn from(group: &DuplicateGroup) -> Self {
        Self {
            keep: group.keep.clone(),
            losers: group.losers.clone(),
            method: group.method,
            evidence: group.evidence.clone(),
            overlap_hints: group.overlap_hints.clone(),
            loser_bytes: group.loser_bytes,
        }
    }
}

/// A complete report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    /// Totals over `groups`
    pub summary: Summary,
    /// Groups by id
    pub groups: BTreeMap<String, GroupRecord>,
    /// When the report was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ReportDocument {
    /// Build a report from grouping output.
    #[must_use]
    pub fn from_groups(groups: &[DuplicateGroup]) -> Self {
        let mut doc = Self {
            summary: Summary::default(),
            groups: groups
                .iter()
                .map(|g| (g.id.clone(), GroupRecord::from(g)))
                .collect(),
            created_at: Some(Utc::now()),
        };
        doc.recompute_summary();
        doc
    }

    /// Recompute `summary` from `groups`.
    pub fn recompute_summary(&mut self) {
        let mut summary = Summary {
            groups: self.groups.len(),
            ..Default::default()
        };
        for group in self.groups.values() {
            summary.losers += group.losers.len();
            summary.size_bytes += group.loser_bytes;
            *summary.by_method.entry(group.method).or_insert(0) += 1;
        }
        self.summary = summary;
    }

    /// Whether the report has no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Load a report.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let bytes = fs::read(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: Self = serde_json::from_slice(&bytes).map_err(|source| ReportError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!(
            "Loaded report {} ({} groups)",
            path.display(),
            doc.groups.len()
        );
        Ok(doc)
    }

    /// Load and merge several reports.
    ///
    /// # Errors
    ///
    /// Returns the first load failure.
    pub fn load_all(paths: &[PathBuf]) -> Result<Self, ReportError> {
        let docs = paths
            .iter()
            .map(|p| Self::load(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::merge(docs))
    }

    /// Save the report atomically, pretty-printed.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let io_err = |source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_vec_pretty(self).map_err(|source| ReportError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &json).map_err(io_err)?;
        log::info!("Report written to {}", path.display());
        Ok(())
    }

    /// Combine reports. Groups with the same id are taken from the later
    /// document; the summary is recomputed.
    ///
    /// A file belongs to at most one merged group. When a later group
    /// claims a file that an earlier group (with a different id) already
    /// holds, the earlier group is dropped with a warning.
    #[must_use]
    pub fn merge(docs: impl IntoIterator<Item = ReportDocument>) -> Self {
        let mut merged = Self::default();
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();

        for doc in docs {
            for (id, group) in doc.groups {
                let conflicts: BTreeSet<String> = group
                    .members()
                    .filter_map(|path| claimed.get(path))
                    .filter(|owner| **owner != id)
                    .cloned()
                    .collect();
                for owner in conflicts {
                    log::warn!(
                        "Dropping group {} from an earlier report: its files overlap group {}",
                        owner,
                        id
                    );
                    if let Some(dropped) = merged.groups.remove(&owner) {
                        for path in dropped.members() {
                            claimed.remove(path);
                        }
                    }
                }
                if let Some(replaced) = merged.groups.remove(&id) {
                    for path in replaced.members() {
                        claimed.remove(path);
                    }
                }
                for path in group.members() {
                    claimed.insert(path.clone(), id.clone());
                }
                merged.groups.insert(id, group);
            }
            merged.created_at = match (merged.created_at, doc.created_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        merged.recompute_summary();
        merged
    }

    /// Every path mentioned by any group, sorted and deduplicated.
    ///
    /// Feed this to a later scan's exclusion list to skip files that were
    /// already resolved.
    #[must_use]
    pub fn exclusions(&self) -> Vec<PathBuf> {
        let set: BTreeSet<&PathBuf> = self
            .groups
            .values()
            .flat_map(GroupRecord::members)
            .collect();
        set.into_iter().cloned().collect()
    }
}

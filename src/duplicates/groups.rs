//! Two-phase duplicate grouping.
//!
//! # Overview
//!
//! Grouping runs in two phases over the catalog's [`FileRecord`]s:
//!
//! 1. **Exact**: records are bucketed by (size, SHA-256). Every bucket with
//!    two or more members becomes a cluster with method `hash`.
//! 2. **Approximate**: the remaining records with a duration or a
//!    fingerprint are sorted by duration and paired within a sliding
//!    window. Pairs passing the metadata gates are scored (in parallel),
//!    and pairs whose score reaches the acceptance threshold are joined in
//!    a union-find structure. Each connected component becomes a cluster.
//!
//! A file ends up in at most one cluster. Keeper selection happens later,
//! in [`super::winner`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::alignment::{prefilter, AlignmentMatcher, AlignmentResult, PrefilterGates};
use super::scoring::{
    score_metadata_candidate, score_subset_candidate, Detector, Penalty, ScoreResult,
    ScoringConfig,
};
use crate::progress::ProgressReporter;
use crate::scanner::{FileRecord, Modality};

/// How a group was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Identical content hash
    Hash,
    /// Audio fingerprint subset alignment
    AudioSubset,
    /// Visual fingerprint subset alignment
    VisualSubset,
    /// Container metadata comparison
    Metadata,
}

impl Method {
    /// Stable name used in report summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::AudioSubset => "audio_subset",
            Self::VisualSubset => "visual_subset",
            Self::Metadata => "metadata",
        }
    }
}

impl From<Detector> for Method {
    fn from(detector: Detector) -> Self {
        match detector {
            Detector::AudioSubset => Self::AudioSubset,
            Detector::VisualSubset => Self::VisualSubset,
            Detector::Metadata => Self::Metadata,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted pair inside an approximate group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeEvidence {
    /// First member (lower discovery index)
    pub a: PathBuf,
    /// Second member
    pub b: PathBuf,
    /// Score of the pair
    pub score: ScoreResult,
    /// Alignment, for fingerprint detectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentResult>,
}

/// Raw signals behind a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Shared SHA-256 digest of an exact group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Shared size of an exact group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Accepted pairs of an approximate group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeEvidence>,
    /// Free-form detector output
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A set of records believed to be duplicates, before keeper selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Record indices, in discovery order
    pub members: Vec<usize>,
    /// Detection method
    pub method: Method,
    /// Signals that produced the cluster
    pub evidence: Evidence,
    /// Member path to contribution metric (e.g. matched-duration fraction)
    pub overlap_hints: BTreeMap<PathBuf, f64>,
}

/// A resolved group with its keeper.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    /// Stable identifier derived from the member paths
    pub id: String,
    /// Record index of the keeper
    pub keep_index: usize,
    /// Record indices of the losers, in discovery order
    pub loser_indices: Vec<usize>,
    /// Path of the keeper
    pub keep: PathBuf,
    /// Paths of the losers, in discovery order
    pub losers: Vec<PathBuf>,
    /// Detection method
    pub method: Method,
    /// Signals that produced the group
    pub evidence: Evidence,
    /// Member path to contribution metric
    pub overlap_hints: BTreeMap<PathBuf, f64>,
    /// Total size of the losers in bytes
    pub loser_bytes: u64,
}

impl DuplicateGroup {
    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.losers.len() + 1
    }

    /// Never true; a group always has a keeper.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every member path, keeper first.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.keep.clone())
            .chain(self.losers.iter().cloned())
            .collect()
    }
}

/// Stable group id: BLAKE3 of the sorted member paths.
#[must_use]
pub fn group_id<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> String {
    let mut sorted: Vec<&PathBuf> = paths.into_iter().collect();
    sorted.sort();
    let mut hasher = blake3::Hasher::new();
    for path in sorted {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex()[..16].to_string()
}

/// Score counts over fixed ranges `[0, .25)`, `[.25, .5)`, `[.5, .75)`, `[.75, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreHistogram {
    /// Counts per range, lowest first
    pub bins: [u64; 4],
}

impl ScoreHistogram {
    /// Range labels, matching `bins`.
    pub const LABELS: [&'static str; 4] = ["0.00-0.25", "0.25-0.50", "0.50-0.75", "0.75-1.00"];

    /// Count one score.
    pub fn record(&mut self, score: f64) {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        let bin = ((score * 4.0) as usize).min(3);
        self.bins[bin] += 1;
    }

    /// Total scores counted.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }
}

/// Observability counters from one grouping run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingStats {
    /// Records considered
    pub total_records: usize,
    /// Clusters from the exact phase
    pub exact_groups: usize,
    /// Clusters from the approximate phase
    pub approximate_groups: usize,
    /// Pairs produced by the sliding window
    pub candidate_pairs: usize,
    /// Pairs that passed the metadata gates and were scored
    pub scored_pairs: usize,
    /// Pairs accepted as edges
    pub accepted_pairs: usize,
    /// Scores per range
    pub histogram: ScoreHistogram,
    /// Scores per detector
    pub detector_counts: BTreeMap<Detector, u64>,
    /// Occurrences of each penalty tag
    pub penalty_counts: BTreeMap<Penalty, u64>,
    /// Scores below the low-confidence floor
    pub low_confidence: u64,
}

impl GroupingStats {
    fn record_score(&mut self, score: &ScoreResult, floor: f64) {
        self.histogram.record(score.final_score);
        *self.detector_counts.entry(score.detector).or_insert(0) += 1;
        for penalty in &score.negatives {
            *self.penalty_counts.entry(*penalty).or_insert(0) += 1;
        }
        if score.final_score < floor {
            self.low_confidence += 1;
        }
    }
}

/// Grouping thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Run the approximate phase at all
    pub approximate: bool,
    /// Minimum score for an edge to be accepted
    pub accept_threshold: f64,
    /// Scores below this count as low confidence
    pub low_confidence_floor: f64,
    /// Minimum shorter/longer duration ratio for a candidate pair
    pub min_duration_ratio: f64,
    /// Minimum smaller/larger size ratio for a candidate pair
    pub min_size_ratio: f64,
    /// Maximum neighbours each record is paired with in the sliding window
    pub window: usize,
    /// Fall back to metadata scoring when no fingerprints are shared
    pub metadata_fallback: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            approximate: true,
            accept_threshold: 0.75,
            low_confidence_floor: 0.5,
            min_duration_ratio: 0.1,
            min_size_ratio: 0.01,
            window: 64,
            metadata_fallback: true,
        }
    }
}

impl GroupingConfig {
    /// Metadata gates applied before scoring.
    #[must_use]
    pub fn gates(&self) -> PrefilterGates {
        PrefilterGates {
            min_duration_ratio: self.min_duration_ratio,
            min_size_ratio: self.min_size_ratio,
        }
    }
}

/// Union-find over record indices with path compression and union by size.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    /// `n` singleton sets.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    /// Representative of `x`'s set.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`. Returns false if already merged.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }

    /// Sets with two or more members, each sorted, ordered by smallest member.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for x in 0..self.parent.len() {
            let root = self.find(x);
            by_root.entry(root).or_default().push(x);
        }
        let mut sets: Vec<Vec<usize>> = by_root.into_values().filter(|s| s.len() > 1).collect();
        sets.sort_by_key(|s| s[0]);
        sets
    }
}

/// Outcome of scoring one pair.
#[derive(Debug, Clone)]
struct PairScore {
    a: usize,
    b: usize,
    score: ScoreResult,
    alignment: Option<AlignmentResult>,
    /// Position (`a` or `b`) that played the subset role
    subset: Option<usize>,
}

/// Clusters records into duplicate groups.
pub struct GroupingEngine {
    config: GroupingConfig,
    scoring: ScoringConfig,
    matcher: AlignmentMatcher,
    reporter: Option<Arc<dyn ProgressReporter>>,
    heartbeat: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl std::fmt::Debug for GroupingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupingEngine")
            .field("config", &self.config)
            .field("scoring", &self.scoring)
            .field("matcher", &self.matcher)
            .field("reporter", &self.reporter.is_some())
            .field("heartbeat", &self.heartbeat.is_some())
            .finish()
    }
}

impl GroupingEngine {
    /// Create an engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Grouping thresholds
    /// * `scoring` - Scoring thresholds
    /// * `matcher` - Alignment search used by fingerprint detectors
    #[must_use]
    pub fn new(config: GroupingConfig, scoring: ScoringConfig, matcher: AlignmentMatcher) -> Self {
        Self {
            config,
            scoring,
            matcher,
            reporter: None,
            heartbeat: None,
        }
    }

    /// Send every pair score to a reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Call `heartbeat` after each candidate pair is examined.
    ///
    /// Called from rayon worker threads, so it must be cheap.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Cluster `records`.
    ///
    /// Record indices in the returned clusters are positions in `records`.
    /// Pair scoring runs on the current rayon pool; acceptance is applied
    /// sequentially in pair order, so the result is deterministic.
    #[must_use]
    pub fn group(&self, records: &[FileRecord]) -> (Vec<Cluster>, GroupingStats) {
        let mut stats = GroupingStats {
            total_records: records.len(),
            ..Default::default()
        };
        let mut grouped = vec![false; records.len()];

        let mut clusters = exact_clusters(records);
        for cluster in &clusters {
            for &m in &cluster.members {
                grouped[m] = true;
            }
        }
        stats.exact_groups = clusters.len();
        log::info!("Exact phase: {} groups", clusters.len());

        if self.config.approximate {
            let approximate = self.approximate_clusters(records, &grouped, &mut stats);
            stats.approximate_groups = approximate.len();
            clusters.extend(approximate);
        }

        clusters.sort_by_key(|c| c.members[0]);
        log::info!(
            "Grouping complete: {} exact, {} approximate ({} of {} pairs accepted)",
            stats.exact_groups,
            stats.approximate_groups,
            stats.accepted_pairs,
            stats.scored_pairs
        );
        (clusters, stats)
    }

    fn candidate_pairs(&self, records: &[FileRecord], grouped: &[bool]) -> Vec<(usize, usize)> {
        let window = self.config.window.max(1);
        let eligible = |i: &usize| !grouped[*i] && records[*i].is_approximate_candidate();

        let mut timed: Vec<(f64, usize)> = (0..records.len())
            .filter(eligible)
            .filter_map(|i| records[i].duration().map(|d| (d, i)))
            .collect();
        timed.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));

        let mut pairs = Vec::new();
        for (pos, &(shorter, i)) in timed.iter().enumerate() {
            for &(longer, j) in timed.iter().skip(pos + 1).take(window) {
                if shorter / longer < self.config.min_duration_ratio {
                    break;
                }
                pairs.push((i.min(j), i.max(j)));
            }
        }

        // Fingerprinted records without a duration pair among themselves.
        let untimed: Vec<usize> = (0..records.len())
            .filter(eligible)
            .filter(|&i| records[i].duration().is_none())
            .collect();
        for (pos, &i) in untimed.iter().enumerate() {
            for &j in untimed.iter().skip(pos + 1).take(window) {
                pairs.push((i, j));
            }
        }

        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    fn approximate_clusters(
        &self,
        records: &[FileRecord],
        grouped: &[bool],
        stats: &mut GroupingStats,
    ) -> Vec<Cluster> {
        let pairs = self.candidate_pairs(records, grouped);
        stats.candidate_pairs = pairs.len();
        let gates = self.config.gates();

        let scored: Vec<PairScore> = pairs
            .par_iter()
            .filter_map(|&(a, b)| {
                let score = prefilter(&records[a], &records[b], &gates)
                    .then(|| self.score_pair(records, a, b))
                    .flatten();
                if let Some(heartbeat) = &self.heartbeat {
                    heartbeat();
                }
                score
            })
            .collect();
        stats.scored_pairs = scored.len();
        log::debug!(
            "Approximate phase: {} candidate pairs, {} scored",
            stats.candidate_pairs,
            stats.scored_pairs
        );

        let mut uf = UnionFind::new(records.len());
        let mut accepted: Vec<PairScore> = Vec::new();
        for pair in scored {
            stats.record_score(&pair.score, self.config.low_confidence_floor);
            if let Some(reporter) = &self.reporter {
                reporter.score(pair.score.detector, pair.score.final_score, &pair.score.negatives);
            }
            if pair.score.final_score >= self.config.accept_threshold {
                log::debug!(
                    "Accepted {} ~ {} ({}, {:.3})",
                    records[pair.a].path.display(),
                    records[pair.b].path.display(),
                    pair.score.detector,
                    pair.score.final_score
                );
                uf.union(pair.a, pair.b);
                accepted.push(pair);
            }
        }
        stats.accepted_pairs = accepted.len();

        uf.components()
            .into_iter()
            .map(|members| build_cluster(records, &mut uf, members, &accepted))
            .collect()
    }

    /// Best score for a pair over the detectors its records support.
    fn score_pair(&self, records: &[FileRecord], a: usize, b: usize) -> Option<PairScore> {
        let (ra, rb) = (&records[a], &records[b]);
        let mut best: Option<PairScore> = None;

        for modality in [Modality::Visual, Modality::Audio] {
            let (Some(fa), Some(fb)) = (ra.fingerprint(modality), rb.fingerprint(modality)) else {
                continue;
            };
            // shorter fingerprint plays the subset role; equal lengths keep discovery order
            let (sub, sup, alignment) = if fa.len() <= fb.len() {
                (a, b, self.matcher.align(fa, fb))
            } else {
                (b, a, self.matcher.align(fb, fa))
            };
            let score = score_subset_candidate(
                &records[sub],
                &records[sup],
                &alignment,
                Detector::for_modality(modality),
                &self.scoring,
            );
            if best
                .as_ref()
                .is_none_or(|b| score.final_score > b.score.final_score)
            {
                best = Some(PairScore {
                    a,
                    b,
                    score,
                    alignment: Some(alignment),
                    subset: Some(sub),
                });
            }
        }

        if best.is_none() && self.config.metadata_fallback {
            let score = score_metadata_candidate(
                ra,
                rb,
                self.scoring.metadata_tolerance,
                self.scoring.prefer_same_resolution,
                self.scoring.prefer_same_codec,
                self.scoring.prefer_same_container,
            );
            best = Some(PairScore {
                a,
                b,
                score,
                alignment: None,
                subset: None,
            });
        }

        best
    }
}

fn exact_clusters(records: &[FileRecord]) -> Vec<Cluster> {
    let mut buckets: HashMap<(u64, &str), Vec<usize>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        if let Some(hash) = record.full_hash.as_deref() {
            buckets.entry((record.size, hash)).or_default().push(i);
        }
    }

    let mut clusters: Vec<Cluster> = buckets
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|((size, hash), mut members)| {
            members.sort_unstable();
            let overlap_hints = members
                .iter()
                .map(|&m| (records[m].path.clone(), 1.0))
                .collect();
            log::debug!("Hash group {}: {} members", hash, members.len());
            Cluster {
                members,
                method: Method::Hash,
                evidence: Evidence {
                    sha256: Some(hash.to_string()),
                    size: Some(size),
                    ..Default::default()
                },
                overlap_hints,
            }
        })
        .collect();
    clusters.sort_by_key(|c| c.members[0]);
    clusters
}

/// Contribution of each side of an accepted pair.
fn pair_hints(records: &[FileRecord], pair: &PairScore) -> [(usize, f64); 2] {
    match (pair.subset, pair.alignment) {
        (Some(sub), Some(alignment)) => {
            let sup = if sub == pair.a { pair.b } else { pair.a };
            [
                (sub, alignment.subset_coverage()),
                (sup, alignment.superset_coverage()),
            ]
        }
        _ => {
            let da = records[pair.a].duration().unwrap_or(0.0);
            let db = records[pair.b].duration().unwrap_or(0.0);
            let ratio = if da.max(db) > 0.0 { da.min(db) / da.max(db) } else { 0.0 };
            if da <= db {
                [(pair.a, 1.0), (pair.b, ratio)]
            } else {
                [(pair.a, ratio), (pair.b, 1.0)]
            }
        }
    }
}

fn build_cluster(
    records: &[FileRecord],
    uf: &mut UnionFind,
    members: Vec<usize>,
    accepted: &[PairScore],
) -> Cluster {
    let root = uf.find(members[0]);
    let edges: Vec<&PairScore> = accepted.iter().filter(|p| uf.find(p.a) == root).collect();

    let strongest = edges.iter().fold(None::<&PairScore>, |best, &p| match best {
        Some(b) if b.score.final_score >= p.score.final_score => Some(b),
        _ => Some(p),
    });
    let method = strongest.map_or(Method::Metadata, |p| p.score.detector.into());

    let mut overlap_hints: BTreeMap<PathBuf, f64> = BTreeMap::new();
    for edge in &edges {
        for (index, hint) in pair_hints(records, edge) {
            let entry = overlap_hints.entry(records[index].path.clone()).or_insert(0.0);
            *entry = entry.max(hint);
        }
    }

    let evidence = Evidence {
        edges: edges
            .iter()
            .map(|p| EdgeEvidence {
                a: records[p.a].path.clone(),
                b: records[p.b].path.clone(),
                score: p.score.clone(),
                alignment: p.alignment,
            })
            .collect(),
        ..Default::default()
    };

    Cluster {
        members,
        method,
        evidence,
        overlap_hints,
    }
}

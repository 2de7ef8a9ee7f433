//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Fingerprint alignment between a presumed subset and superset
//! - Confidence scoring with itemized evidence
//! - Exact (hash) and approximate (fingerprint/metadata) grouping
//! - Deterministic keeper selection
//!
//! # Architecture
//!
//! - [`alignment`]: offset/step search and the cheap metadata prefilter
//! - [`scoring`]: pure functions turning alignments and metadata into scores
//! - [`groups`]: union-find clustering and run statistics
//! - [`winner`]: ordered tie-break criteria for choosing the keeper

pub mod alignment;
pub mod groups;
pub mod scoring;
pub mod winner;

pub use alignment::{
    element_distance, prefilter, AlignmentConfig, AlignmentMatcher, AlignmentResult,
    PrefilterGates,
};
pub use groups::{
    group_id, Cluster, DuplicateGroup, EdgeEvidence, Evidence, GroupingConfig, GroupingEngine,
    GroupingStats, Method, ScoreHistogram, UnionFind,
};
pub use scoring::{
    score_metadata_candidate, score_subset_candidate, Detector, Penalty, ScoreResult,
    ScoringConfig, Signal, UnknownTag,
};
pub use winner::{
    choose_keeper, choose_winners, parse_criteria, Criterion, UnknownCriterion, WinnerConfig,
};

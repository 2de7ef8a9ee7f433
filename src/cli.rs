//! Command-line interface definitions.
//!
//! # Example
//!
//! ```bash
//! # Scan two roots, only video containers, writing ./out/report.json
//! mediadupe scan /media /backup -p mp4 -p mkv -o out
//!
//! # Cheap survey of a huge tree: 5% sample, hashing only
//! mediadupe scan /archive --sample 0.05 --stages discover,quick-hash
//!
//! # Preview, then archive the losers
//! mediadupe apply out/report.json --dry-run
//! mediadupe apply out/report.json --backup /trash --root /media --root /backup
//!
//! # Combine reports and list files to exclude from future scans
//! mediadupe merge a/report.json b/report.json -o all.json --exclusions skip.txt
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::pipeline::Stage;

/// Exact and approximate duplicate detection for media collections.
#[derive(Debug, Parser)]
#[command(name = "mediadupe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH", env = "MEDIADUPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Find duplicates and write a report
    Scan(ScanArgs),
    /// Delete or archive the losers of one or more reports
    Apply(ApplyArgs),
    /// Merge reports for combined analysis
    Merge(MergeArgs),
}

/// Where metadata and fingerprints come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProbeKind {
    /// No probing; hash-only detection
    None,
    /// Read `<file>.probe.json` written by an external prober
    #[default]
    Sidecar,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories to scan
    #[arg(value_name = "PATH", required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,

    /// File name patterns (`mp4`, `.mp4` and `*.mp4` are equivalent)
    #[arg(short, long = "pattern", value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// Maximum directory depth (0 = root directory only)
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Fraction of discovered files to process, in (0, 1]
    #[arg(long = "sample", value_name = "RATIO")]
    pub sample_ratio: Option<f64>,

    /// Seed for sampling
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Skip every file named in these reports
    #[arg(long = "exclude-report", value_name = "REPORT")]
    pub exclude_reports: Vec<PathBuf>,

    /// Stages to run, comma separated (discover always runs)
    #[arg(long, value_delimiter = ',', value_name = "STAGES")]
    pub stages: Vec<Stage>,

    /// Worker threads (default: CPU count minus one)
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Output directory for the report and run lock
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Take over an existing run lock
    #[arg(long)]
    pub resume: bool,

    /// Keeper criteria, most important first, comma separated
    #[arg(long, value_delimiter = ',', value_name = "CRITERIA")]
    pub criteria: Vec<String>,

    /// Minimum confidence for approximate matches, in [0, 1]
    #[arg(long, value_name = "SCORE")]
    pub threshold: Option<f64>,

    /// Only report byte-identical duplicates
    #[arg(long)]
    pub no_approximate: bool,

    /// Metadata and fingerprint source
    #[arg(long, value_enum, default_value_t = ProbeKind::Sidecar)]
    pub probe: ProbeKind,

    /// Read block size for full hashing (e.g. 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub block_size: Option<u64>,

    /// Hash cache directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disable the hash cache
    #[arg(long, conflicts_with = "cache_dir")]
    pub no_cache: bool,
}

impl ScanArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if !self.patterns.is_empty() {
            config.catalog.patterns.clone_from(&self.patterns);
        }
        if self.max_depth.is_some() {
            config.catalog.max_depth = self.max_depth;
        }
        if self.sample_ratio.is_some() {
            config.catalog.sample_ratio = self.sample_ratio;
        }
        if let Some(seed) = self.seed {
            config.catalog.seed = seed;
        }
        if !self.stages.is_empty() {
            config.pipeline.stages.clone_from(&self.stages);
        }
        if self.workers.is_some() {
            config.pipeline.workers = self.workers;
        }
        if let Some(output) = &self.output {
            config.pipeline.output_root.clone_from(output);
        }
        if self.resume {
            config.pipeline.resume = true;
        }
        if !self.criteria.is_empty() {
            config.winner.criteria.clone_from(&self.criteria);
        }
        if let Some(threshold) = self.threshold {
            config.grouping.accept_threshold = threshold;
        }
        if self.no_approximate {
            config.grouping.approximate = false;
        }
        if let Some(block) = self.block_size {
            config.hashing.block_size = usize::try_from(block).unwrap_or(usize::MAX);
        }
        if self.cache_dir.is_some() {
            config.cache.root.clone_from(&self.cache_dir);
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
    }
}

/// Arguments for the apply subcommand.
#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Report files (merged when several are given)
    #[arg(value_name = "REPORT", required = true, num_args = 1..)]
    pub reports: Vec<PathBuf>,

    /// Only report what would be done
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Move losers under this directory instead of deleting them
    #[arg(long, value_name = "DIR")]
    pub backup: Option<PathBuf>,

    /// Scan roots, so backups keep their path relative to the root
    #[arg(long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,
}

/// Arguments for the merge subcommand.
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Report files to merge; later reports win on conflicting groups
    #[arg(value_name = "REPORT", required = true, num_args = 1..)]
    pub reports: Vec<PathBuf>,

    /// Write the merged report here
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write every grouped path, one per line, for excluding from future scans
    #[arg(long, value_name = "PATH")]
    pub exclusions: Option<PathBuf>,
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use mediadupe::cli::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("1MiB").unwrap(), 1_048_576);
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}

//! mediadupe - Exact and approximate duplicate detection for media collections
//!
//! A staged pipeline (discover, quick-hash, probe, group) finds byte-identical
//! files through a size/partial/full hash funnel, then pairs near-identical
//! encodes by fingerprint alignment or metadata scoring. Each group gets a
//! keeper chosen by ordered criteria, and the result is written as a JSON
//! report that `apply` can act on later.

pub mod cache;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod signal;

use std::sync::Arc;

use anyhow::Context;
use bytesize::ByteSize;

use crate::cli::{ApplyArgs, Cli, Commands, MergeArgs, ProbeKind, ScanArgs};
use crate::config::EngineConfig;
use crate::error::ExitCode;
use crate::pipeline::Pipeline;
use crate::progress::Progress;
use crate::report::{write_atomic, ApplyConfig, ApplyEngine, ReportDocument};
use crate::scanner::{MediaProbe, NullProbe, SidecarProbe};

/// Run the command described by `cli`.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the command fails as a
/// whole. Per-file failures are reported through the exit code instead.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    let config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Scan(args) => run_scan(&args, config, cli.quiet),
        Commands::Apply(args) => run_apply(&args, cli.quiet),
        Commands::Merge(args) => run_merge(&args),
    }
}

fn run_scan(args: &ScanArgs, mut config: EngineConfig, quiet: bool) -> anyhow::Result<ExitCode> {
    args.apply_to(&mut config);
    if !args.exclude_reports.is_empty() {
        let previous = ReportDocument::load_all(&args.exclude_reports)
            .context("Failed to read exclusion reports")?;
        let excluded = previous.exclusions();
        log::info!("Excluding {} file(s) named in earlier reports", excluded.len());
        config.catalog.excluded.extend(excluded);
    }
    config.validate().context("Invalid configuration")?;

    let handler = signal::install_handler().context("Failed to set up Ctrl+C handling")?;
    let probe: Arc<dyn MediaProbe> = match args.probe {
        ProbeKind::None => Arc::new(NullProbe),
        ProbeKind::Sidecar => Arc::new(SidecarProbe),
    };

    let pipeline = Pipeline::new(config)
        .with_probe(probe)
        .with_reporter(Arc::new(Progress::new(quiet)))
        .with_shutdown_flag(handler.get_flag())
        .with_configured_cache()
        .context("Failed to open hash cache")?;

    let outcome = pipeline.run(&args.paths).context("Scan failed")?;

    if outcome.errors > 0 {
        log::warn!("{} file(s) could not be read; see the log for details", outcome.errors);
    }

    let Some(report) = &outcome.report else {
        if !quiet {
            println!(
                "Processed {} of {} file(s); grouping was not run",
                outcome.records.len(),
                outcome.total_discovered
            );
        }
        return Ok(ExitCode::Success);
    };

    if !quiet {
        println!(
            "{} duplicate group(s), {} redundant file(s), {} reclaimable",
            report.summary.groups,
            report.summary.losers,
            ByteSize::b(report.summary.size_bytes)
        );
        if let Some(path) = &outcome.report_path {
            println!("Report written to {}", path.display());
        }
    }

    if outcome.has_duplicates() {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::NoDuplicates)
    }
}

fn run_apply(args: &ApplyArgs, quiet: bool) -> anyhow::Result<ExitCode> {
    let report = ReportDocument::load_all(&args.reports).context("Failed to read report")?;
    let engine = ApplyEngine::new(ApplyConfig {
        dry_run: args.dry_run,
        backup_root: args.backup.clone(),
        scan_roots: args.roots.clone(),
    });

    let outcome = engine.apply(&report);
    for (path, reason) in &outcome.failures {
        log::error!("{}: {}", path.display(), reason);
    }
    if !quiet {
        println!("{}", outcome.summary());
    }

    if outcome.is_partial() {
        Ok(ExitCode::PartialSuccess)
    } else {
        Ok(ExitCode::Success)
    }
}

fn run_merge(args: &MergeArgs) -> anyhow::Result<ExitCode> {
    let merged = ReportDocument::load_all(&args.reports).context("Failed to read report")?;
    log::info!(
        "Merged {} report(s) into {} group(s)",
        args.reports.len(),
        merged.summary.groups
    );

    match &args.output {
        Some(path) => merged
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None if args.exclusions.is_none() => {
            println!("{}", serde_json::to_string_pretty(&merged)?);
        }
        None => {}
    }

    if let Some(path) = &args.exclusions {
        let mut text = String::new();
        for excluded in merged.exclusions() {
            text.push_str(&excluded.to_string_lossy());
            text.push('\n');
        }
        write_atomic(path, text.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(ExitCode::Success)
}

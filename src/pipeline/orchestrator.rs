//! The pipeline orchestrator.
//!
//! Runs discover → quick-hash → probe → group over a bounded rayon pool.
//!
//! # Quick-hash funnel
//!
//! 1. **Size**: only files sharing a size with another file go further
//! 2. **Partial**: BLAKE3 over head/tail (and optionally middle) windows
//! 3. **Full**: SHA-256 only for files sharing (size, partial digest)
//!
//! Every computed digest and probe result is cached by (path, size, mtime),
//! so unchanged files cost nothing on the next run.
//!
//! # Example
//!
//! ```no_run
//! use mediadupe::config::EngineConfig;
//! use mediadupe::pipeline::Pipeline;
//! use std::path::PathBuf;
//!
//! let pipeline = Pipeline::new(EngineConfig::default());
//! let outcome = pipeline.run(&[PathBuf::from("/media")]).unwrap();
//! println!("{} duplicate groups", outcome.groups.len());
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::Level;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{PipelineError, RunLock, RunOutcome, Stage, StallWatchdog};
use crate::cache::{CacheError, CacheKey, HashCache};
use crate::config::EngineConfig;
use crate::duplicates::{
    choose_winners, parse_criteria, AlignmentMatcher, Criterion, GroupingEngine, GroupingStats,
};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::report::ReportDocument;
use crate::scanner::{
    audio_fingerprint, visual_fingerprint, ContentHasher, FileCatalog, FileRecord, Fingerprint,
    HashError, MediaInfo, MediaProbe, NullProbe, PartialHash, ProbeConfig,
};

/// File name of the report inside the output root.
pub const REPORT_FILE_NAME: &str = "report.json";

/// Cached result of probing one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProbeOutcome {
    settings: ProbeConfig,
    media: Option<MediaInfo>,
    audio: Option<Fingerprint>,
    visual: Option<Fingerprint>,
}

/// Build the worker pool, falling back to the global pool on failure.
fn build_pool(threads: usize) -> Option<ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("mediadupe-worker-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::warn!(
                "Failed to create worker pool ({}), using global pool with {} threads",
                e,
                rayon::current_num_threads()
            );
            None
        }
    }
}

fn install<R: Send>(pool: Option<&ThreadPool>, op: impl FnOnce() -> R + Send) -> R {
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

/// Per-run state shared by the stages.
struct RunState {
    lock: RunLock,
    watchdog: Arc<StallWatchdog>,
    pool: Option<ThreadPool>,
    errors: usize,
}

/// Drives a full run.
pub struct Pipeline {
    config: EngineConfig,
    probe: Arc<dyn MediaProbe>,
    reporter: Arc<dyn ProgressReporter>,
    cache: Option<Arc<HashCache>>,
    shutdown_flag: Arc<AtomicBool>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("probe", &self.probe.name())
            .field("cache", &self.cache.as_ref().map(|c| c.root().to_path_buf()))
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline with no probe, no cache and a silent reporter.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            probe: Arc::new(NullProbe),
            reporter: Arc::new(NoopReporter),
            cache: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `probe` for metadata and fingerprints.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Send progress events to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use an already opened cache.
    #[must_use]
    pub fn with_cache(mut self, cache: HashCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Open the cache described by the configuration, if enabled.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache root cannot be resolved or created.
    pub fn with_configured_cache(mut self) -> Result<Self, CacheError> {
        let cache_config = &self.config.cache;
        if cache_config.enabled {
            let root = cache_config.resolved_root()?;
            let ttl = cache_config.ttl_seconds.map(std::time::Duration::from_secs);
            log::debug!("Using hash cache at {}", root.display());
            self.cache = Some(Arc::new(HashCache::open(root, ttl)?));
        }
        Ok(self)
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = flag;
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    fn check_interrupt(&self) -> Result<(), PipelineError> {
        if self.is_shutdown_requested() {
            self.emit(Level::Warn, "Interrupted; run lock left in place");
            return Err(PipelineError::Interrupted);
        }
        Ok(())
    }

    /// Log to both the `log` facade and the reporter.
    fn emit(&self, level: Level, message: &str) {
        log::log!(level, "{}", message);
        self.reporter.log(level, message);
    }

    /// Run the configured stages over `roots`.
    ///
    /// Criteria, patterns and roots are checked before the run lock is
    /// taken. Any later failure other than an interrupt releases the lock.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Lock`] if another run holds a fresh lock
    /// - [`PipelineError::Scan`] if a root is missing or not a directory
    /// - [`PipelineError::Interrupted`] if a shutdown was requested; the
    ///   run lock is left in place
    /// - [`PipelineError::Report`] if the report cannot be written
    pub fn run(&self, roots: &[PathBuf]) -> Result<RunOutcome, PipelineError> {
        let criteria = parse_criteria(&self.config.winner.criteria)?;
        FileCatalog::new(self.config.catalog.clone()).validate(roots)?;
        let pipeline = &self.config.pipeline;

        let lock = RunLock::acquire(
            &pipeline.output_root,
            pipeline.stale_after(),
            pipeline.resume,
        )?;
        let watchdog = Arc::new(StallWatchdog::new(pipeline.stall_timeout()));
        let _watchdog_guard = watchdog.spawn(pipeline.watchdog_tick(), Arc::clone(&self.reporter));
        let workers = pipeline.worker_count();
        log::debug!("Using {} worker thread(s)", workers);

        let mut state = RunState {
            lock,
            watchdog,
            pool: build_pool(workers),
            errors: 0,
        };

        match self.run_stages(roots, &criteria, &mut state) {
            Ok(outcome) => {
                state.lock.release()?;
                Ok(outcome)
            }
            Err(PipelineError::Interrupted) => Err(PipelineError::Interrupted),
            Err(err) => {
                if let Err(release_err) = state.lock.release() {
                    log::warn!("Could not release run lock: {}", release_err);
                }
                Err(err)
            }
        }
    }

    fn run_stages(
        &self,
        roots: &[PathBuf],
        criteria: &[Criterion],
        state: &mut RunState,
    ) -> Result<RunOutcome, PipelineError> {
        let pipeline = &self.config.pipeline;
        let (mut records, total_discovered) = self.discover(roots, state)?;

        if pipeline.runs(Stage::QuickHash) {
            self.quick_hash(&mut records, state)?;
        }
        if pipeline.runs(Stage::Probe) {
            self.probe_all(&mut records, state)?;
        }

        let (groups, stats, report, report_path) = if pipeline.runs(Stage::Group) {
            let (groups, stats) = self.group(&records, criteria, state)?;
            let report = ReportDocument::from_groups(&groups);
            let path = report_path(&pipeline.output_root);
            report.save(&path)?;
            self.emit(
                Level::Info,
                &format!(
                    "{} group(s), {} loser(s), {} reclaimable",
                    report.summary.groups,
                    report.summary.losers,
                    bytesize::ByteSize::b(report.summary.size_bytes)
                ),
            );
            (groups, stats, Some(report), Some(path))
        } else {
            (
                Vec::new(),
                GroupingStats {
                    total_records: records.len(),
                    ..Default::default()
                },
                None,
                None,
            )
        };

        Ok(RunOutcome {
            records,
            groups,
            report,
            report_path,
            stats,
            total_discovered,
            errors: state.errors,
        })
    }

    fn begin(&self, stage: Stage, total: usize, state: &mut RunState) -> Result<(), PipelineError> {
        self.check_interrupt()?;
        state.lock.heartbeat(stage)?;
        state.watchdog.enter(stage);
        self.reporter.stage_start(stage, total);
        log::debug!("Stage {} started ({} items)", stage, total);
        Ok(())
    }

    fn finish(&self, stage: Stage, state: &RunState) {
        state.watchdog.idle();
        self.reporter.stage_end(stage);
    }

    fn discover(
        &self,
        roots: &[PathBuf],
        state: &mut RunState,
    ) -> Result<(Vec<FileRecord>, usize), PipelineError> {
        self.begin(Stage::Discover, 0, state)?;
        let catalog = FileCatalog::new(self.config.catalog.clone())
            .with_shutdown_flag(Arc::clone(&self.shutdown_flag));
        let discovery = catalog.discover(roots)?;
        self.check_interrupt()?;

        for error in &discovery.errors {
            log::warn!("{}", error);
        }
        if !discovery.errors.is_empty() {
            self.reporter
                .increment("scan_errors", discovery.errors.len() as u64);
            state.errors += discovery.errors.len();
        }

        if discovery.sampled {
            self.emit(
                Level::Info,
                &format!(
                    "Sampling: {} of {} files",
                    discovery.records.len(),
                    discovery.total_discovered
                ),
            );
        }
        self.reporter.files_total(discovery.records.len());
        self.emit(
            Level::Info,
            &format!(
                "Discovered {} file(s) under {} root(s)",
                discovery.records.len(),
                roots.len()
            ),
        );
        self.finish(Stage::Discover, state);
        Ok((discovery.records, discovery.total_discovered))
    }

    /// Look `rec` up in the cache under `namespace`, computing and storing
    /// it on a miss. Cache failures are logged and otherwise ignored.
    fn cached<T, E>(
        &self,
        namespace: &str,
        rec: &FileRecord,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
    {
        self.cached_if(namespace, rec, |_| true, compute)
    }

    /// Like [`cached`](Self::cached), but a cached value failing `valid`
    /// counts as a miss and is overwritten.
    fn cached_if<T, E>(
        &self,
        namespace: &str,
        rec: &FileRecord,
        valid: impl Fn(&T) -> bool,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
    {
        let Some(cache) = &self.cache else {
            return compute();
        };
        let key = CacheKey::for_file(namespace, &rec.path, rec.size, rec.modified);
        if let Some(value) = cache.get_json::<T>(&key).filter(|v| valid(v)) {
            log::trace!("Cache hit ({}): {}", namespace, rec.path.display());
            self.reporter.increment("cache_hits", 1);
            return Ok(value);
        }
        self.reporter.increment("cache_misses", 1);
        let value = compute()?;
        if let Err(e) = cache.put_json(&key, &value) {
            log::warn!("Failed to update cache for {}: {}", rec.path.display(), e);
        }
        Ok(value)
    }

    /// Hash `targets` in parallel, returning results in target order.
    fn hash_many<T: Send>(
        &self,
        stage_progress: Option<(Stage, &AtomicUsize)>,
        targets: &[usize],
        records: &[FileRecord],
        state: &RunState,
        op: impl Fn(&FileRecord) -> Result<T, HashError> + Sync,
    ) -> Vec<(usize, Result<T, HashError>)> {
        let watchdog = &state.watchdog;
        install(state.pool.as_ref(), || {
            targets
                .par_iter()
                .map(|&i| {
                    let rec = &records[i];
                    if self.is_shutdown_requested() {
                        return (i, Err(HashError::Interrupted(rec.path.clone())));
                    }
                    let result = op(rec);
                    watchdog.touch();
                    if let Some((stage, counter)) = stage_progress {
                        let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
                        self.reporter.advance(stage, done, &rec.path);
                    }
                    (i, result)
                })
                .collect()
        })
    }

    fn absorb_hash_errors<T>(
        &self,
        results: Vec<(usize, Result<T, HashError>)>,
        state: &mut RunState,
        mut assign: impl FnMut(usize, T),
    ) {
        let mut failed = 0u64;
        for (i, result) in results {
            match result {
                Ok(value) => assign(i, value),
                Err(HashError::Interrupted(_)) => {}
                Err(e) => {
                    log::warn!("{}", e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            self.reporter.increment("hash_errors", failed);
            state.errors += failed as usize;
        }
    }

    fn quick_hash(
        &self,
        records: &mut [FileRecord],
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        let mut by_size: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, rec) in records.iter().enumerate() {
            if rec.size > 0 {
                by_size.entry(rec.size).or_default().push(i);
            }
        }
        let candidates: Vec<usize> = by_size
            .into_values()
            .filter(|members| members.len() > 1)
            .flatten()
            .collect();

        self.begin(Stage::QuickHash, candidates.len(), state)?;
        let hasher = ContentHasher::new(self.config.hashing.clone())
            .with_shutdown_flag(Arc::clone(&self.shutdown_flag));
        let windows = hasher.config();
        let partial_ns = format!(
            "partial-{}-{}-{}",
            windows.head_bytes, windows.tail_bytes, windows.mid_bytes
        );

        let done = AtomicUsize::new(0);
        let partials = self.hash_many(
            Some((Stage::QuickHash, &done)),
            &candidates,
            records,
            state,
            |rec| self.cached::<PartialHash, _>(&partial_ns, rec, || hasher.partial(&rec.path)),
        );
        self.absorb_hash_errors(partials, state, |i, partial| {
            records[i].partial_hash = Some(partial);
        });
        self.check_interrupt()?;

        let mut by_partial: BTreeMap<(u64, String), Vec<usize>> = BTreeMap::new();
        for &i in &candidates {
            if let Some(partial) = &records[i].partial_hash {
                by_partial
                    .entry((records[i].size, partial.signature()))
                    .or_default()
                    .push(i);
            }
        }
        let mut full_targets: Vec<usize> = by_partial
            .into_values()
            .filter(|members| members.len() > 1)
            .flatten()
            .collect();
        full_targets.sort_unstable();

        let fulls = self.hash_many(None, &full_targets, records, state, |rec| {
            self.cached::<String, _>("sha256", rec, || hasher.full(&rec.path))
        });
        self.reporter
            .increment("full_hashes", fulls.iter().filter(|(_, r)| r.is_ok()).count() as u64);
        self.absorb_hash_errors(fulls, state, |i, digest| {
            records[i].full_hash = Some(digest);
        });
        self.check_interrupt()?;

        self.emit(
            Level::Info,
            &format!(
                "Quick-hash: {} size match(es), {} partial match(es) fully hashed",
                candidates.len(),
                full_targets.len()
            ),
        );
        self.finish(Stage::QuickHash, state);
        Ok(())
    }

    fn probe_one(&self, rec: &FileRecord, settings: &ProbeConfig) -> ProbeOutcome {
        let probe = self.probe.as_ref();
        let media = probe.probe(&rec.path).filter(|m| !m.is_empty());
        let audio = if settings.audio {
            audio_fingerprint(probe, &rec.path, media.as_ref(), &settings.audio_params)
        } else {
            None
        };
        let visual = if settings.visual {
            visual_fingerprint(probe, &rec.path, settings.frame_count)
        } else {
            None
        };
        ProbeOutcome {
            settings: settings.clone(),
            media,
            audio,
            visual,
        }
    }

    fn probe_all(
        &self,
        records: &mut [FileRecord],
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        self.begin(Stage::Probe, records.len(), state)?;
        let settings = &self.config.probe;
        let namespace = format!("probe-{}", self.probe.name());
        let done = AtomicUsize::new(0);
        let watchdog = &state.watchdog;

        let outcomes: Vec<Option<ProbeOutcome>> = {
            let records: &[FileRecord] = records;
            install(state.pool.as_ref(), || {
                records
                    .par_iter()
                    .map(|rec| {
                        if self.is_shutdown_requested() {
                            return None;
                        }
                        let outcome = match self.cached_if::<_, std::convert::Infallible>(
                            &namespace,
                            rec,
                            |o: &ProbeOutcome| &o.settings == settings,
                            || Ok(self.probe_one(rec, settings)),
                        ) {
                            Ok(outcome) => outcome,
                            Err(never) => match never {},
                        };
                        watchdog.touch();
                        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                        self.reporter.advance(Stage::Probe, n, &rec.path);
                        Some(outcome)
                    })
                    .collect()
            })
        };
        self.check_interrupt()?;

        let (mut unknown, mut fingerprinted) = (0u64, 0u64);
        for (rec, outcome) in records.iter_mut().zip(outcomes) {
            let Some(outcome) = outcome else { continue };
            if outcome.media.is_none() {
                unknown += 1;
            }
            if outcome.audio.is_some() || outcome.visual.is_some() {
                fingerprinted += 1;
            }
            rec.media = outcome.media;
            rec.audio = outcome.audio;
            rec.visual = outcome.visual;
        }
        self.reporter.increment("probe_unknown", unknown);
        self.reporter.increment("fingerprinted", fingerprinted);
        self.emit(
            Level::Info,
            &format!(
                "Probe ({}): {} file(s), {} fingerprinted, {} without metadata",
                self.probe.name(),
                records.len(),
                fingerprinted,
                unknown
            ),
        );
        self.finish(Stage::Probe, state);
        Ok(())
    }

    fn group(
        &self,
        records: &[FileRecord],
        criteria: &[Criterion],
        state: &mut RunState,
    ) -> Result<(Vec<crate::duplicates::DuplicateGroup>, GroupingStats), PipelineError> {
        self.begin(Stage::Group, records.len(), state)?;
        let engine = GroupingEngine::new(
            self.config.grouping.clone(),
            self.config.scoring.clone(),
            AlignmentMatcher::new(self.config.alignment.clone()),
        )
        .with_reporter(Arc::clone(&self.reporter))
        .with_heartbeat({
            let watchdog = Arc::clone(&state.watchdog);
            Arc::new(move || watchdog.touch())
        });

        let (clusters, stats) = install(state.pool.as_ref(), || engine.group(records));
        self.check_interrupt()?;

        let groups = choose_winners(clusters, records, criteria);
        if stats.low_confidence > 0 {
            self.emit(
                Level::Debug,
                &format!("{} low-confidence pair score(s)", stats.low_confidence),
            );
        }
        self.finish(Stage::Group, state);
        Ok((groups, stats))
    }
}

/// Path of the report a run with `output_root` writes.
#[must_use]
pub fn report_path(output_root: &Path) -> PathBuf {
    output_root.join(REPORT_FILE_NAME)
}

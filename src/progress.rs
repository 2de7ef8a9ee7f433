//! Progress reporting for the pipeline.
//!
//! The engine never renders anything itself; it emits events through the
//! [`ProgressReporter`] trait. Two implementations ship with the crate:
//!
//! - [`Progress`]: indicatif progress bars for the terminal
//! - [`RecordingReporter`]: in-memory recorder for tests and embedding
//!
//! Every method has a no-op default so reporters only implement what they
//! care about.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::duplicates::{Detector, Penalty, ScoreHistogram};
use crate::pipeline::Stage;

/// Receiver of pipeline events.
///
/// Implementations must be cheap and thread-safe: events arrive from
/// worker threads while a stage is running.
pub trait ProgressReporter: Send + Sync {
    /// A stage started with `total` units of work.
    fn stage_start(&self, _stage: Stage, _total: usize) {}

    /// Unit `current` (1-based) of the running stage was reached.
    fn advance(&self, _stage: Stage, _current: usize, _path: &Path) {}

    /// A stage finished.
    fn stage_end(&self, _stage: Stage) {}

    /// Number of files the run will process (after sampling).
    fn files_total(&self, _total: usize) {}

    /// Increment a named counter.
    fn increment(&self, _counter: &str, _n: u64) {}

    /// A leveled log line.
    fn log(&self, _level: log::Level, _message: &str) {}

    /// The running stage has been idle for `idle`.
    fn stall(&self, _stage: Stage, _idle: Duration) {}

    /// A candidate pair was scored.
    fn score(&self, _detector: Detector, _final_score: f64, _penalties: &BTreeSet<Penalty>) {}
}

/// Reporter that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe in-memory reporter.
///
/// Each field sits behind its own lock so concurrent workers only contend
/// on the counter they touch.
#[derive(Debug)]
pub struct RecordingReporter {
    total_files: Mutex<Option<usize>>,
    logs: Mutex<Vec<(log::Level, String)>>,
    counters: Mutex<BTreeMap<String, u64>>,
    stage_totals: Mutex<BTreeMap<Stage, usize>>,
    stages_ended: Mutex<Vec<Stage>>,
    stalls: Mutex<Vec<(Stage, Duration)>>,
    histogram: Mutex<ScoreHistogram>,
    detector_counts: Mutex<BTreeMap<Detector, u64>>,
    penalty_counts: Mutex<BTreeMap<Penalty, u64>>,
    low_confidence: Mutex<u64>,
    low_confidence_floor: f64,
}

impl RecordingReporter {
    /// Create a recorder counting scores below 0.5 as low confidence.
    #[must_use]
    pub fn new() -> Self {
        Self::with_low_confidence_floor(0.5)
    }

    /// Create a recorder with a custom low-confidence floor.
    #[must_use]
    pub fn with_low_confidence_floor(floor: f64) -> Self {
        Self {
            total_files: Mutex::new(None),
            logs: Mutex::default(),
            counters: Mutex::default(),
            stage_totals: Mutex::default(),
            stages_ended: Mutex::default(),
            stalls: Mutex::default(),
            histogram: Mutex::default(),
            detector_counts: Mutex::default(),
            penalty_counts: Mutex::default(),
            low_confidence: Mutex::new(0),
            low_confidence_floor: floor,
        }
    }

    /// Total announced through [`ProgressReporter::files_total`].
    #[must_use]
    pub fn total_files(&self) -> Option<usize> {
        *guard(&self.total_files)
    }

    /// Every log line received, in order.
    #[must_use]
    pub fn logs(&self) -> Vec<(log::Level, String)> {
        guard(&self.logs).clone()
    }

    /// Whether any log line contains `needle`.
    #[must_use]
    pub fn has_log_containing(&self, needle: &str) -> bool {
        guard(&self.logs).iter().any(|(_, m)| m.contains(needle))
    }

    /// Current value of a counter (0 if never incremented).
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        guard(&self.counters).get(name).copied().unwrap_or(0)
    }

    /// Totals announced per stage.
    #[must_use]
    pub fn stage_totals(&self) -> BTreeMap<Stage, usize> {
        guard(&self.stage_totals).clone()
    }

    /// Stages that ended, in order.
    #[must_use]
    pub fn stages_ended(&self) -> Vec<Stage> {
        guard(&self.stages_ended).clone()
    }

    /// Stall warnings received.
    #[must_use]
    pub fn stall_warnings(&self) -> Vec<(Stage, Duration)> {
        guard(&self.stalls).clone()
    }

    /// Histogram of received scores.
    #[must_use]
    pub fn histogram(&self) -> ScoreHistogram {
        *guard(&self.histogram)
    }

    /// Scores received per detector.
    #[must_use]
    pub fn detector_counts(&self) -> BTreeMap<Detector, u64> {
        guard(&self.detector_counts).clone()
    }

    /// Occurrences of each penalty tag.
    #[must_use]
    pub fn penalty_counts(&self) -> BTreeMap<Penalty, u64> {
        guard(&self.penalty_counts).clone()
    }

    /// Scores below the low-confidence floor.
    #[must_use]
    pub fn low_confidence(&self) -> u64 {
        *guard(&self.low_confidence)
    }
}

impl Default for RecordingReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for RecordingReporter {
    fn stage_start(&self, stage: Stage, total: usize) {
        guard(&self.stage_totals).insert(stage, total);
    }

    fn stage_end(&self, stage: Stage) {
        guard(&self.stages_ended).push(stage);
    }

    fn files_total(&self, total: usize) {
        *guard(&self.total_files) = Some(total);
    }

    fn increment(&self, counter: &str, n: u64) {
        *guard(&self.counters).entry(counter.to_string()).or_insert(0) += n;
    }

    fn log(&self, level: log::Level, message: &str) {
        guard(&self.logs).push((level, message.to_string()));
    }

    fn stall(&self, stage: Stage, idle: Duration) {
        guard(&self.stalls).push((stage, idle));
    }

    fn score(&self, detector: Detector, final_score: f64, penalties: &BTreeSet<Penalty>) {
        guard(&self.histogram).record(final_score);
        *guard(&self.detector_counts).entry(detector).or_insert(0) += 1;
        {
            let mut counts = guard(&self.penalty_counts);
            for penalty in penalties {
                *counts.entry(*penalty).or_insert(0) += 1;
            }
        }
        if final_score < self.low_confidence_floor {
            *guard(&self.low_confidence) += 1;
        }
    }
}

/// Terminal progress reporter using indicatif.
///
/// Discovery shows a spinner; per-file stages show a bar. Log lines and
/// stall warnings are printed above the bars so they are not overwritten.
pub struct Progress {
    multi: MultiProgress,
    active: Mutex<Option<(Stage, ProgressBar)>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, nothing is rendered.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadupe::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            active: Mutex::new(None),
            quiet,
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }
}

impl ProgressReporter for Progress {
    fn stage_start(&self, stage: Stage, total: usize) {
        if self.quiet {
            return;
        }

        let pb = if stage == Stage::Discover {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(Self::spinner_style());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            let pb = self.multi.add(ProgressBar::new(total as u64));
            pb.set_style(Self::bar_style());
            pb
        };
        pb.set_message(stage.label());

        if let Some((_, previous)) = guard(&self.active).replace((stage, pb)) {
            previous.finish_and_clear();
        }
    }

    fn advance(&self, stage: Stage, current: usize, path: &Path) {
        if self.quiet {
            return;
        }

        if let Some((active, pb)) = guard(&self.active).as_ref() {
            if *active == stage {
                pb.set_position(current as u64);
                pb.set_message(format!(
                    "{}: {}",
                    stage.label(),
                    truncate_path(&path.to_string_lossy(), 30)
                ));
            }
        }
    }

    fn stage_end(&self, stage: Stage) {
        if self.quiet {
            return;
        }

        let mut active = guard(&self.active);
        if active.as_ref().is_some_and(|(s, _)| *s == stage) {
            if let Some((_, pb)) = active.take() {
                pb.finish_with_message(format!("{} complete", stage.label()));
            }
        }
    }

    fn log(&self, level: log::Level, message: &str) {
        if self.quiet || level > log::Level::Info {
            return;
        }
        let _ = self.multi.println(message);
    }

    fn stall(&self, stage: Stage, idle: Duration) {
        if self.quiet {
            return;
        }
        let _ = self.multi.println(format!(
            "Warning: {} has made no progress for {}s",
            stage.label(),
            idle.as_secs()
        ));
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        return path.to_string();
    }

    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if file_name.len() >= max_len {
        let tail: String = file_name
            .chars()
            .rev()
            .take(max_len.saturating_sub(3))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return format!("...{}", tail);
    }

    format!(".../{}", file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_counters() {
        let reporter = RecordingReporter::new();
        reporter.increment("hashed", 2);
        reporter.increment("hashed", 3);
        assert_eq!(reporter.counter("hashed"), 5);
        assert_eq!(reporter.counter("missing"), 0);
    }

    #[test]
    fn test_recording_reporter_logs_and_totals() {
        let reporter = RecordingReporter::new();
        assert_eq!(reporter.total_files(), None);
        reporter.files_total(4);
        reporter.log(log::Level::Info, "Sampling: 4 of 10 files");
        reporter.stage_start(Stage::QuickHash, 4);
        reporter.stage_end(Stage::QuickHash);

        assert_eq!(reporter.total_files(), Some(4));
        assert!(reporter.has_log_containing("Sampling"));
        assert!(!reporter.has_log_containing("Grouping"));
        assert_eq!(reporter.stage_totals().get(&Stage::QuickHash), Some(&4));
        assert_eq!(reporter.stages_ended(), vec![Stage::QuickHash]);
    }

    #[test]
    fn test_recording_reporter_scores() {
        let reporter = RecordingReporter::new();
        reporter.score(Detector::AudioSubset, 0.9, &BTreeSet::new());
        reporter.score(
            Detector::Metadata,
            0.1,
            &BTreeSet::from([Penalty::DurationGap, Penalty::SizeGap]),
        );

        assert_eq!(reporter.histogram().total(), 2);
        assert_eq!(reporter.detector_counts().get(&Detector::AudioSubset), Some(&1));
        assert_eq!(reporter.penalty_counts().get(&Penalty::SizeGap), Some(&1));
        assert_eq!(reporter.low_confidence(), 1);
    }

    #[test]
    fn test_recording_reporter_is_shareable() {
        let reporter = std::sync::Arc::new(RecordingReporter::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                let r = &reporter;
                s.spawn(move || {
                    for _ in 0..100 {
                        r.increment("n", 1);
                    }
                });
            }
        });
        assert_eq!(reporter.counter("n"), 400);
    }

    #[test]
    fn test_quiet_progress_ignores_events() {
        let progress = Progress::new(true);
        progress.stage_start(Stage::Discover, 0);
        progress.advance(Stage::Discover, 1, Path::new("/a"));
        progress.stage_end(Stage::Discover);
        progress.log(log::Level::Info, "hello");
        assert!(guard(&progress.active).is_none());
    }

    #[test]
    fn test_truncate_path() {
        assert_eq!(truncate_path("/short", 30), "/short");
        assert_eq!(
            truncate_path("/very/long/directory/structure/file.mp4", 20),
            ".../file.mp4"
        );
    }
}

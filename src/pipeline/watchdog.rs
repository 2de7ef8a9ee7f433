//! Stall detection for the running stage.
//!
//! Workers call [`StallWatchdog::touch`] after every unit of work. A
//! background thread polls [`StallWatchdog::check`]; the first check that
//! finds the stage idle for longer than the timeout reports a stall, and no
//! further stall is reported until activity resumes. The watchdog only
//! warns, it never stops workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::Stage;
use crate::progress::ProgressReporter;

#[derive(Debug)]
struct Activity {
    stage: Option<Stage>,
    last: Instant,
    warned: bool,
}

/// Tracks time since the last activity in the current stage.
#[derive(Debug)]
pub struct StallWatchdog {
    timeout: Duration,
    activity: Mutex<Activity>,
}

impl StallWatchdog {
    /// Create a watchdog with the given stall timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            activity: Mutex::new(Activity {
                stage: None,
                last: Instant::now(),
                warned: false,
            }),
        }
    }

    fn activity(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a new stage.
    pub fn enter(&self, stage: Stage) {
        self.enter_at(stage, Instant::now());
    }

    /// Start tracking a new stage at an explicit instant.
    pub fn enter_at(&self, stage: Stage, now: Instant) {
        let mut activity = self.activity();
        activity.stage = Some(stage);
        activity.last = now;
        activity.warned = false;
    }

    /// Stop tracking; nothing is reported until the next [`enter`](Self::enter).
    pub fn idle(&self) {
        self.activity().stage = None;
    }

    /// Record activity in the current stage.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    /// Record activity at an explicit instant.
    pub fn touch_at(&self, now: Instant) {
        let mut activity = self.activity();
        activity.last = now;
        activity.warned = false;
    }

    /// Check for a stall.
    ///
    /// # Returns
    ///
    /// The stalled stage and its idle time, at most once per stall episode.
    pub fn check(&self) -> Option<(Stage, Duration)> {
        self.check_at(Instant::now())
    }

    /// Check for a stall at an explicit instant.
    pub fn check_at(&self, now: Instant) -> Option<(Stage, Duration)> {
        let mut activity = self.activity();
        let stage = activity.stage?;
        let idle = now.saturating_duration_since(activity.last);
        if idle > self.timeout && !activity.warned {
            activity.warned = true;
            return Some((stage, idle));
        }
        None
    }

    /// Poll on a background thread until the returned guard is dropped.
    pub fn spawn(
        self: &Arc<Self>,
        tick: Duration,
        reporter: Arc<dyn ProgressReporter>,
    ) -> WatchdogGuard {
        let stop = Arc::new(AtomicBool::new(false));
        let watchdog = Arc::clone(self);
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("stall-watchdog".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    std::thread::sleep(tick);
                    if let Some((stage, idle)) = watchdog.check() {
                        log::warn!(
                            "Stage {} has made no progress for {}s",
                            stage,
                            idle.as_secs()
                        );
                        reporter.stall(stage, idle);
                    }
                }
            });
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                log::warn!("Failed to start stall watchdog: {}", e);
                None
            }
        };
        WatchdogGuard { stop, handle }
    }
}

/// Stops the watchdog thread when dropped.
#[derive(Debug)]
pub struct WatchdogGuard {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

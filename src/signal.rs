//! Ctrl+C handling.
//!
//! A single shared `AtomicBool` is set when the user interrupts. The
//! pipeline checks it between file-level units of work and between stages,
//! then returns [`PipelineError::Interrupted`](crate::pipeline::PipelineError)
//! with the run lock still in place. Cache entries and the report are only
//! ever written atomically, so an interrupt never leaves either half-written.
//!
//! ```rust,no_run
//! use mediadupe::config::EngineConfig;
//! use mediadupe::pipeline::Pipeline;
//! use mediadupe::signal::install_handler;
//!
//! let handler = install_handler().expect("signal handler");
//! let pipeline = Pipeline::new(EngineConfig::default()).with_shutdown_flag(handler.get_flag());
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request a shutdown, as Ctrl+C would.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// The flag to hand to [`Pipeline::with_shutdown_flag`](crate::pipeline::Pipeline::with_shutdown_flag).
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error installing the Ctrl+C hook.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// `ctrlc` refused the handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C hook, once.
///
/// Later calls return the same handler with its flag cleared, so `run_app`
/// can be invoked repeatedly in one process (as the integration tests do).
/// If another hook is already registered, an unhooked handler is returned;
/// it still works for [`ShutdownHandler::request_shutdown`].
///
/// # Errors
///
/// Currently never fails; the `Result` leaves room for platforms where the
/// hook is mandatory.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();
    let hooked = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = writeln!(
            std::io::stderr(),
            "\nInterrupted. Finishing current files; the run lock is kept for --resume."
        );
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
    });

    if let Err(e) = hooked {
        log::debug!("Ctrl+C hook unavailable ({}), using unhooked handler", e);
    }
    let _ = GLOBAL_HANDLER.set(handler);
    let handler = GLOBAL_HANDLER.get().cloned().unwrap_or_default();
    handler.reset();
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_and_reset() {
        let handler = ShutdownHandler::new();
        assert!(!handler.is_shutdown_requested());
        handler.request_shutdown();
        assert!(handler.is_shutdown_requested());
        handler.reset();
        assert!(!handler.is_shutdown_requested());
    }

    #[test]
    fn test_flag_is_shared() {
        let handler = ShutdownHandler::new();
        let flag = handler.get_flag();
        let clone = handler.clone();

        flag.store(true, Ordering::SeqCst);
        assert!(handler.is_shutdown_requested());
        assert!(clone.is_shutdown_requested());
    }

    #[test]
    fn test_install_is_reentrant() {
        let first = install_handler().unwrap();
        first.request_shutdown();
        let second = install_handler().unwrap();
        assert!(!second.is_shutdown_requested());
        assert!(!first.is_shutdown_requested());
    }

    #[test]
    fn test_handler_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShutdownHandler>();
    }
}

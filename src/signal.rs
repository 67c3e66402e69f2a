//! Ctrl+C and SIGTERM.
//!
//! The handler only raises a flag. The rate limiter, the strategy and the
//! drain loop look at it between steps, so a run stops at the next file,
//! archive member or wait slice and still prints what it found.
//!
//! ```rust,no_run
//! use scan_tool::context::RunContext;
//! use scan_tool::signal::install_handler;
//!
//! let shutdown = install_handler().unwrap();
//! let ctx = RunContext::new().with_shutdown_flag(shutdown.flag());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A stop request shared between the signal handler and the run.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared flag, for [`crate::scanner::RateLimiter::with_shutdown_flag`]
    /// and [`crate::context::RunContext::with_shutdown_flag`].
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.requested)
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Ask the run to stop, as Ctrl+C does.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// The signal handler could not be registered.
#[derive(Debug, thiserror::Error)]
#[error("Cannot install the Ctrl+C handler: {0}")]
pub struct SignalError(#[from] ctrlc::Error);

static INSTALLED: OnceLock<ShutdownHandler> = OnceLock::new();

/// Register the process-wide handler on first use.
///
/// Later calls hand out the same flag, cleared, because `ctrlc` allows one
/// handler per process.
///
/// # Errors
///
/// Returns [`SignalError`] if the platform refuses the handler.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(existing) = INSTALLED.get() {
        existing.clear();
        return Ok(existing.clone());
    }

    let shutdown = ShutdownHandler::new();
    let requested = shutdown.flag();
    match ctrlc::set_handler(move || {
        requested.store(true, Ordering::SeqCst);
        eprintln!("\nInterrupted, stopping after the current request...");
    }) {
        Ok(()) => {}
        // Someone else owns the process handler; the flag then only reacts
        // to explicit requests.
        Err(ctrlc::Error::MultipleHandlers) => {
            log::debug!("A Ctrl+C handler is already registered");
        }
        Err(e) => return Err(SignalError(e)),
    }
    Ok(INSTALLED.get_or_init(|| shutdown).clone())
}

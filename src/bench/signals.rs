//! Interrupt handling for long batches.
//!
//! The first SIGINT/SIGTERM only raises a stop flag that the batch driver
//! checks between runs, so the run in progress still produces its record.
//! A second SIGINT exits the process immediately.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Exit status used when a second SIGINT forces termination.
const FORCED_EXIT_CODE: i32 = 130;

/// Stop flag shared between the signal handlers and the batch driver.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stop_flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create the flag and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    #[must_use]
    pub fn install() -> Self {
        let signal = Self::default();
        signal.register_signals();
        signal
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        // Registered before the flag itself so it sees the flag already set
        // on the second delivery.
        if let Err(e) = signal_hook::flag::register_conditional_shutdown(
            SIGINT,
            FORCED_EXIT_CODE,
            Arc::clone(&self.stop_flag),
        ) {
            eprintln!("[BGPERF-BATCH] failed to register forced SIGINT exit: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.stop_flag)) {
            eprintln!("[BGPERF-BATCH] failed to register SIGINT: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.stop_flag)) {
            eprintln!("[BGPERF-BATCH] failed to register SIGTERM: {e}");
        }
    }
}

//! Sample producers: independent polling threads that feed the sample queue.
//!
//! Every producer receives a [`CancellationToken`] at creation and checks it
//! at the top of each iteration. Cancellation is cooperative: a producer
//! finishes its current blocking call before it notices. The run lifecycle
//! owns the token and never waits for producers before reporting.

#![allow(missing_docs)]

pub mod controller;
pub mod peer;
pub mod target;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::errors::{BenchError, Result};

/// Granularity of cancellable sleeps.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

// ──────────────────── cancellation ────────────────────

/// Shared one-way stop flag for all producers of a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns `false` when the token was cancelled.
    pub fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }
}

// ──────────────────── producer set ────────────────────

/// Named producer threads sharing one token.
#[derive(Debug)]
pub struct ProducerSet {
    token: CancellationToken,
    handles: Vec<(String, thread::JoinHandle<()>)>,
}

impl ProducerSet {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            handles: Vec::new(),
        }
    }

    /// Spawn `body` on a thread named `bgperf-{name}`.
    pub fn spawn<F>(&mut self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = self.token.clone();
        let handle = thread::Builder::new()
            .name(format!("bgperf-{name}"))
            .spawn(move || body(token))
            .map_err(|e| BenchError::Runtime {
                details: format!("failed to spawn {name} producer: {e}"),
            })?;
        self.handles.push((name.to_string(), handle));
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every producer to stop. Does not wait.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for every producer. Returns the names of producers that panicked.
    pub fn join_all(self) -> Vec<String> {
        self.token.cancel();
        self.handles
            .into_iter()
            .filter_map(|(name, handle)| handle.join().is_err().then_some(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pause_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        assert!(token.pause(Duration::from_millis(10)));
    }

    #[test]
    fn pause_returns_early_on_cancel() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let started = Instant::now();
        assert!(!token.pause(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn producers_stop_after_cancel() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut set = ProducerSet::new(CancellationToken::new());
        for name in ["a", "b"] {
            let ticks = Arc::clone(&ticks);
            set.spawn(name, move |token| {
                while !token.is_cancelled() {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    token.pause(Duration::from_millis(5));
                }
            })
            .unwrap();
        }
        assert_eq!(set.len(), 2);
        thread::sleep(Duration::from_millis(30));
        set.cancel();
        assert!(set.join_all().is_empty());
        assert!(ticks.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn panicking_producer_is_reported() {
        let mut set = ProducerSet::new(CancellationToken::new());
        set.spawn("boom", |_| panic!("producer failure")).unwrap();
        assert_eq!(set.join_all(), vec!["boom".to_string()]);
    }
}

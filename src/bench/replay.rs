//! Offline replay of a recorded sample stream through a fresh convergence monitor.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::core::errors::{BenchError, Result};
use crate::monitor::convergence::{BenchmarkState, ConvergenceMonitor, RunOutcome, Thresholds};
use crate::monitor::sample::Sample;

/// Parameters a recorded stream does not carry.
#[derive(Debug, Clone, Copy)]
pub struct ReplayParams {
    pub required: u64,
    pub neighbors: usize,
    pub remote: bool,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayResult {
    /// `None` when the stream ended before a terminal state.
    pub outcome: Option<RunOutcome>,
    pub state: BenchmarkState,
    pub samples_read: usize,
    /// Samples observed up to and including the terminal one.
    pub samples_consumed: usize,
    pub heartbeats: usize,
}

/// Parse a `--record` file: one JSON sample per line, blank lines ignored.
pub fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let file = File::open(path).map_err(|source| BenchError::io(path, source))?;
    let mut samples = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| BenchError::io(path, source))?;
        if line.trim().is_empty() {
            continue;
        }
        let sample = serde_json::from_str(&line).map_err(|err| BenchError::SampleParse {
            context: "replay",
            details: format!("line {}: {err}", index + 1),
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Feed `samples` in order; the earliest timestamp is the run start.
#[must_use]
pub fn replay(samples: &[Sample], params: ReplayParams) -> ReplayResult {
    let start = samples
        .iter()
        .map(|s| s.timestamp)
        .min()
        .unwrap_or_else(chrono::Utc::now);
    let mut monitor = ConvergenceMonitor::new(
        start,
        params.required,
        params.neighbors,
        params.remote,
        params.thresholds,
    );
    let mut consumed = 0;
    for sample in samples {
        consumed += 1;
        if monitor.observe(sample).outcome.is_some() {
            break;
        }
    }
    let heartbeats = monitor.series().len();
    let (state, _, outcome) = monitor.into_parts();
    ReplayResult {
        outcome,
        state,
        samples_read: samples.len(),
        samples_consumed: consumed,
        heartbeats,
    }
}

pub fn replay_file(path: &Path, params: ReplayParams) -> Result<ReplayResult> {
    Ok(replay(&read_samples(path)?, params))
}

//! Convergence state machine: classifies every dequeued sample and decides
//! whether a run has converged, stalled or regressed.
//!
//! The monitor is the single writer of [`BenchmarkState`]. Producers only
//! ever reach it through the sample queue, so no locking is involved.
//!
//! Rules applied per sample, in order:
//! - target samples (skipped for remote targets) update the neighbor count
//!   and latch, or the CPU/memory maxima;
//! - controller samples update the idle/free minima;
//! - monitor samples are the heartbeat: regression and stall streaks, the
//!   neighbor-progress reset, first-route time, the success latches and
//!   periodic snapshots;
//! - the stall streak is checked after every sample regardless of source.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::ThresholdConfig;
use crate::core::errors::Result;
use crate::monitor::queue::SampleReceiver;
use crate::monitor::sample::{Payload, Sample, SampleSource};
use crate::monitor::series::{SeriesRow, TimeSeries};

/// Initial `min_free`; any real reading replaces it.
pub const MIN_FREE_SENTINEL: u64 = 1_000_000_000_000_000;
/// Initial `min_idle`.
pub const MIN_IDLE_SENTINEL: f64 = 100.0;

// ──────────────────── thresholds ────────────────────

/// Failure-detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub stall_samples: u64,
    pub regression_samples: u64,
    pub regression_drop_ratio: f64,
    pub snapshot_interval_secs: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&ThresholdConfig::default())
    }
}

impl From<&ThresholdConfig> for Thresholds {
    fn from(cfg: &ThresholdConfig) -> Self {
        Self {
            stall_samples: cfg.stall_samples,
            regression_samples: cfg.regression_samples,
            regression_drop_ratio: cfg.regression_drop_ratio,
            snapshot_interval_secs: cfg.snapshot_interval_secs.max(1),
        }
    }
}

// ──────────────────── outcome ────────────────────

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Running,
    Success,
    Stalled,
    Regressed,
}

impl RunPhase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Terminal classification of a run. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Stalled { message: String },
    Regressed { message: String },
}

impl RunOutcome {
    #[must_use]
    pub const fn phase(&self) -> RunPhase {
        match self {
            Self::Success => RunPhase::Success,
            Self::Stalled { .. } => RunPhase::Stalled,
            Self::Regressed { .. } => RunPhase::Regressed,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Success)
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Stalled { message } | Self::Regressed { message } => Some(message),
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Stalled { .. } => "stalled",
            Self::Regressed { .. } => "regressed",
        }
    }
}

// ──────────────────── state ────────────────────

/// Running metrics of one benchmark. Written only by [`ConvergenceMonitor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkState {
    pub max_cpu: f64,
    pub max_mem: u64,
    pub min_idle: f64,
    pub min_free: u64,
    /// Latest readings, carried into heartbeat rows.
    pub cpu: f64,
    pub mem: u64,
    pub idle: f64,
    pub free: u64,
    pub required: u64,
    pub recved: u64,
    pub neighbors_checked_count: usize,
    pub first_received_time: Option<Duration>,
    pub last_recved: u64,
    pub last_recved_count: u64,
    pub less_last_received: u64,
    pub last_neighbors_checked: usize,
    pub elapsed: Duration,
    /// Monitor has reported all testers checked at least once.
    pub recved_checkpoint: bool,
    /// Every configured neighbor has been checked at least once.
    pub neighbors_checkpoint: bool,
}

impl BenchmarkState {
    #[must_use]
    pub const fn new(required: u64) -> Self {
        Self {
            max_cpu: 0.0,
            max_mem: 0,
            min_idle: MIN_IDLE_SENTINEL,
            min_free: MIN_FREE_SENTINEL,
            cpu: 0.0,
            mem: 0,
            idle: 0.0,
            free: 0,
            required,
            recved: 0,
            neighbors_checked_count: 0,
            first_received_time: None,
            last_recved: 0,
            last_recved_count: 0,
            less_last_received: 0,
            last_neighbors_checked: 0,
            elapsed: Duration::ZERO,
            recved_checkpoint: false,
            neighbors_checkpoint: false,
        }
    }

    /// Seconds between the first received route and the last heartbeat.
    #[must_use]
    pub fn reception_secs(&self) -> u64 {
        let first = self.first_received_time.unwrap_or(Duration::ZERO);
        self.elapsed.as_secs().saturating_sub(first.as_secs())
    }
}

/// What one sample did to the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Set once the run reached a terminal state.
    pub outcome: Option<RunOutcome>,
    /// Row appended to the time series (monitor samples only).
    pub heartbeat: Option<SeriesRow>,
    /// Elapsed time crossed a snapshot boundary.
    pub snapshot_due: bool,
}

impl Observation {
    const fn quiet() -> Self {
        Self {
            outcome: None,
            heartbeat: None,
            snapshot_due: false,
        }
    }
}

// ──────────────────── monitor ────────────────────

/// Single-consumer classifier for one benchmark run.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    start: DateTime<Utc>,
    total_neighbors: usize,
    remote: bool,
    thresholds: Thresholds,
    state: BenchmarkState,
    series: TimeSeries,
    outcome: Option<RunOutcome>,
    snapshot_bucket: u64,
}

impl ConvergenceMonitor {
    /// Remote runs have no target samplers, so the neighbor axis starts latched.
    #[must_use]
    pub fn new(
        start: DateTime<Utc>,
        required: u64,
        total_neighbors: usize,
        remote: bool,
        thresholds: Thresholds,
    ) -> Self {
        let mut state = BenchmarkState::new(required);
        state.neighbors_checkpoint = remote || total_neighbors == 0;
        Self {
            start,
            total_neighbors,
            remote,
            thresholds,
            state,
            series: TimeSeries::new(),
            outcome: None,
            snapshot_bucket: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &BenchmarkState {
        &self.state
    }

    #[must_use]
    pub const fn series(&self) -> &TimeSeries {
        &self.series
    }

    #[must_use]
    pub const fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.outcome.as_ref().map_or(RunPhase::Running, RunOutcome::phase)
    }

    /// Consume the monitor once it is no longer needed.
    #[must_use]
    pub fn into_parts(self) -> (BenchmarkState, TimeSeries, Option<RunOutcome>) {
        (self.state, self.series, self.outcome)
    }

    /// Apply one sample. After a terminal state the frozen outcome is
    /// returned and the state is left untouched.
    pub fn observe(&mut self, sample: &Sample) -> Observation {
        if let Some(outcome) = &self.outcome {
            return Observation {
                outcome: Some(outcome.clone()),
                ..Observation::quiet()
            };
        }

        let mut observation = Observation::quiet();
        match (sample.source, &sample.payload) {
            (SampleSource::Target, Payload::Neighbors { neighbors_checked }) if !self.remote => {
                self.observe_neighbors(neighbors_checked);
            }
            (
                SampleSource::Target,
                Payload::Resource {
                    cpu_percent,
                    mem_bytes,
                },
            ) if !self.remote => self.observe_resource(*cpu_percent, *mem_bytes),
            (SampleSource::Controller, Payload::Idle { idle_percent }) => {
                self.state.idle = *idle_percent;
                if *idle_percent < self.state.min_idle {
                    self.state.min_idle = *idle_percent;
                }
            }
            (SampleSource::Controller, Payload::FreeMemory { free_bytes }) => {
                self.state.free = *free_bytes;
                if *free_bytes < self.state.min_free {
                    self.state.min_free = *free_bytes;
                }
            }
            (
                SampleSource::Monitor,
                Payload::Routes {
                    accepted_count,
                    all_testers_checked,
                },
            ) => {
                observation =
                    self.observe_routes(sample.timestamp, *accepted_count, *all_testers_checked);
            }
            // Source/payload mismatches and remote-run target samples are ignored.
            _ => {}
        }

        if self.outcome.is_none() && self.state.last_recved_count >= self.thresholds.stall_samples {
            let message = format!(
                "FAILED: stuck received count {} neighbors_checked {}",
                self.state.recved, self.state.neighbors_checked_count
            );
            self.outcome = Some(RunOutcome::Stalled { message });
        }

        observation.outcome.clone_from(&self.outcome);
        if observation.outcome.is_some() {
            observation.snapshot_due = false;
        }
        observation
    }

    /// Drain the queue until a terminal state, calling `on_sample` after
    /// every observation.
    pub fn run<F>(&mut self, rx: &SampleReceiver, mut on_sample: F) -> Result<RunOutcome>
    where
        F: FnMut(&Self, &Sample, &Observation) -> Result<()>,
    {
        loop {
            let sample = rx.recv()?;
            let observation = self.observe(&sample);
            on_sample(self, &sample, &observation)?;
            if let Some(outcome) = observation.outcome {
                return Ok(outcome);
            }
        }
    }

    fn observe_neighbors(&mut self, neighbors_checked: &BTreeMap<String, bool>) {
        let count = neighbors_checked.values().filter(|checked| **checked).count();
        self.state.neighbors_checked_count = count;
        if self.total_neighbors > 0 && count >= self.total_neighbors {
            self.state.neighbors_checkpoint = true;
        }
    }

    fn observe_resource(&mut self, cpu_percent: f64, mem_bytes: u64) {
        self.state.cpu = cpu_percent;
        self.state.mem = mem_bytes;
        if cpu_percent > self.state.max_cpu {
            self.state.max_cpu = cpu_percent;
        }
        if mem_bytes > self.state.max_mem {
            self.state.max_mem = mem_bytes;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn observe_routes(
        &mut self,
        timestamp: DateTime<Utc>,
        recved: u64,
        all_testers_checked: bool,
    ) -> Observation {
        let thresholds = self.thresholds;
        let state = &mut self.state;
        state.elapsed = (timestamp - self.start).to_std().unwrap_or(Duration::ZERO);
        state.recved = recved;

        if recved < state.last_recved {
            // A drop only counts while the neighbor axis holds still; any
            // change, up or down, restarts the streak. `last_recved` keeps
            // the pre-drop value.
            if state.neighbors_checked_count == state.last_neighbors_checked {
                state.less_last_received += 1;
            } else {
                state.less_last_received = 0;
            }
            let drop = (state.last_recved - recved) as f64 / state.last_recved as f64;
            if state.less_last_received >= thresholds.regression_samples
                && drop > thresholds.regression_drop_ratio
            {
                let message = format!(
                    "FAILED: dropping received count {recved} neighbors_checked {}",
                    state.neighbors_checked_count
                );
                self.outcome = Some(RunOutcome::Regressed { message });
                return Observation::quiet();
            }
        } else if recved == state.last_recved
            && (recved > 0 || state.last_neighbors_checked > 0)
        {
            state.last_recved_count += 1;
            state.less_last_received = 0;
        } else {
            state.last_recved = recved;
            state.last_recved_count = 0;
            state.less_last_received = 0;
        }

        if state.neighbors_checked_count != state.last_neighbors_checked {
            state.last_neighbors_checked = state.neighbors_checked_count;
            state.last_recved_count = 0;
        }

        if recved > 0 && state.first_received_time.is_none() {
            state.first_received_time = Some(state.elapsed);
        }

        let row = SeriesRow {
            elapsed_secs: state.elapsed.as_secs(),
            cpu_percent: state.cpu,
            mem_bytes: state.mem,
            recved,
            neighbors_checked: state.neighbors_checked_count,
            idle_percent: state.idle,
            free_bytes: state.free,
        };
        self.series.push(row);

        if all_testers_checked {
            state.recved_checkpoint = true;
        }
        if state.recved_checkpoint && state.neighbors_checkpoint {
            self.outcome = Some(RunOutcome::Success);
            return Observation {
                heartbeat: Some(row),
                ..Observation::quiet()
            };
        }

        let elapsed_secs = state.elapsed.as_secs();
        let bucket = elapsed_secs / thresholds.snapshot_interval_secs;
        let snapshot_due = elapsed_secs > 1 && bucket > self.snapshot_bucket;
        if snapshot_due {
            self.snapshot_bucket = bucket;
        }

        Observation {
            outcome: None,
            heartbeat: Some(row),
            snapshot_due,
        }
    }
}

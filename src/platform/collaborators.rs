//! Capability traits for the external collaborators of a run, plus scripted
//! in-memory implementations used by tests and dry runs.

#![allow(missing_docs)]

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{BenchError, Result};
use crate::core::scenario::ScenarioPlan;
use crate::monitor::cpu::DockerStats;

// ──────────────────── traits ────────────────────

/// Control-plane queries the convergence machinery needs from a target.
pub trait TargetControl: Send + Sync {
    /// Accepted-route count per neighbor address.
    fn neighbor_accepted(&self) -> Result<BTreeMap<String, u64>>;
    fn version(&self) -> Result<String>;
}

/// Vendor-specific preparation, driven by the run lifecycle only.
pub trait TargetLifecycle: Send + Sync {
    /// Persist the scenario for the target; returns the written path.
    fn write_config(&self, plan: &ScenarioPlan, dir: &Path) -> Result<PathBuf>;
    fn startup(&self) -> Result<()>;
}

/// Monitoring peer's view of its session with the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReading {
    pub accepted: u64,
    pub all_testers_checked: bool,
}

pub trait MonitorControl: Send + Sync {
    fn poll(&self) -> Result<MonitorReading>;
    fn is_established(&self) -> Result<bool>;
}

/// Streaming container resource feed. `None` ends the stream.
pub trait ContainerStatsFeed: Send {
    fn next_stats(&mut self) -> Option<Result<DockerStats>>;
}

/// Tester log inspection, consulted once at termination.
pub trait TesterDiagnostics: Send + Sync {
    fn error_count(&self) -> Result<u64>;
    fn timeout_count(&self) -> Result<u64>;
}

// ──────────────────── scripted implementations ────────────────────

/// Pop the next scripted value, repeating the last one when the script runs dry.
fn next_or_last<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock();
    if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
}

/// Target whose neighbor counts follow a fixed script.
#[derive(Debug)]
pub struct ScriptedTarget {
    accepted: Mutex<VecDeque<BTreeMap<String, u64>>>,
    version: Option<String>,
    startups: AtomicUsize,
}

impl ScriptedTarget {
    /// `version = None` makes the version query fail.
    #[must_use]
    pub fn new(accepted: Vec<BTreeMap<String, u64>>, version: Option<&str>) -> Self {
        Self {
            accepted: Mutex::new(accepted.into()),
            version: version.map(str::to_string),
            startups: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn startups(&self) -> usize {
        self.startups.load(Ordering::Relaxed)
    }
}

impl TargetControl for ScriptedTarget {
    fn neighbor_accepted(&self) -> Result<BTreeMap<String, u64>> {
        Ok(next_or_last(&self.accepted).unwrap_or_default())
    }

    fn version(&self) -> Result<String> {
        self.version
            .clone()
            .ok_or_else(|| BenchError::collaborator("target", "scripted version failure"))
    }
}

impl TargetLifecycle for ScriptedTarget {
    fn write_config(&self, plan: &ScenarioPlan, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("scenario.toml");
        let rendered = toml::to_string(plan)?;
        std::fs::create_dir_all(dir).map_err(|source| BenchError::io(dir, source))?;
        std::fs::write(&path, rendered).map_err(|source| BenchError::io(&path, source))?;
        Ok(path)
    }

    fn startup(&self) -> Result<()> {
        self.startups.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Monitor that replays a list of readings.
#[derive(Debug)]
pub struct ScriptedMonitor {
    readings: Mutex<VecDeque<MonitorReading>>,
    establish_after: usize,
    establish_polls: AtomicUsize,
}

impl ScriptedMonitor {
    #[must_use]
    pub fn new(readings: Vec<MonitorReading>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
            establish_after: 0,
            establish_polls: AtomicUsize::new(0),
        }
    }

    /// Report "not established" for the first `polls` establishment checks.
    #[must_use]
    pub const fn establish_after(mut self, polls: usize) -> Self {
        self.establish_after = polls;
        self
    }
}

impl MonitorControl for ScriptedMonitor {
    fn poll(&self) -> Result<MonitorReading> {
        next_or_last(&self.readings)
            .ok_or_else(|| BenchError::collaborator("monitor", "empty script"))
    }

    fn is_established(&self) -> Result<bool> {
        let seen = self.establish_polls.fetch_add(1, Ordering::Relaxed);
        Ok(seen >= self.establish_after)
    }
}

/// Stats feed backed by a fixed list of documents.
#[derive(Debug, Default)]
pub struct VecStatsFeed {
    docs: VecDeque<DockerStats>,
}

impl VecStatsFeed {
    #[must_use]
    pub fn new(docs: Vec<DockerStats>) -> Self {
        Self { docs: docs.into() }
    }
}

impl ContainerStatsFeed for VecStatsFeed {
    fn next_stats(&mut self) -> Option<Result<DockerStats>> {
        self.docs.pop_front().map(Ok)
    }
}

/// Diagnostics with constant answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDiagnostics {
    pub errors: u64,
    pub timeouts: u64,
}

impl TesterDiagnostics for FixedDiagnostics {
    fn error_count(&self) -> Result<u64> {
        Ok(self.errors)
    }

    fn timeout_count(&self) -> Result<u64> {
        Ok(self.timeouts)
    }
}

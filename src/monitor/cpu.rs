//! Container CPU/memory accounting from Docker stats documents.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// One document of the Docker `/containers/{id}/stats` stream.
///
/// Only the fields used for CPU and memory accounting are modeled; every
/// field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerStats {
    pub cpu_stats: CpuStats,
    pub precpu_stats: CpuStats,
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    pub cpu_usage: CpuUsage,
    pub system_cpu_usage: Option<u64>,
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuUsage {
    pub total_usage: u64,
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStats {
    pub usage: Option<u64>,
}

impl DockerStats {
    /// Cores visible to the container: per-core counters when present (cgroup
    /// v1), else `online_cpus` (cgroup v2 daemons drop `percpu_usage`).
    #[must_use]
    pub fn core_count(&self) -> Option<usize> {
        match &self.cpu_stats.cpu_usage.percpu_usage {
            Some(per_core) if !per_core.is_empty() => Some(per_core.len()),
            _ => self
                .cpu_stats
                .online_cpus
                .filter(|cpus| *cpus > 0)
                .and_then(|cpus| usize::try_from(cpus).ok()),
        }
    }

    /// `(cpu_delta / system_delta) * cores * 100` against the previous reading.
    ///
    /// `None` means the tick carries no per-core breakdown and must be
    /// skipped. Non-positive deltas yield `Some(0.0)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cpu_percent(&self) -> Option<f64> {
        let cores = self.core_count()?;
        let cpu_delta = self.cpu_stats.cpu_usage.total_usage as f64
            - self.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = self.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - self.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        if cpu_delta > 0.0 && system_delta > 0.0 {
            Some(cpu_delta / system_delta * cores as f64 * 100.0)
        } else {
            Some(0.0)
        }
    }

    #[must_use]
    pub fn mem_bytes(&self) -> u64 {
        self.memory_stats.usage.unwrap_or(0)
    }
}

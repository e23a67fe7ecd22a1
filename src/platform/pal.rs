//! Host metrics behind a platform trait (Linux `/proc`, scripted mock).

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{BenchError, Result};

const PROC_STAT: &str = "/proc/stat";
const PROC_MEMINFO: &str = "/proc/meminfo";

/// Aggregate CPU jiffies from the `cpu ` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// Guest time is already folded into user/nice by the kernel.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }
}

/// Percentage of jiffies spent idle between two reads.
///
/// `None` when no time elapsed or the counters went backwards.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn idle_percent_between(before: &CpuTimes, after: &CpuTimes) -> Option<f64> {
    let total = after.total().checked_sub(before.total())?;
    let idle = after.idle.checked_sub(before.idle)?;
    if total == 0 {
        return None;
    }
    Some((idle as f64 * 100.0 / total as f64).clamp(0.0, 100.0))
}

/// Current system memory info.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
}

/// Static host facts recorded with every result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareInfo {
    pub cores: usize,
    pub total_memory_bytes: u64,
}

/// OS abstraction used by the controller samplers and the reporter.
pub trait Platform: Send + Sync {
    fn cpu_times(&self) -> Result<CpuTimes>;
    fn memory_info(&self) -> Result<MemoryInfo>;
    fn hardware_info(&self) -> Result<HardwareInfo>;
}

/// Linux platform implementation reading `/proc`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn cpu_times(&self) -> Result<CpuTimes> {
        let raw =
            fs::read_to_string(PROC_STAT).map_err(|source| BenchError::io(PROC_STAT, source))?;
        parse_proc_stat(&raw)
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        let raw = fs::read_to_string(PROC_MEMINFO)
            .map_err(|source| BenchError::io(PROC_MEMINFO, source))?;
        parse_meminfo(&raw)
    }

    fn hardware_info(&self) -> Result<HardwareInfo> {
        let stat =
            fs::read_to_string(PROC_STAT).map_err(|source| BenchError::io(PROC_STAT, source))?;
        let cores = count_cpu_lines(&stat).max(1);
        Ok(HardwareInfo {
            cores,
            total_memory_bytes: self.memory_info()?.total_bytes,
        })
    }
}

/// Scripted platform for deterministic tests.
///
/// Each call pops the next scripted reading; the last one is repeated once
/// the script runs dry.
#[derive(Debug)]
pub struct MockPlatform {
    cpu: Mutex<VecDeque<CpuTimes>>,
    memory: Mutex<VecDeque<MemoryInfo>>,
    hardware: HardwareInfo,
}

impl MockPlatform {
    #[must_use]
    pub fn new(cpu: Vec<CpuTimes>, memory: Vec<MemoryInfo>, hardware: HardwareInfo) -> Self {
        Self {
            cpu: Mutex::new(cpu.into()),
            memory: Mutex::new(memory.into()),
            hardware,
        }
    }
}

fn next_scripted<T: Copy>(queue: &Mutex<VecDeque<T>>, source_name: &'static str) -> Result<T> {
    let mut queue = queue.lock();
    let value = if queue.len() > 1 { queue.pop_front() } else { queue.front().copied() };
    value.ok_or_else(|| BenchError::HostMetrics {
        source_name,
        details: "mock script is empty".to_string(),
    })
}

impl Platform for MockPlatform {
    fn cpu_times(&self) -> Result<CpuTimes> {
        next_scripted(&self.cpu, "mock cpu")
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        next_scripted(&self.memory, "mock meminfo")
    }

    fn hardware_info(&self) -> Result<HardwareInfo> {
        Ok(self.hardware)
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(BenchError::UnsupportedPlatform {
            details: "host metrics are only implemented for Linux".to_string(),
        })
    }
}

fn parse_proc_stat(raw: &str) -> Result<CpuTimes> {
    let line = raw
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| BenchError::HostMetrics {
            source_name: PROC_STAT,
            details: "missing aggregate cpu line".to_string(),
        })?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|field| {
            field.parse::<u64>().map_err(|err| BenchError::HostMetrics {
                source_name: PROC_STAT,
                details: format!("invalid jiffies value {field:?}: {err}"),
            })
        })
        .collect::<Result<Vec<u64>>>()?;

    if fields.len() < 4 {
        return Err(BenchError::HostMetrics {
            source_name: PROC_STAT,
            details: format!("expected at least 4 cpu fields, got {}", fields.len()),
        });
    }
    let field = |idx: usize| fields.get(idx).copied().unwrap_or(0);
    Ok(CpuTimes {
        user: field(0),
        nice: field(1),
        system: field(2),
        idle: field(3),
        iowait: field(4),
        irq: field(5),
        softirq: field(6),
        steal: field(7),
    })
}

fn count_cpu_lines(raw: &str) -> usize {
    raw.lines()
        .filter(|line| {
            line.strip_prefix("cpu")
                .and_then(|rest| rest.chars().next())
                .is_some_and(|ch| ch.is_ascii_digit())
        })
        .count()
}

fn parse_meminfo(raw: &str) -> Result<MemoryInfo> {
    let mut values = HashMap::<String, u64>::new();

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((key, rest)) = line.split_once(':') else {
            return Err(BenchError::HostMetrics {
                source_name: PROC_MEMINFO,
                details: format!("invalid meminfo line (missing ':'): {line}"),
            });
        };
        let mut parts = rest.split_whitespace();
        let Some(value_raw) = parts.next() else {
            return Err(BenchError::HostMetrics {
                source_name: PROC_MEMINFO,
                details: format!("missing meminfo value in line: {line}"),
            });
        };
        let value = value_raw.parse::<u64>().map_err(|err| BenchError::HostMetrics {
            source_name: PROC_MEMINFO,
            details: format!("invalid meminfo numeric value in line {line:?}: {err}"),
        })?;

        let bytes = match parts.next() {
            None => value,
            Some("kB") => value.saturating_mul(1024),
            Some(unit) => {
                return Err(BenchError::HostMetrics {
                    source_name: PROC_MEMINFO,
                    details: format!("unsupported meminfo unit in line {line:?}: {unit}"),
                });
            }
        };
        values.insert(key.trim().to_string(), bytes);
    }

    let required = |key: &str| {
        values.get(key).copied().ok_or_else(|| BenchError::HostMetrics {
            source_name: PROC_MEMINFO,
            details: format!("missing required meminfo field: {key}"),
        })
    };

    Ok(MemoryInfo {
        total_bytes: required("MemTotal")?,
        free_bytes: required("MemFree")?,
        available_bytes: required("MemAvailable")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  4705 356 584 3699176 23060 0 277 0 0 0\n\
                        cpu0 1393 280 290 925271 5619 0 15 0 0 0\n\
                        cpu1 3312 76 294 2773905 17441 0 262 0 0 0\n\
                        intr 114930548 113199788 3 0 5 263 0 4 [...]\n";

    #[test]
    fn parses_aggregate_cpu_line() {
        let times = parse_proc_stat(STAT).expect("stat should parse");
        assert_eq!(times.user, 4705);
        assert_eq!(times.idle, 3_699_176);
        assert_eq!(times.softirq, 277);
        assert_eq!(times.total(), 4705 + 356 + 584 + 3_699_176 + 23060 + 277);
        assert_eq!(count_cpu_lines(STAT), 2);
    }

    #[test]
    fn rejects_stat_without_aggregate_line() {
        let err = parse_proc_stat("cpu0 1 2 3 4\n").expect_err("no aggregate line");
        assert_eq!(err.code(), "BGP-2001");
    }

    #[test]
    fn idle_percent_uses_deltas() {
        let before = CpuTimes {
            user: 100,
            idle: 100,
            ..CpuTimes::default()
        };
        let after = CpuTimes {
            user: 125,
            idle: 175,
            ..CpuTimes::default()
        };
        let idle = idle_percent_between(&before, &after).expect("time elapsed");
        assert!((idle - 75.0).abs() < 1e-9);
        assert_eq!(idle_percent_between(&after, &after), None);
        assert_eq!(idle_percent_between(&after, &before), None);
    }

    #[test]
    fn parses_meminfo_with_kib_units() {
        let info = parse_meminfo(
            "MemTotal:       32768000 kB\n\
             MemFree:         1024000 kB\n\
             MemAvailable:   16384000 kB\n\
             SwapTotal:       8192000 kB\n",
        )
        .expect("meminfo should parse");
        assert_eq!(info.total_bytes, 33_554_432_000);
        assert_eq!(info.free_bytes, 1_048_576_000);
        assert_eq!(info.available_bytes, 16_777_216_000);
    }

    #[test]
    fn rejects_meminfo_with_unknown_unit_suffix() {
        let error = parse_meminfo(
            "MemTotal:       1024 blocks\n\
             MemFree:        512 kB\n\
             MemAvailable:   512 kB\n",
        )
        .expect_err("unknown unit suffix should fail");
        assert!(
            error.to_string().contains("unsupported meminfo unit in line"),
            "expected unsupported-unit context, got: {error}"
        );
    }

    #[test]
    fn rejects_meminfo_missing_available() {
        let error = parse_meminfo("MemTotal: 1024 kB\nMemFree: 512 kB\n").expect_err("missing field");
        assert!(error.to_string().contains("MemAvailable"));
    }

    #[test]
    fn mock_platform_repeats_last_reading() {
        let mem = |available| MemoryInfo {
            total_bytes: 100,
            free_bytes: 10,
            available_bytes: available,
        };
        let platform = MockPlatform::new(
            vec![],
            vec![mem(50), mem(40)],
            HardwareInfo {
                cores: 4,
                total_memory_bytes: 100,
            },
        );
        assert_eq!(platform.memory_info().unwrap().available_bytes, 50);
        assert_eq!(platform.memory_info().unwrap().available_bytes, 40);
        assert_eq!(platform.memory_info().unwrap().available_bytes, 40);
        assert!(platform.cpu_times().is_err());
        assert_eq!(platform.hardware_info().unwrap().cores, 4);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_platform_reads_proc() {
        let platform = LinuxPlatform::new();
        let hw = platform.hardware_info().expect("hardware info on linux");
        assert!(hw.cores >= 1);
        assert!(hw.total_memory_bytes > 0);
        assert!(platform.cpu_times().unwrap().total() > 0);
    }
}

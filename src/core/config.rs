//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{BenchError, Result};
use crate::core::scenario::Ipv4Prefix;

/// Full bgperf configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scenario: ScenarioConfig,
    pub thresholds: ThresholdConfig,
    pub sampling: SamplingConfig,
    pub target: TargetConfig,
    pub monitor: MonitorConfig,
    pub testers: TesterConfig,
    pub paths: PathsConfig,
}

/// What is being benchmarked and at which scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Benchmark name; used for the per-run config directory.
    pub name: String,
    /// Overrides the `name` column of the result record.
    pub label: Option<String>,
    /// Target daemon identifier (gobgp, bird, frr, ...).
    pub target: String,
    /// Route injector flavor: `bird`, `exa`, or an MRT injector (`gobgp`, `bgpdump2`).
    pub tester_type: String,
    pub neighbor_num: usize,
    pub prefix_num: u64,
    pub local_address_prefix: String,
    pub target_local_address: Option<String>,
    pub monitor_local_address: Option<String>,
    pub single_table: bool,
    /// Target runs outside the container runtime; no target samplers.
    pub remote: bool,
    /// Scales the monitor checkpoint; built-in per-target factor when unset.
    pub required_factor: Option<f64>,
}

/// Failure-detection thresholds for the convergence monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Consecutive identical monitor counts before a run is declared stalled.
    pub stall_samples: u64,
    /// Consecutive dropping monitor counts before a regression may be declared.
    pub regression_samples: u64,
    /// Minimum relative drop (0.01 = 1%) for a regression.
    pub regression_drop_ratio: f64,
    /// Period of intermediate time-series snapshots.
    pub snapshot_interval_secs: u64,
}

/// Producer pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SamplingConfig {
    pub neighbor_interval_ms: u64,
    pub free_memory_interval_ms: u64,
    /// Window between the two `/proc/stat` reads of one idle sample.
    pub idle_window_ms: u64,
    pub monitor_interval_ms: u64,
    pub establish_timeout_secs: u64,
}

/// Output flavor of the target's neighbor command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NeighborFormat {
    /// `gobgp neighbor -j` style JSON array.
    #[default]
    GobgpJson,
    /// One `ADDRESS COUNT` pair per line.
    Lines,
}

/// How to reach the target daemon's control plane and resource feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// Streams one Docker stats JSON document per line.
    pub stats_cmd: Vec<String>,
    pub neighbor_cmd: Vec<String>,
    pub neighbor_format: NeighborFormat,
    pub version_cmd: Vec<String>,
    /// Whitespace token of the version output to keep (`gobgpd version X`).
    pub version_token: Option<usize>,
    /// Empty disables the startup step.
    pub startup_cmd: Vec<String>,
}

/// How to query the monitoring peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub query_cmd: Vec<String>,
}

/// Where tester logs live and what counts as an error or timeout in them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TesterConfig {
    pub log_dir: PathBuf,
    pub error_pattern: String,
    pub timeout_pattern: String,
}

/// Filesystem paths used by bgperf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub output_dir: PathBuf,
    pub activity_log: PathBuf,
    pub sqlite_db: PathBuf,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: "bgperf".to_string(),
            label: None,
            target: "gobgp".to_string(),
            tester_type: "bird".to_string(),
            neighbor_num: 2,
            prefix_num: 100,
            local_address_prefix: "10.10.0.0/16".to_string(),
            target_local_address: None,
            monitor_local_address: None,
            single_table: false,
            remote: false,
            required_factor: None,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            stall_samples: 600,
            regression_samples: 10,
            regression_drop_ratio: 0.01,
            snapshot_interval_secs: 120,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            neighbor_interval_ms: 1_000,
            free_memory_interval_ms: 1_000,
            idle_window_ms: 1_000,
            monitor_interval_ms: 1_000,
            establish_timeout_secs: 120,
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            stats_cmd: argv(&[
                "curl",
                "-sN",
                "--unix-socket",
                "/var/run/docker.sock",
                "http://localhost/containers/bgperf_{target}_target/stats",
            ]),
            neighbor_cmd: argv(&[
                "docker",
                "exec",
                "bgperf_{target}_target",
                "gobgp",
                "neighbor",
                "-j",
            ]),
            neighbor_format: NeighborFormat::GobgpJson,
            version_cmd: argv(&["docker", "exec", "bgperf_{target}_target", "gobgpd", "--version"]),
            version_token: Some(2),
            startup_cmd: Vec::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            query_cmd: argv(&[
                "docker",
                "exec",
                "bgperf_monitor",
                "gobgp",
                "neighbor",
                "{target_address}",
                "-j",
            ]),
        }
    }
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/tmp/bgperf/tester"),
            error_pattern: r"(?i)\berror\b".to_string(),
            timeout_pattern: r"(?i)\btimed?\s*out\b".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[BGPERF-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("bgperf").join("config.toml");
        let data = home_dir.join(".local").join("share").join("bgperf");
        Self {
            config_file: cfg,
            output_dir: PathBuf::from("."),
            activity_log: data.join("activity.jsonl"),
            sqlite_db: data.join("runs.sqlite3"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    /// Same as [`Config::load`] with an explicit variable lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|source| BenchError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(BenchError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Name written in the first result column.
    #[must_use]
    pub fn run_label(&self) -> &str {
        self.scenario
            .label
            .as_deref()
            .filter(|label| !label.is_empty())
            .unwrap_or(&self.scenario.target)
    }

    /// Derive the configuration of one batch case from this base config.
    ///
    /// Per-target fields left unset in the case keep the base value; the
    /// result is validated like a loaded config.
    pub fn for_case(&self, case: &CaseSpec) -> Result<Self> {
        let mut cfg = self.clone();
        let scenario = &mut cfg.scenario;
        scenario.name.clone_from(&case.test_name);
        scenario.target.clone_from(&case.target);
        scenario.label.clone_from(&case.label);
        scenario.neighbor_num = case.neighbor_num;
        scenario.prefix_num = case.prefix_num;
        scenario.single_table = case.single_table;
        scenario.remote = case.remote;
        if let Some(prefix) = &case.local_address_prefix {
            scenario.local_address_prefix.clone_from(prefix);
        }
        if let Some(tester_type) = &case.tester_type {
            scenario.tester_type.clone_from(tester_type);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("BGPERF_TARGET") {
            self.scenario.target = raw.trim().to_string();
        }
        if let Some(raw) = lookup("BGPERF_NEIGHBOR_NUM") {
            self.scenario.neighbor_num = parse_env("BGPERF_NEIGHBOR_NUM", &raw)?;
        }
        if let Some(raw) = lookup("BGPERF_PREFIX_NUM") {
            self.scenario.prefix_num = parse_env("BGPERF_PREFIX_NUM", &raw)?;
        }
        if let Some(raw) = lookup("BGPERF_REMOTE") {
            self.scenario.remote = parse_env("BGPERF_REMOTE", &raw)?;
        }

        if let Some(raw) = lookup("BGPERF_STALL_SAMPLES") {
            self.thresholds.stall_samples = parse_env("BGPERF_STALL_SAMPLES", &raw)?;
        }
        if let Some(raw) = lookup("BGPERF_REGRESSION_SAMPLES") {
            self.thresholds.regression_samples = parse_env("BGPERF_REGRESSION_SAMPLES", &raw)?;
        }
        if let Some(raw) = lookup("BGPERF_REGRESSION_DROP_RATIO") {
            self.thresholds.regression_drop_ratio =
                parse_env("BGPERF_REGRESSION_DROP_RATIO", &raw)?;
        }
        if let Some(raw) = lookup("BGPERF_SNAPSHOT_INTERVAL_SECS") {
            self.thresholds.snapshot_interval_secs =
                parse_env("BGPERF_SNAPSHOT_INTERVAL_SECS", &raw)?;
        }

        if let Some(raw) = lookup("BGPERF_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("BGPERF_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let scenario = &self.scenario;
        if scenario.target.trim().is_empty() {
            return Err(BenchError::InvalidConfig {
                details: "scenario.target must not be empty".to_string(),
            });
        }
        if scenario.neighbor_num == 0 || scenario.prefix_num == 0 {
            return Err(BenchError::InvalidConfig {
                details: "scenario.neighbor_num and scenario.prefix_num must be > 0".to_string(),
            });
        }
        if let Some(factor) = scenario.required_factor
            && !(factor > 0.0 && factor <= 1.0)
        {
            return Err(BenchError::InvalidConfig {
                details: format!("scenario.required_factor must be in (0, 1], got {factor}"),
            });
        }
        Ipv4Prefix::parse(&scenario.local_address_prefix).map_err(|err| {
            BenchError::InvalidConfig {
                details: format!("scenario.local_address_prefix: {err}"),
            }
        })?;

        if self.thresholds.stall_samples == 0 || self.thresholds.regression_samples == 0 {
            return Err(BenchError::InvalidConfig {
                details: "thresholds.stall_samples and thresholds.regression_samples must be >= 1"
                    .to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.thresholds.regression_drop_ratio) {
            return Err(BenchError::InvalidConfig {
                details: format!(
                    "thresholds.regression_drop_ratio must be in [0, 1), got {}",
                    self.thresholds.regression_drop_ratio
                ),
            });
        }
        if self.thresholds.snapshot_interval_secs == 0 {
            return Err(BenchError::InvalidConfig {
                details: "thresholds.snapshot_interval_secs must be > 0".to_string(),
            });
        }

        for (name, value) in [
            ("neighbor_interval_ms", self.sampling.neighbor_interval_ms),
            ("free_memory_interval_ms", self.sampling.free_memory_interval_ms),
            ("idle_window_ms", self.sampling.idle_window_ms),
            ("monitor_interval_ms", self.sampling.monitor_interval_ms),
        ] {
            if value == 0 {
                return Err(BenchError::InvalidConfig {
                    details: format!("sampling.{name} must be > 0"),
                });
            }
        }

        if self.monitor.query_cmd.is_empty() {
            return Err(BenchError::InvalidConfig {
                details: "monitor.query_cmd must not be empty".to_string(),
            });
        }
        if !scenario.remote && self.target.neighbor_cmd.is_empty() {
            return Err(BenchError::InvalidConfig {
                details: "target.neighbor_cmd is required unless scenario.remote = true"
                    .to_string(),
            });
        }

        for (name, pattern) in [
            ("testers.error_pattern", &self.testers.error_pattern),
            ("testers.timeout_pattern", &self.testers.timeout_pattern),
        ] {
            Regex::new(pattern).map_err(|err| BenchError::InvalidConfig {
                details: format!("{name} is not a valid regex: {err}"),
            })?;
        }

        Ok(())
    }
}

/// One (target, neighbors, prefixes) combination of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSpec {
    pub test_name: String,
    pub target: String,
    pub label: Option<String>,
    pub local_address_prefix: Option<String>,
    pub tester_type: Option<String>,
    pub single_table: bool,
    pub remote: bool,
    pub neighbor_num: usize,
    pub prefix_num: u64,
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| BenchError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

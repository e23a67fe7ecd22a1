//! Command-backed collaborators: the target, monitor, container stats feed
//! and tester logs are reached by running configured command lines.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use regex::Regex;
use serde_json::Value;

use crate::core::config::{Config, NeighborFormat, TargetConfig, TesterConfig};
use crate::core::errors::{BenchError, Result};
use crate::core::scenario::ScenarioPlan;
use crate::monitor::cpu::DockerStats;
use crate::platform::collaborators::{
    ContainerStatsFeed, MonitorControl, MonitorReading, TargetControl, TargetLifecycle,
    TesterDiagnostics,
};

/// BGP FSM state number for Established.
const BGP_ESTABLISHED: u64 = 6;

/// Run a command line to completion and return its trimmed stdout.
pub fn run_command(component: &'static str, argv: &[String]) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| BenchError::collaborator(component, "no command configured"))?;
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| BenchError::io(program, source))?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        Ok(stdout.trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(BenchError::collaborator(
            component,
            format!(
                "{} failed (exit {}): {}",
                argv.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        ))
    }
}

// ──────────────────── target ────────────────────

/// Target reached through `docker exec`-style command lines.
#[derive(Debug, Clone)]
pub struct ExecTarget {
    neighbor_cmd: Vec<String>,
    neighbor_format: NeighborFormat,
    version_cmd: Vec<String>,
    version_token: Option<usize>,
    startup_cmd: Vec<String>,
}

impl ExecTarget {
    #[must_use]
    pub fn new(cfg: &TargetConfig, plan: &ScenarioPlan) -> Self {
        Self {
            neighbor_cmd: plan.expand_argv(&cfg.neighbor_cmd),
            neighbor_format: cfg.neighbor_format,
            version_cmd: plan.expand_argv(&cfg.version_cmd),
            version_token: cfg.version_token,
            startup_cmd: plan.expand_argv(&cfg.startup_cmd),
        }
    }
}

impl TargetControl for ExecTarget {
    fn neighbor_accepted(&self) -> Result<BTreeMap<String, u64>> {
        let raw = run_command("target", &self.neighbor_cmd)?;
        match self.neighbor_format {
            NeighborFormat::GobgpJson => parse_gobgp_neighbors(&raw),
            NeighborFormat::Lines => parse_neighbor_lines(&raw),
        }
    }

    fn version(&self) -> Result<String> {
        let raw = run_command("target", &self.version_cmd)?;
        Ok(pick_version(&raw, self.version_token))
    }
}

impl TargetLifecycle for ExecTarget {
    fn write_config(&self, plan: &ScenarioPlan, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|source| BenchError::io(dir, source))?;
        let path = dir.join("scenario.toml");
        fs::write(&path, toml::to_string(plan)?).map_err(|source| BenchError::io(&path, source))?;
        Ok(path)
    }

    fn startup(&self) -> Result<()> {
        if self.startup_cmd.is_empty() {
            return Ok(());
        }
        run_command("target", &self.startup_cmd).map(|_| ())
    }
}

/// `gobgp neighbor -j` output: neighbors without an accepted counter are skipped.
pub fn parse_gobgp_neighbors(raw: &str) -> Result<BTreeMap<String, u64>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: Value = serde_json::from_str(raw).map_err(|err| BenchError::SampleParse {
        context: "target neighbors",
        details: err.to_string(),
    })?;
    let neighbors = match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };

    let mut accepted = BTreeMap::new();
    for neighbor in &neighbors {
        let address = neighbor
            .pointer("/state/neighbor_address")
            .or_else(|| neighbor.pointer("/conf/neighbor_address"))
            .and_then(Value::as_str);
        let count = neighbor
            .pointer("/afi_safis/0/state/accepted")
            .and_then(Value::as_u64);
        if let (Some(address), Some(count)) = (address, count) {
            accepted.insert(address.to_string(), count);
        }
    }
    Ok(accepted)
}

/// One `ADDRESS COUNT` pair per line; blank and `#` lines are ignored.
pub fn parse_neighbor_lines(raw: &str) -> Result<BTreeMap<String, u64>> {
    let mut accepted = BTreeMap::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(address), Some(count)) = (fields.next(), fields.next()) else {
            return Err(BenchError::SampleParse {
                context: "target neighbors",
                details: format!("expected `ADDRESS COUNT`, got {line:?}"),
            });
        };
        let count = count.parse::<u64>().map_err(|err| BenchError::SampleParse {
            context: "target neighbors",
            details: format!("bad count in {line:?}: {err}"),
        })?;
        accepted.insert(address.to_string(), count);
    }
    Ok(accepted)
}

/// `gobgpd version 3.25.0` with token 2 yields `3.25.0`.
#[must_use]
pub fn pick_version(raw: &str, token: Option<usize>) -> String {
    let trimmed = raw.trim();
    token
        .and_then(|idx| trimmed.split_whitespace().nth(idx))
        .unwrap_or(trimmed)
        .to_string()
}

// ──────────────────── monitor ────────────────────

/// Monitoring peer queried with a GoBGP-style neighbor command.
#[derive(Debug, Clone)]
pub struct ExecMonitor {
    query_cmd: Vec<String>,
    checkpoint: u64,
}

impl ExecMonitor {
    #[must_use]
    pub fn new(cfg: &Config, plan: &ScenarioPlan) -> Self {
        Self {
            query_cmd: plan.expand_argv(&cfg.monitor.query_cmd),
            checkpoint: plan.required,
        }
    }

    fn query(&self) -> Result<Value> {
        let raw = run_command("monitor", &self.query_cmd)?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| BenchError::SampleParse {
            context: "monitor",
            details: err.to_string(),
        })?;
        Ok(match value {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        })
    }
}

impl MonitorControl for ExecMonitor {
    fn poll(&self) -> Result<MonitorReading> {
        Ok(monitor_reading(&self.query()?, self.checkpoint))
    }

    fn is_established(&self) -> Result<bool> {
        Ok(session_established(&self.query()?))
    }
}

#[must_use]
pub fn monitor_reading(neighbor: &Value, checkpoint: u64) -> MonitorReading {
    let accepted = neighbor
        .pointer("/afi_safis/0/state/accepted")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    MonitorReading {
        accepted,
        all_testers_checked: accepted >= checkpoint,
    }
}

#[must_use]
pub fn session_established(neighbor: &Value) -> bool {
    match neighbor.pointer("/state/session_state") {
        Some(Value::String(state)) => state.eq_ignore_ascii_case("established"),
        Some(Value::Number(state)) => state.as_u64() == Some(BGP_ESTABLISHED),
        _ => false,
    }
}

// ──────────────────── stats feed ────────────────────

/// Child process streaming one Docker stats JSON document per line.
#[derive(Debug)]
pub struct CommandStatsFeed {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl CommandStatsFeed {
    pub fn spawn(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BenchError::collaborator("stats", "no command configured"))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BenchError::io(program, source))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BenchError::collaborator("stats", "child stdout unavailable"))?;
        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

impl ContainerStatsFeed for CommandStatsFeed {
    fn next_stats(&mut self) -> Option<Result<DockerStats>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => return Some(Err(BenchError::io("stats stream", source))),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(|err| BenchError::SampleParse {
                context: "container stats",
                details: err.to_string(),
            }));
        }
    }
}

impl Drop for CommandStatsFeed {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ──────────────────── tester diagnostics ────────────────────

/// Counts matching lines across `*.log` files in the tester log directory.
#[derive(Debug, Clone)]
pub struct LogScanDiagnostics {
    log_dir: PathBuf,
    error_re: Regex,
    timeout_re: Regex,
}

impl LogScanDiagnostics {
    pub fn new(cfg: &TesterConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| BenchError::InvalidConfig {
                details: format!("tester pattern {pattern:?}: {err}"),
            })
        };
        Ok(Self {
            log_dir: cfg.log_dir.clone(),
            error_re: compile(&cfg.error_pattern)?,
            timeout_re: compile(&cfg.timeout_pattern)?,
        })
    }

    fn count_matches(&self, re: &Regex) -> Result<u64> {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(BenchError::io(&self.log_dir, source)),
        };
        let mut total = 0_u64;
        for entry in entries {
            let path = entry.map_err(|source| BenchError::io(&self.log_dir, source))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
                continue;
            }
            let raw = fs::read(&path).map_err(|source| BenchError::io(&path, source))?;
            let text = String::from_utf8_lossy(&raw);
            total += text.lines().filter(|line| re.is_match(line)).count() as u64;
        }
        Ok(total)
    }
}

impl TesterDiagnostics for LogScanDiagnostics {
    fn error_count(&self) -> Result<u64> {
        self.count_matches(&self.error_re)
    }

    fn timeout_count(&self) -> Result<u64> {
        self.count_matches(&self.timeout_re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOBGP_NEIGHBORS: &str = r#"[
        {"conf": {"neighbor_address": "10.10.0.2"},
         "state": {"neighbor_address": "10.10.0.2", "session_state": 6},
         "afi_safis": [{"state": {"family": {"afi": 1, "safi": 1}}}]},
        {"conf": {"neighbor_address": "10.10.0.3"},
         "state": {"neighbor_address": "10.10.0.3", "session_state": 6},
         "afi_safis": [{"state": {"accepted": 100, "received": 100}}]},
        {"state": {"neighbor_address": "10.10.0.4"},
         "afi_safis": [{"state": {"accepted": 42}}]}
    ]"#;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| (*part).to_string()).collect()
    }

    #[test]
    fn gobgp_neighbors_skip_entries_without_accepted() {
        let accepted = parse_gobgp_neighbors(GOBGP_NEIGHBORS).unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted["10.10.0.3"], 100);
        assert_eq!(accepted["10.10.0.4"], 42);
        assert!(parse_gobgp_neighbors("").unwrap().is_empty());
        assert!(parse_gobgp_neighbors("null").unwrap().is_empty());
        assert!(parse_gobgp_neighbors("{broken").is_err());
    }

    #[test]
    fn neighbor_lines_parse_and_reject_garbage() {
        let accepted = parse_neighbor_lines("# addr count\n10.10.0.3 10\n\n10.10.0.4   7\n").unwrap();
        assert_eq!(accepted["10.10.0.3"], 10);
        assert_eq!(accepted["10.10.0.4"], 7);
        assert!(parse_neighbor_lines("10.10.0.3\n").is_err());
        assert!(parse_neighbor_lines("10.10.0.3 many\n").is_err());
    }

    #[test]
    fn version_token_selection() {
        assert_eq!(pick_version("gobgpd version 3.25.0\n", Some(2)), "3.25.0");
        assert_eq!(pick_version("BIRD 2.14\n", Some(5)), "BIRD 2.14");
        assert_eq!(pick_version(" 8.5.4 \n", None), "8.5.4");
    }

    #[test]
    fn monitor_reading_defaults_missing_accepted_to_zero() {
        let neighbor: Value = serde_json::from_str(
            r#"{"state": {"session_state": "established"}, "afi_safis": [{"state": {}}]}"#,
        )
        .unwrap();
        assert_eq!(monitor_reading(&neighbor, 10), MonitorReading {
            accepted: 0,
            all_testers_checked: false
        });
        assert!(session_established(&neighbor));

        let neighbor: Value = serde_json::from_str(
            r#"{"state": {"session_state": 3}, "afi_safis": [{"state": {"accepted": 10}}]}"#,
        )
        .unwrap();
        assert!(monitor_reading(&neighbor, 10).all_testers_checked);
        assert!(!session_established(&neighbor));
    }

    #[test]
    fn run_command_captures_stdout_and_failures() {
        assert_eq!(run_command("test", &argv(&["echo", "hello"])).unwrap(), "hello");
        let err = run_command("test", &argv(&["false"])).expect_err("non-zero exit");
        assert_eq!(err.code(), "BGP-2002");
        let err = run_command("test", &[]).expect_err("empty argv");
        assert!(err.to_string().contains("no command configured"));
    }

    #[test]
    fn exec_target_expands_placeholders_and_parses_lines() {
        let plan =
            ScenarioPlan::from_config(&crate::core::config::ScenarioConfig::default()).unwrap();
        let cfg = TargetConfig {
            neighbor_cmd: argv(&["printf", "10.10.0.3 100\\n{target_address} 5\\n"]),
            neighbor_format: NeighborFormat::Lines,
            version_cmd: argv(&["echo", "gobgpd version 3.25.0"]),
            ..TargetConfig::default()
        };
        let target = ExecTarget::new(&cfg, &plan);
        let accepted = target.neighbor_accepted().unwrap();
        assert_eq!(accepted["10.10.0.3"], 100);
        assert_eq!(accepted["10.10.255.254"], 5);
        assert_eq!(target.version().unwrap(), "3.25.0");
        target.startup().unwrap();
    }

    #[test]
    fn command_stats_feed_reads_json_lines() {
        let doc = r#"{"cpu_stats":{"cpu_usage":{"total_usage":2,"percpu_usage":[2]},"system_cpu_usage":4},"memory_stats":{"usage":7}}"#;
        let script = format!("echo '{doc}'; echo; echo 'not json'");
        let mut feed = CommandStatsFeed::spawn(&argv(&["sh", "-c", &script])).unwrap();
        let stats = feed.next_stats().unwrap().unwrap();
        assert_eq!(stats.mem_bytes(), 7);
        assert!(feed.next_stats().unwrap().is_err());
        assert!(feed.next_stats().is_none());
    }

    #[test]
    fn log_scan_counts_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tester0.log"),
            "ok\nERROR: peer reset\nconnection timed out\nerror again\n",
        )
        .unwrap();
        fs::write(dir.path().join("tester1.log"), "Timeout waiting\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "error error\n").unwrap();
        let cfg = TesterConfig {
            log_dir: dir.path().to_path_buf(),
            ..TesterConfig::default()
        };
        let diag = LogScanDiagnostics::new(&cfg).unwrap();
        assert_eq!(diag.error_count().unwrap(), 2);
        assert_eq!(diag.timeout_count().unwrap(), 2);

        let missing = LogScanDiagnostics::new(&TesterConfig {
            log_dir: dir.path().join("absent"),
            ..TesterConfig::default()
        })
        .unwrap();
        assert_eq!(missing.error_count().unwrap(), 0);
    }
}

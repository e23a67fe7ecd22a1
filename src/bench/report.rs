//! Outcome reporting: the fixed-schema result record, its CSV persistence,
//! and the human summary printed when a run terminates.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::errors::{BenchError, Result};
use crate::core::scenario::ScenarioPlan;
use crate::monitor::convergence::{BenchmarkState, RunOutcome};
use crate::monitor::series::SeriesRow;
use crate::platform::pal::HardwareInfo;

/// Column names, in record order.
pub const HEADER: [&str; 24] = [
    "name",
    "target",
    "version",
    "peers",
    "prefixes per peer",
    "required",
    "received",
    "monitor (s)",
    "elapsed (s)",
    "prefix received (s)",
    "testers (s)",
    "total time",
    "max cpu %",
    "max mem (GB)",
    "min idle%",
    "min free mem (GB)",
    "flags",
    "date",
    "cores",
    "Mem (GB)",
    "tester errors",
    "tester timeouts",
    "failed",
    "MSG",
];

const FAILED_FLAG: &str = "FAILED";
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

// ──────────────────── result record ────────────────────

/// One row of benchmark results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub name: String,
    pub target: String,
    pub version: String,
    pub neighbors: usize,
    pub prefixes: u64,
    pub required: u64,
    pub recved: u64,
    pub monitor_wait_secs: u64,
    pub elapsed_secs: u64,
    pub first_received_secs: u64,
    pub reception_secs: u64,
    pub total_secs: f64,
    pub max_cpu: i64,
    pub max_mem_gb: f64,
    pub min_idle: i64,
    pub min_free_gb: f64,
    pub flags: String,
    pub date: String,
    pub cores: usize,
    pub total_mem_gb: f64,
    pub tester_errors: u64,
    pub tester_timeouts: u64,
    pub failed: bool,
    pub message: String,
}

/// Everything about a finished run that is not in [`BenchmarkState`].
#[derive(Debug, Clone)]
pub struct RunFacts<'a> {
    pub name: &'a str,
    pub plan: &'a ScenarioPlan,
    pub single_table: bool,
    pub version: &'a str,
    pub monitor_wait: Duration,
    pub total: Duration,
    pub hardware: HardwareInfo,
    pub tester_errors: u64,
    pub tester_timeouts: u64,
    pub date: NaiveDate,
}

#[allow(clippy::cast_precision_loss)]
fn gigabytes(bytes: u64) -> f64 {
    round_to(bytes as f64 / GIB, 3)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[allow(clippy::cast_possible_truncation)]
fn rounded(value: f64) -> i64 {
    value.round() as i64
}

impl ResultRecord {
    #[must_use]
    pub fn from_run(facts: &RunFacts<'_>, state: &BenchmarkState, outcome: &RunOutcome) -> Self {
        let elapsed_secs = state.elapsed.as_secs();
        let first_received_secs = state.first_received_time.map_or(0, |t| t.as_secs());
        Self {
            name: facts.name.to_string(),
            target: facts.plan.target.clone(),
            version: facts.version.to_string(),
            neighbors: facts.plan.neighbor_num,
            prefixes: facts.plan.prefix_num,
            required: state.required,
            recved: state.recved,
            monitor_wait_secs: facts.monitor_wait.as_secs(),
            elapsed_secs,
            first_received_secs,
            reception_secs: state.reception_secs(),
            total_secs: round_to(facts.total.as_secs_f64(), 2),
            max_cpu: rounded(state.max_cpu),
            max_mem_gb: gigabytes(state.max_mem),
            min_idle: rounded(state.min_idle),
            min_free_gb: gigabytes(state.min_free),
            flags: if facts.single_table { "-s".to_string() } else { String::new() },
            date: facts.date.format("%Y-%m-%d").to_string(),
            cores: facts.hardware.cores,
            total_mem_gb: gigabytes(facts.hardware.total_memory_bytes),
            tester_errors: facts.tester_errors,
            tester_timeouts: facts.tester_timeouts,
            failed: outcome.is_failure(),
            message: outcome.message().unwrap_or_default().to_string(),
        }
    }

    #[must_use]
    pub fn to_fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.target.clone(),
            self.version.clone(),
            self.neighbors.to_string(),
            self.prefixes.to_string(),
            self.required.to_string(),
            self.recved.to_string(),
            self.monitor_wait_secs.to_string(),
            self.elapsed_secs.to_string(),
            self.first_received_secs.to_string(),
            self.reception_secs.to_string(),
            format!("{:.2}", self.total_secs),
            self.max_cpu.to_string(),
            format!("{:.3}", self.max_mem_gb),
            self.min_idle.to_string(),
            format!("{:.3}", self.min_free_gb),
            self.flags.clone(),
            self.date.clone(),
            self.cores.to_string(),
            format!("{:.3}", self.total_mem_gb),
            self.tester_errors.to_string(),
            self.tester_timeouts.to_string(),
            if self.failed { FAILED_FLAG.to_string() } else { String::new() },
            self.message.clone(),
        ]
    }

    /// Rebuild a record from its fields by column position.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self> {
        if fields.len() != HEADER.len() {
            return Err(BenchError::Csv {
                details: format!("expected {} columns, found {}", HEADER.len(), fields.len()),
            });
        }
        let text = |i: usize| fields[i].as_ref().trim().to_string();
        Ok(Self {
            name: text(0),
            target: text(1),
            version: text(2),
            neighbors: parse_column(fields, 3)?,
            prefixes: parse_column(fields, 4)?,
            required: parse_column(fields, 5)?,
            recved: parse_column(fields, 6)?,
            monitor_wait_secs: parse_column(fields, 7)?,
            elapsed_secs: parse_column(fields, 8)?,
            first_received_secs: parse_column(fields, 9)?,
            reception_secs: parse_column(fields, 10)?,
            total_secs: parse_column(fields, 11)?,
            max_cpu: parse_column(fields, 12)?,
            max_mem_gb: parse_column(fields, 13)?,
            min_idle: parse_column(fields, 14)?,
            min_free_gb: parse_column(fields, 15)?,
            flags: text(16),
            date: text(17),
            cores: parse_column(fields, 18)?,
            total_mem_gb: parse_column(fields, 19)?,
            tester_errors: parse_column(fields, 20)?,
            tester_timeouts: parse_column(fields, 21)?,
            failed: fields[22].as_ref().trim() == FAILED_FLAG,
            message: text(23),
        })
    }

    /// The record as one CSV line, without trailing newline.
    pub fn to_csv_line(&self) -> Result<String> {
        csv_line(&self.to_fields())
    }
}

fn parse_column<S: AsRef<str>, T: std::str::FromStr>(fields: &[S], index: usize) -> Result<T> {
    let raw = fields[index].as_ref().trim();
    raw.parse().map_err(|_| BenchError::Csv {
        details: format!("column {index} ({}) has invalid value {raw:?}", HEADER[index]),
    })
}

fn csv_line<S: AsRef<[u8]>>(fields: &[S]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer.into_inner().map_err(|e| BenchError::Csv {
        details: e.to_string(),
    })?;
    let line = String::from_utf8_lossy(&bytes);
    Ok(line.trim_end_matches('\n').to_string())
}

/// Header as one CSV line.
pub fn header_line() -> Result<String> {
    csv_line(&HEADER)
}

// ──────────────────── persistence ────────────────────

/// Rewrite `path` with the header and every record. The file is replaced
/// atomically so an interrupted batch leaves the previous complete table.
pub fn write_results(path: &Path, records: &[ResultRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| BenchError::io(parent, source))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        writer.write_record(HEADER)?;
        for record in records {
            writer.write_record(record.to_fields())?;
        }
        writer.flush().map_err(|source| BenchError::io(&tmp, source))?;
    }
    fs::rename(&tmp, path).map_err(|source| BenchError::io(path, source))
}

pub fn read_results(path: &Path) -> Result<Vec<ResultRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    reader
        .records()
        .map(|row| {
            let row = row?;
            let fields: Vec<&str> = row.iter().collect();
            ResultRecord::from_fields(&fields)
        })
        .collect()
}

// ──────────────────── human output ────────────────────

/// Bytes in the largest fitting binary unit, two decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mem_human(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB_BYTES: u64 = MIB * 1024;
    let value = bytes as f64;
    if bytes > GIB_BYTES {
        format!("{:.2}GB", value / GIB_BYTES as f64)
    } else if bytes > MIB {
        format!("{:.2}MB", value / MIB as f64)
    } else if bytes > KIB {
        format!("{:.2}KB", value / KIB as f64)
    } else {
        format!("{value:.2}B")
    }
}

/// Per-heartbeat progress line.
#[must_use]
pub fn progress_line(row: &SeriesRow) -> String {
    format!(
        "elapsed: {}sec, cpu: {:>4.2}%, mem: {}, mon recved: {}, neighbors: {}, \
         %idle {}, free mem {}",
        row.elapsed_secs,
        row.cpu_percent,
        mem_human(row.mem_bytes),
        row.recved,
        row.neighbors_checked,
        row.idle_percent,
        mem_human(row.free_bytes),
    )
}

/// Line written to the `--output` progress file.
#[must_use]
pub fn progress_file_line(row: &SeriesRow) -> String {
    format!("{}, {}, {}, {}", row.elapsed_secs, row.cpu_percent, row.mem_bytes, row.recved)
}

/// Final summary lines, without the failure banner.
#[must_use]
pub fn summary_lines(record: &ResultRecord, state: &BenchmarkState) -> Vec<String> {
    let mut lines = Vec::with_capacity(8);
    lines.push(format!("{}: {}", record.target, record.version));
    lines.push(format!(
        "Max cpu: {:4.2}, max mem: {}",
        state.max_cpu,
        mem_human(state.max_mem)
    ));
    lines.push(format!(
        "Min %idle {}, Min mem free {}",
        state.min_idle,
        mem_human(state.min_free)
    ));
    lines.push(format!(
        "Time since first received prefix: {}",
        record.reception_secs
    ));
    lines.push(format!("total time: {:.2}s", record.total_secs));
    lines.push(format!("tester errors: {}", record.tester_errors));
    lines.push(format!("tester timeouts: {}", record.tester_timeouts));
    lines
}

/// Render the whole terminal report: banner, summary, header and row.
pub fn render_report(record: &ResultRecord, state: &BenchmarkState, color: bool) -> Result<String> {
    let mut out = String::new();
    if record.failed {
        let _ = writeln!(out, "{}", failure_banner(color));
        let _ = writeln!(out, "{}", record.message);
    }
    for line in summary_lines(record, state) {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", header_line()?);
    let _ = writeln!(out, "{}", record.to_csv_line()?);
    Ok(out)
}

#[cfg(feature = "cli")]
fn failure_banner(color: bool) -> String {
    use colored::Colorize;
    if color {
        FAILED_FLAG.red().bold().to_string()
    } else {
        FAILED_FLAG.to_string()
    }
}

#[cfg(not(feature = "cli"))]
fn failure_banner(_color: bool) -> String {
    FAILED_FLAG.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ScenarioConfig;

    fn plan() -> ScenarioPlan {
        let scenario = ScenarioConfig {
            target: "gobgp".to_string(),
            neighbor_num: 2,
            prefix_num: 100,
            ..ScenarioConfig::default()
        };
        ScenarioPlan::from_config(&scenario).unwrap()
    }

    fn state() -> BenchmarkState {
        let mut state = BenchmarkState::new(200);
        state.recved = 200;
        state.max_cpu = 187.6;
        state.max_mem = 3 * 1024 * 1024 * 1024 / 2;
        state.min_idle = 12.4;
        state.min_free = 2 * 1024 * 1024 * 1024;
        state.elapsed = Duration::from_secs(45);
        state.first_received_time = Some(Duration::from_secs(5));
        state
    }

    fn record(outcome: &RunOutcome) -> ResultRecord {
        let plan = plan();
        let facts = RunFacts {
            name: "gobgp-nightly",
            plan: &plan,
            single_table: true,
            version: "3.25.0",
            monitor_wait: Duration::from_secs(7),
            total: Duration::from_millis(61_257),
            hardware: HardwareInfo {
                cores: 8,
                total_memory_bytes: 16 * 1024 * 1024 * 1024,
            },
            tester_errors: 1,
            tester_timeouts: 2,
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        ResultRecord::from_run(&facts, &state(), outcome)
    }

    #[test]
    fn record_columns_follow_header_order() {
        let rec = record(&RunOutcome::Success);
        let fields = rec.to_fields();
        assert_eq!(fields.len(), HEADER.len());
        assert_eq!(fields[0], "gobgp-nightly");
        assert_eq!(fields[1], "gobgp");
        assert_eq!(fields[3], "2");
        assert_eq!(fields[4], "100");
        assert_eq!(fields[7], "7");
        assert_eq!(fields[8], "45");
        assert_eq!(fields[9], "5");
        assert_eq!(fields[10], "40");
        assert_eq!(fields[11], "61.26");
        assert_eq!(fields[12], "188");
        assert_eq!(fields[13], "1.500");
        assert_eq!(fields[14], "12");
        assert_eq!(fields[16], "-s");
        assert_eq!(fields[17], "2026-03-01");
        assert_eq!(fields[19], "16.000");
        assert_eq!(fields[22], "");
        assert_eq!(fields[23], "");
    }

    #[test]
    fn failed_record_round_trips_by_position() {
        let outcome = RunOutcome::Stalled {
            message: "FAILED: stuck received count 150 neighbors_checked 1".to_string(),
        };
        let rec = record(&outcome);
        let back = ResultRecord::from_fields(&rec.to_fields()).unwrap();
        assert_eq!(back.required, 200);
        assert_eq!(back.recved, 200);
        assert!(back.failed);
        assert_eq!(back.message, outcome.message().unwrap());
        assert_eq!(back, rec);
    }

    #[test]
    fn short_rows_are_rejected() {
        let err = ResultRecord::from_fields(&["a", "b"]).expect_err("too short");
        assert_eq!(err.code(), "BGP-2103");
    }

    #[test]
    fn results_file_is_rewritten_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("nightly.csv");
        let first = record(&RunOutcome::Success);
        write_results(&path, std::slice::from_ref(&first)).unwrap();
        assert_eq!(read_results(&path).unwrap().len(), 1);

        let second = record(&RunOutcome::Regressed {
            message: "FAILED: dropping received count 90 neighbors_checked 2".to_string(),
        });
        write_results(&path, &[first, second.clone()]).unwrap();
        let back = read_results(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1], second);
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn mem_human_picks_units() {
        assert_eq!(mem_human(512), "512.00B");
        assert_eq!(mem_human(2048), "2.00KB");
        assert_eq!(mem_human(3 * 1024 * 1024), "3.00MB");
        assert_eq!(mem_human(5 * 1024 * 1024 * 1024 + 1), "5.00GB");
    }

    #[test]
    fn progress_lines_match_format() {
        let row = SeriesRow {
            elapsed_secs: 12,
            cpu_percent: 3.14159,
            mem_bytes: 2048,
            recved: 99,
            neighbors_checked: 1,
            idle_percent: 80.5,
            free_bytes: 4096,
        };
        assert_eq!(
            progress_line(&row),
            "elapsed: 12sec, cpu: 3.14%, mem: 2.00KB, mon recved: 99, neighbors: 1, %idle 80.5, free mem 4.00KB"
        );
        assert_eq!(progress_file_line(&row), "12, 3.14159, 2048, 99");
    }

    #[test]
    fn failure_report_leads_with_banner() {
        let rec = record(&RunOutcome::Regressed {
            message: "FAILED: dropping received count 90 neighbors_checked 2".to_string(),
        });
        let report = render_report(&rec, &state(), false).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "FAILED");
        assert!(lines[1].starts_with("FAILED: dropping"));
        assert_eq!(lines[2], "gobgp: 3.25.0");
        assert!(report.contains("Time since first received prefix: 40"));
        assert!(lines.iter().any(|l| l.starts_with("name,target,version")));
    }
}

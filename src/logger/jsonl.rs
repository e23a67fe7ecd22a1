//! Append-only JSONL activity log.
//!
//! Each benchmark event becomes one self-contained JSON object per line,
//! assembled in memory and written with a single `write_all` so a tailing
//! reader never sees half a line.
//!
//! When the primary file cannot be written the writer steps down, in order,
//! to the fallback file, to stderr (`[BGPERF-JSONL]` prefix), and finally to
//! discarding. A benchmark never fails because its log failed.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{BenchError, Result};

const BUFFER_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BenchStart,
    BenchFinish,
    Snapshot,
    BatchStart,
    BatchFinish,
    CollaboratorError,
    Error,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BenchStart => "bench_start",
            Self::BenchFinish => "bench_finish",
            Self::Snapshot => "snapshot",
            Self::BatchStart => "batch_start",
            Self::BatchFinish => "batch_finish",
            Self::CollaboratorError => "collaborator_error",
            Self::Error => "error",
        }
    }
}

/// One log line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with milliseconds.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Result-record name of the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// `success`, `stalled` or `regressed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recved: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// New entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            run: None,
            target: None,
            outcome: None,
            elapsed_secs: None,
            recved: None,
            required: None,
            path: None,
            config_hash: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where lines currently go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Tried when the primary path cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this size.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval: Duration,
}

impl JsonlConfig {
    /// Defaults for an activity log at `path`, falling back to the temp dir.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback_path: Some(std::env::temp_dir().join("bgperf-activity.jsonl")),
            max_size_bytes: 20 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval: Duration::from_secs(5),
        }
    }
}

/// JSONL writer with size rotation and a degradation chain.
#[derive(Debug)]
pub struct JsonlWriter {
    config: JsonlConfig,
    file: Option<BufWriter<File>>,
    sink: Sink,
    size: u64,
    last_sync: Instant,
}

impl JsonlWriter {
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            file: None,
            sink: Sink::Discard,
            size: 0,
            last_sync: Instant::now(),
        };
        writer.open_sink(Sink::Primary);
        writer
    }

    #[must_use]
    pub const fn sink(&self) -> Sink {
        self.sink
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(err) => {
                let _ = writeln!(io::stderr(), "[BGPERF-JSONL] cannot serialize entry: {err}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.get_ref().sync_data();
        }
        self.last_sync = Instant::now();
    }

    fn current_path(&self) -> Option<&Path> {
        match self.sink {
            Sink::Primary => Some(&self.config.path),
            Sink::Fallback => self.config.fallback_path.as_deref(),
            Sink::Stderr | Sink::Discard => None,
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.file.is_some() && self.size + len > self.config.max_size_bytes {
            self.rotate();
        }

        match self.sink {
            Sink::Primary | Sink::Fallback => {
                let written = self
                    .file
                    .as_mut()
                    .is_some_and(|file| file.write_all(line.as_bytes()).is_ok());
                if written {
                    self.size += len;
                    if self.last_sync.elapsed() >= self.config.fsync_interval {
                        self.fsync();
                    }
                } else {
                    self.step_down();
                    self.write_line(line);
                }
            }
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[BGPERF-JSONL] {line}");
            }
            Sink::Discard => {}
        }
    }

    /// Try to open `sink`, continuing down the chain on failure.
    fn open_sink(&mut self, sink: Sink) {
        self.file = None;
        self.sink = sink;
        let path = match sink {
            Sink::Primary => Some(self.config.path.clone()),
            Sink::Fallback => self.config.fallback_path.clone(),
            Sink::Stderr | Sink::Discard => return,
        };
        let Some(path) = path else {
            self.open_sink(Sink::Stderr);
            return;
        };
        match open_append(&path) {
            Ok((file, size)) => {
                if sink == Sink::Fallback {
                    let _ = writeln!(
                        io::stderr(),
                        "[BGPERF-JSONL] activity log falling back to {}",
                        path.display()
                    );
                }
                self.file = Some(BufWriter::with_capacity(BUFFER_BYTES, file));
                self.size = size;
            }
            Err(err) => {
                let _ = writeln!(io::stderr(), "[BGPERF-JSONL] {err}");
                self.open_sink(next_sink(sink));
            }
        }
    }

    fn step_down(&mut self) {
        let next = next_sink(self.sink);
        if next == Sink::Stderr {
            let _ = writeln!(io::stderr(), "[BGPERF-JSONL] file logging failed, using stderr");
        }
        self.open_sink(next);
    }

    fn rotate(&mut self) {
        self.flush();
        self.file = None;
        let Some(base) = self.current_path().map(Path::to_path_buf) else {
            return;
        };
        let keep = self.config.max_rotated_files;
        if keep == 0 {
            let _ = fs::remove_file(&base);
        } else {
            let _ = fs::remove_file(rotated_name(&base, keep));
            for idx in (1..keep).rev() {
                let _ = fs::rename(rotated_name(&base, idx), rotated_name(&base, idx + 1));
            }
            let _ = fs::rename(&base, rotated_name(&base, 1));
        }
        match open_append(&base) {
            Ok((file, size)) => {
                self.file = Some(BufWriter::with_capacity(BUFFER_BYTES, file));
                self.size = size;
            }
            Err(_) => self.step_down(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

const fn next_sink(sink: Sink) -> Sink {
    match sink {
        Sink::Primary => Sink::Fallback,
        Sink::Fallback => Sink::Stderr,
        Sink::Stderr | Sink::Discard => Sink::Discard,
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| BenchError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| BenchError::io(path, source))?;
    let size = file.metadata().map_or(0, |meta| meta.len());
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.2`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 2,
            fsync_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn entries_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone()));
        let mut entry = LogEntry::new(EventType::BenchFinish, Severity::Info);
        entry.outcome = Some("stalled".to_string());
        entry.recved = Some(300);
        writer.write_entry(&entry);
        writer.write_entry(&LogEntry::new(EventType::Snapshot, Severity::Info));
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "bench_finish");
        assert_eq!(first["outcome"], "stalled");
        assert_eq!(first["recved"], 300);
        assert!(!lines[1].contains("\"run\""), "None fields are omitted");
    }

    #[test]
    fn rotation_keeps_bounded_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut cfg = config(path.clone());
        cfg.max_size_bytes = 120;
        let mut writer = JsonlWriter::open(cfg);
        for _ in 0..12 {
            writer.write_entry(&LogEntry::new(EventType::BatchStart, Severity::Info));
        }
        writer.flush();
        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(rotated_name(&path, 2).exists());
        assert!(!rotated_name(&path, 3).exists());
    }

    #[test]
    fn unwritable_primary_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut cfg = config(blocker.join("activity.jsonl"));
        cfg.fallback_path = Some(fallback.clone());
        let mut writer = JsonlWriter::open(cfg);
        assert_eq!(writer.sink(), Sink::Fallback);
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Critical));
        writer.flush();
        assert!(fs::read_to_string(fallback).unwrap().contains("\"error\""));
    }

    #[test]
    fn no_fallback_degrades_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file").unwrap();
        let writer = JsonlWriter::open(config(blocker.join("x.jsonl")));
        assert_eq!(writer.sink(), Sink::Stderr);
    }
}

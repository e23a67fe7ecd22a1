//! Dual-write activity logging.
//!
//! A dedicated logger thread owns the JSONL writer and, with the `sqlite`
//! feature, the run-history database. Every other thread holds a cloneable
//! [`ActivityLoggerHandle`] that uses `try_send` on a bounded channel, so the
//! convergence loop is never blocked by logging.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{BenchError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{EventRow, RunRow, SqliteLogger};

const CHANNEL_CAPACITY: usize = 1024;
/// Consecutive SQLite failures before the database is abandoned.
#[cfg(feature = "sqlite")]
const SQLITE_MAX_FAILURES: u32 = 3;

// ──────────────────── events ────────────────────

/// Final numbers of one run, as logged and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run: String,
    pub target: String,
    pub version: String,
    pub neighbors: usize,
    pub prefixes: u64,
    pub required: u64,
    pub recved: u64,
    pub elapsed_secs: u64,
    pub total_secs: f64,
    pub outcome: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    BenchStarted {
        run: String,
        target: String,
        required: u64,
        neighbors: usize,
        config_hash: String,
    },
    SnapshotWritten {
        run: String,
        path: String,
        elapsed_secs: u64,
    },
    BenchFinished(RunSummary),
    BatchStarted {
        name: String,
        cases: usize,
    },
    BatchFinished {
        name: String,
        completed: usize,
        skipped: usize,
        interrupted: bool,
    },
    CollaboratorError {
        component: String,
        code: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Flush, fsync and stop the logger thread.
    Shutdown,
}

// ──────────────────── handle ────────────────────

/// Cloneable, non-blocking sender side of the logger.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose events go nowhere (no logger thread).
    #[must_use]
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event; a full channel drops it and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── spawn ────────────────────

pub struct DualLoggerConfig {
    /// `None` disables the database.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl DualLoggerConfig {
    #[must_use]
    pub fn new(jsonl_path: PathBuf, sqlite_path: Option<PathBuf>) -> Self {
        Self {
            sqlite_path,
            jsonl_config: JsonlConfig::at(jsonl_path),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Start the logger thread.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };
    let join = thread::Builder::new()
        .name("bgperf-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped))
        .map_err(|e| BenchError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;
    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: DualLoggerConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config.jsonl_config);

    #[cfg(feature = "sqlite")]
    let mut sqlite = config.sqlite_path.and_then(|path| match SqliteLogger::open(&path) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("[BGPERF-DUAL] run history disabled, cannot open {}: {e}", path.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = config.sqlite_path;
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} activity events dropped (logger back-pressure)"));
            jsonl.write_entry(&warn);
        }

        let Some(entry) = to_log_entry(&event) else {
            break;
        };
        jsonl.write_entry(&entry);

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            let mut ok = db.log_event(&to_event_row(&entry)).is_ok();
            if let ActivityEvent::BenchFinished(summary) = &event {
                ok &= db.log_run(&to_run_row(&entry.ts, summary)).is_ok();
            }
            if ok {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= SQLITE_MAX_FAILURES {
                    eprintln!(
                        "[BGPERF-DUAL] SQLite write failed {sqlite_failures} times in a row, \
                         disabling"
                    );
                    sqlite = None;
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── conversion ────────────────────

/// `None` for the shutdown sentinel.
fn to_log_entry(event: &ActivityEvent) -> Option<LogEntry> {
    let entry = match event {
        ActivityEvent::BenchStarted {
            run,
            target,
            required,
            neighbors,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::BenchStart, Severity::Info);
            e.run = Some(run.clone());
            e.target = Some(target.clone());
            e.required = Some(*required);
            e.config_hash = Some(config_hash.clone());
            e.details = Some(format!("neighbors={neighbors}"));
            e
        }
        ActivityEvent::SnapshotWritten {
            run,
            path,
            elapsed_secs,
        } => {
            let mut e = LogEntry::new(EventType::Snapshot, Severity::Info);
            e.run = Some(run.clone());
            e.path = Some(path.clone());
            e.elapsed_secs = Some(*elapsed_secs);
            e.ok = Some(true);
            e
        }
        ActivityEvent::BenchFinished(summary) => {
            let failed = summary.message.is_some();
            let mut e = LogEntry::new(
                EventType::BenchFinish,
                if failed { Severity::Warning } else { Severity::Info },
            );
            e.run = Some(summary.run.clone());
            e.target = Some(summary.target.clone());
            e.outcome = Some(summary.outcome.clone());
            e.elapsed_secs = Some(summary.elapsed_secs);
            e.recved = Some(summary.recved);
            e.required = Some(summary.required);
            e.ok = Some(!failed);
            e.details = summary.message.clone();
            e
        }
        ActivityEvent::BatchStarted { name, cases } => {
            let mut e = LogEntry::new(EventType::BatchStart, Severity::Info);
            e.run = Some(name.clone());
            e.details = Some(format!("cases={cases}"));
            e
        }
        ActivityEvent::BatchFinished {
            name,
            completed,
            skipped,
            interrupted,
        } => {
            let mut e = LogEntry::new(
                EventType::BatchFinish,
                if *interrupted || *skipped > 0 { Severity::Warning } else { Severity::Info },
            );
            e.run = Some(name.clone());
            e.ok = Some(!*interrupted && *skipped == 0);
            e.details = Some(format!(
                "completed={completed} skipped={skipped} interrupted={interrupted}"
            ));
            e
        }
        ActivityEvent::CollaboratorError {
            component,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::CollaboratorError, Severity::Warning);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.details = Some(format!("component={component}"));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => return None,
    };
    Some(entry)
}

#[cfg(feature = "sqlite")]
fn to_event_row(entry: &LogEntry) -> EventRow {
    let severity = match entry.severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    };
    EventRow {
        timestamp: entry.ts.clone(),
        event_type: entry.event.as_str().to_string(),
        severity: severity.to_string(),
        run: entry.run.clone(),
        ok: entry.ok,
        error_code: entry.error_code.clone(),
        error_message: entry.error_message.clone(),
        details: entry.details.clone(),
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn to_run_row(finished_at: &str, summary: &RunSummary) -> RunRow {
    RunRow {
        finished_at: finished_at.to_string(),
        name: summary.run.clone(),
        target: summary.target.clone(),
        version: summary.version.clone(),
        neighbors: summary.neighbors as i64,
        prefixes: summary.prefixes as i64,
        required: summary.required as i64,
        recved: summary.recved as i64,
        elapsed_secs: summary.elapsed_secs as i64,
        total_secs: summary.total_secs,
        outcome: summary.outcome.clone(),
        message: summary.message.clone(),
    }
}

//! SQLite run history: WAL-mode database holding activity events and one
//! row per finished benchmark run.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;

use crate::core::errors::{BenchError, Result};

pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| BenchError::io(parent, source))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_event(&self, row: &EventRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO events (
                    timestamp, event_type, severity, run, ok, error_code, error_message, details
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.run,
                row.ok,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    pub fn log_run(&self, row: &RunRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO runs (
                    finished_at, name, target, version, neighbors, prefixes, required,
                    recved, elapsed_secs, total_secs, outcome, message
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            )?
            .execute(params![
                row.finished_at,
                row.name,
                row.target,
                row.version,
                row.neighbors,
                row.prefixes,
                row.required,
                row.recved,
                row.elapsed_secs,
                row.total_secs,
                row.outcome,
                row.message,
            ])?;
        Ok(())
    }

    /// Most recent runs first, optionally restricted to one target.
    pub fn recent_runs(&self, target: Option<&str>, limit: u32) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT finished_at, name, target, version, neighbors, prefixes, required,
                    recved, elapsed_secs, total_secs, outcome, message
             FROM runs
             WHERE ?1 IS NULL OR target = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![target, limit], |row| {
                Ok(RunRow {
                    finished_at: row.get(0)?,
                    name: row.get(1)?,
                    target: row.get(2)?,
                    version: row.get(3)?,
                    neighbors: row.get(4)?,
                    prefixes: row.get(5)?,
                    required: row.get(6)?,
                    recved: row.get(7)?,
                    elapsed_secs: row.get(8)?,
                    total_secs: row.get(9)?,
                    outcome: row.get(10)?,
                    message: row.get(11)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_events(&self, event_type: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .is_ok_and(|mode| mode.eq_ignore_ascii_case("wal"))
    }
}

/// Row of the `events` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub run: Option<String>,
    pub ok: Option<bool>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

/// Row of the `runs` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRow {
    pub finished_at: String,
    pub name: String,
    pub target: String,
    pub version: String,
    pub neighbors: i64,
    pub prefixes: i64,
    pub required: i64,
    pub recved: i64,
    pub elapsed_secs: i64,
    pub total_secs: f64,
    pub outcome: String,
    pub message: Option<String>,
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[BGPERF-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            run TEXT,
            ok INTEGER,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);

        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            finished_at TEXT NOT NULL,
            name TEXT NOT NULL,
            target TEXT NOT NULL,
            version TEXT NOT NULL,
            neighbors INTEGER NOT NULL,
            prefixes INTEGER NOT NULL,
            required INTEGER NOT NULL,
            recved INTEGER NOT NULL,
            elapsed_secs INTEGER NOT NULL,
            total_secs REAL NOT NULL,
            outcome TEXT NOT NULL,
            message TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_target ON runs(target);",
    )?;
    Ok(())
}

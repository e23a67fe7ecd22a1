//! Heartbeat time series handed to the graphing collaborator.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// One row per monitor heartbeat, in the order graphing tools expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub elapsed_secs: u64,
    pub cpu_percent: f64,
    pub mem_bytes: u64,
    pub recved: u64,
    pub neighbors_checked: usize,
    pub idle_percent: f64,
    pub free_bytes: u64,
}

impl SeriesRow {
    pub const COLUMNS: [&'static str; 7] = [
        "elapsed_secs",
        "cpu_percent",
        "mem_bytes",
        "recved",
        "neighbors_checked",
        "idle_percent",
        "free_bytes",
    ];

    /// CPU is kept at two decimals, matching the progress line.
    #[must_use]
    pub fn to_fields(&self) -> [String; 7] {
        [
            self.elapsed_secs.to_string(),
            format!("{:.2}", self.cpu_percent),
            self.mem_bytes.to_string(),
            self.recved.to_string(),
            self.neighbors_checked.to_string(),
            self.idle_percent.to_string(),
            self.free_bytes.to_string(),
        ]
    }
}

/// Append-only accumulation of heartbeat rows for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    rows: Vec<SeriesRow>,
}

impl TimeSeries {
    #[must_use]
    pub const fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn push(&mut self, row: SeriesRow) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn rows(&self) -> &[SeriesRow] {
        &self.rows
    }

    #[must_use]
    pub fn last(&self) -> Option<&SeriesRow> {
        self.rows.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

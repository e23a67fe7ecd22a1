//! Time-series emission to the graphing collaborator.
//!
//! The core only hands over the accumulated rows and a label; turning them
//! into images happens elsewhere. [`CsvSeriesSink`] is the built-in sink.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{BenchError, Result};
use crate::monitor::series::{SeriesRow, TimeSeries};

/// Receiver of periodic and final time-series emissions.
///
/// Periodic snapshots and the final emission share the same `prefix`.
pub trait GraphSink: Send {
    /// Returns where the series ended up.
    fn emit(&mut self, prefix: &str, series: &TimeSeries) -> Result<PathBuf>;
}

/// Writes `{prefix}_series.csv` under a directory, replacing it on every emission.
#[derive(Debug, Clone)]
pub struct CsvSeriesSink {
    dir: PathBuf,
}

impl CsvSeriesSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path_for(&self, prefix: &str) -> PathBuf {
        self.dir.join(format!("{prefix}_series.csv"))
    }
}

impl GraphSink for CsvSeriesSink {
    fn emit(&mut self, prefix: &str, series: &TimeSeries) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|source| BenchError::io(&self.dir, source))?;
        let path = self.path_for(prefix);
        write_series(&path, series.rows())?;
        Ok(path)
    }
}

fn write_series(path: &Path, rows: &[SeriesRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(SeriesRow::COLUMNS)?;
    for row in rows {
        writer.write_record(row.to_fields())?;
    }
    writer.flush().map_err(|source| BenchError::io(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(elapsed_secs: u64, recved: u64) -> SeriesRow {
        SeriesRow {
            elapsed_secs,
            cpu_percent: 12.5,
            mem_bytes: 1 << 20,
            recved,
            neighbors_checked: 1,
            idle_percent: 90.0,
            free_bytes: 1 << 30,
        }
    }

    #[test]
    fn emission_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSeriesSink::new(dir.path());
        let mut series = TimeSeries::new();
        series.push(row(1, 10));
        let path = sink.emit("gobgp_bird_100_2", &series).unwrap();
        assert!(path.ends_with("gobgp_bird_100_2_series.csv"));

        series.push(row(2, 20));
        sink.emit("gobgp_bird_100_2", &series).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "elapsed_secs,cpu_percent,mem_bytes,recved,neighbors_checked,idle_percent,free_bytes"
        );
        assert_eq!(lines[2], "2,12.50,1048576,20,1,90,1073741824");
    }
}

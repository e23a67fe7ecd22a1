//! Batch driver: run the cross-product of targets, neighbor counts and
//! prefix counts, persisting the result table after every run.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bench::report::{self, ResultRecord};
use crate::bench::runner::{Collaborators, RunSettings, run_benchmark};
use crate::core::config::{CaseSpec, Config};
use crate::core::errors::{BenchError, Result};
use crate::core::scenario::ScenarioPlan;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

// ──────────────────── batch file ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    pub tests: Vec<BatchTest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTest {
    pub name: String,
    pub neighbors: Vec<usize>,
    pub prefixes: Vec<u64>,
    pub targets: Vec<BatchTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTarget {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub local_address_prefix: Option<String>,
    #[serde(default)]
    pub single_table: bool,
    #[serde(default)]
    pub tester_type: Option<String>,
    #[serde(default)]
    pub remote: bool,
}

impl BatchFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| BenchError::io(path, source))?;
        let batch: Self = toml::from_str(&raw)?;
        batch.validate()?;
        Ok(batch)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tests.is_empty() {
            return Err(BenchError::InvalidConfig {
                details: "batch file defines no [[tests]]".to_string(),
            });
        }
        for test in &self.tests {
            if test.name.trim().is_empty() {
                return Err(BenchError::InvalidConfig {
                    details: "batch test name must not be empty".to_string(),
                });
            }
            if test.neighbors.is_empty() || test.prefixes.is_empty() || test.targets.is_empty() {
                return Err(BenchError::InvalidConfig {
                    details: format!(
                        "batch test {:?} needs at least one neighbors, prefixes and targets entry",
                        test.name
                    ),
                });
            }
        }
        Ok(())
    }
}

impl BatchTest {
    /// Cases in run order: neighbors, then prefixes, then targets.
    #[must_use]
    pub fn cases(&self) -> Vec<CaseSpec> {
        let mut cases =
            Vec::with_capacity(self.neighbors.len() * self.prefixes.len() * self.targets.len());
        for &neighbor_num in &self.neighbors {
            for &prefix_num in &self.prefixes {
                for target in &self.targets {
                    cases.push(CaseSpec {
                        test_name: self.name.clone(),
                        target: target.name.clone(),
                        label: target.label.clone(),
                        local_address_prefix: target.local_address_prefix.clone(),
                        tester_type: target.tester_type.clone(),
                        single_table: target.single_table,
                        remote: target.remote,
                        neighbor_num,
                        prefix_num,
                    });
                }
            }
        }
        cases
    }

    #[must_use]
    pub fn results_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.csv", self.name))
    }
}

// ──────────────────── execution ────────────────────

/// "Run one benchmark, return one result record."
pub trait RunExecutor {
    fn execute(&mut self, cfg: &Config) -> Result<ResultRecord>;
}

/// Executor that drives real command-backed collaborators.
pub struct LiveExecutor {
    pub settings: RunSettings,
    pub logger: ActivityLoggerHandle,
}

impl RunExecutor for LiveExecutor {
    fn execute(&mut self, cfg: &Config) -> Result<ResultRecord> {
        let plan = ScenarioPlan::from_config(&cfg.scenario)?;
        let collaborators = Collaborators::from_config(cfg, &plan)?;
        run_benchmark(cfg, &self.settings, collaborators, &self.logger).map(|report| report.record)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSummary {
    pub name: String,
    pub results_path: PathBuf,
    pub records: Vec<ResultRecord>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub tests: Vec<TestSummary>,
    pub interrupted: bool,
}

impl BatchSummary {
    #[must_use]
    pub fn completed(&self) -> usize {
        self.tests.iter().map(|t| t.records.len()).sum()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.tests.iter().map(|t| t.skipped).sum()
    }
}

/// Run every case of every test.
///
/// `should_stop` is checked before each case; once it returns true the
/// batch ends after the run in progress. A case whose run fails fatally is
/// logged and skipped.
pub fn run_batch(
    batch: &BatchFile,
    base: &Config,
    executor: &mut dyn RunExecutor,
    should_stop: &dyn Fn() -> bool,
    logger: &ActivityLoggerHandle,
    echo: bool,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();
    let output_dir = &base.paths.output_dir;

    'tests: for test in &batch.tests {
        let cases = test.cases();
        logger.send(ActivityEvent::BatchStarted {
            name: test.name.clone(),
            cases: cases.len(),
        });
        let mut current = TestSummary {
            name: test.name.clone(),
            results_path: test.results_path(output_dir),
            ..TestSummary::default()
        };

        for case in &cases {
            if should_stop() {
                summary.interrupted = true;
                finish_test(&mut summary, current, logger, echo)?;
                break 'tests;
            }
            let outcome = base.for_case(case).and_then(|cfg| {
                if echo {
                    println!(
                        "[BGPERF-BATCH] {}: {} neighbors={} prefixes={}",
                        test.name, case.target, case.neighbor_num, case.prefix_num
                    );
                }
                executor.execute(&cfg)
            });
            match outcome {
                Ok(record) => {
                    current.records.push(record);
                    report::write_results(&current.results_path, &current.records)?;
                }
                Err(e) => {
                    let message = format!(
                        "skipping {} ({} neighbors, {} prefixes): {e}",
                        case.target, case.neighbor_num, case.prefix_num
                    );
                    eprintln!("[BGPERF-BATCH] {message}");
                    logger.send(ActivityEvent::Error {
                        code: e.code().to_string(),
                        message,
                    });
                    current.skipped += 1;
                }
            }
        }
        finish_test(&mut summary, current, logger, echo)?;
    }
    Ok(summary)
}

fn finish_test(
    summary: &mut BatchSummary,
    test: TestSummary,
    logger: &ActivityLoggerHandle,
    echo: bool,
) -> Result<()> {
    if echo {
        println!();
        println!("{}", report::header_line()?);
        for record in &test.records {
            println!("{}", record.to_csv_line()?);
        }
    }
    logger.send(ActivityEvent::BatchFinished {
        name: test.name.clone(),
        completed: test.records.len(),
        skipped: test.skipped,
        interrupted: summary.interrupted,
    });
    summary.tests.push(test);
    Ok(())
}

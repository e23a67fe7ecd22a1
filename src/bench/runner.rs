//! Lifecycle of one benchmark run: prepare the target, wait for the
//! monitoring session, start the producers, drive the convergence monitor
//! until a terminal state, then finalize the result record.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, Utc};

use crate::bench::graphs::{CsvSeriesSink, GraphSink};
use crate::bench::report::{self, ResultRecord, RunFacts};
use crate::core::config::Config;
use crate::core::errors::{BenchError, Result};
use crate::core::scenario::ScenarioPlan;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, RunSummary};
use crate::monitor::convergence::{BenchmarkState, ConvergenceMonitor, RunOutcome, Thresholds};
use crate::monitor::queue::sample_queue;
use crate::monitor::series::TimeSeries;
use crate::platform::collaborators::{
    ContainerStatsFeed, MonitorControl, TargetControl, TargetLifecycle, TesterDiagnostics,
};
use crate::platform::exec::{CommandStatsFeed, ExecMonitor, ExecTarget, LogScanDiagnostics};
use crate::platform::pal::{HardwareInfo, Platform, detect_platform};
use crate::sampler::controller::{run_free_memory_sampler, run_idle_sampler};
use crate::sampler::peer::{run_monitor_sampler, wait_established};
use crate::sampler::target::{run_neighbor_sampler, run_resource_sampler};
use crate::sampler::{CancellationToken, ProducerSet};

const UNKNOWN_VERSION: &str = "unknown";

// ──────────────────── inputs ────────────────────

/// Per-run knobs that are not part of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Write every dequeued sample here as a JSON line.
    pub record_path: Option<PathBuf>,
    /// Progress file receiving one line per heartbeat.
    pub progress_path: Option<PathBuf>,
    /// Print progress and the final report to stdout.
    pub echo: bool,
    pub color: bool,
}

/// Everything outside the process that a run talks to.
pub struct Collaborators {
    pub target: Arc<dyn TargetControl>,
    /// Absent for remote targets managed elsewhere.
    pub lifecycle: Option<Arc<dyn TargetLifecycle>>,
    pub monitor: Arc<dyn MonitorControl>,
    /// Absent when container stats are unavailable (remote targets).
    pub stats: Option<Box<dyn ContainerStatsFeed>>,
    pub diagnostics: Arc<dyn TesterDiagnostics>,
    pub platform: Arc<dyn Platform>,
    pub graphs: Box<dyn GraphSink>,
}

impl Collaborators {
    /// Command-backed collaborators described by `cfg`.
    pub fn from_config(cfg: &Config, plan: &ScenarioPlan) -> Result<Self> {
        let remote = cfg.scenario.remote;
        let target = Arc::new(ExecTarget::new(&cfg.target, plan));
        let lifecycle: Option<Arc<dyn TargetLifecycle>> =
            if remote { None } else { Some(Arc::clone(&target) as Arc<dyn TargetLifecycle>) };
        let stats: Option<Box<dyn ContainerStatsFeed>> =
            if remote || cfg.target.stats_cmd.is_empty() {
                None
            } else {
                Some(Box::new(CommandStatsFeed::spawn(&plan.expand_argv(&cfg.target.stats_cmd))?))
            };
        Ok(Self {
            target,
            lifecycle,
            monitor: Arc::new(ExecMonitor::new(cfg, plan)),
            stats,
            diagnostics: Arc::new(LogScanDiagnostics::new(&cfg.testers)?),
            platform: detect_platform()?,
            graphs: Box::new(CsvSeriesSink::new(cfg.paths.output_dir.clone())),
        })
    }
}

// ──────────────────── outputs ────────────────────

#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: ScenarioPlan,
    pub record: ResultRecord,
    pub outcome: RunOutcome,
    pub state: BenchmarkState,
    pub series: TimeSeries,
    /// Scenario file handed to the target, when one was written.
    pub scenario_path: Option<PathBuf>,
}

// ──────────────────── run ────────────────────

/// Run one benchmark to a terminal state.
///
/// STALLED and REGRESSED are returned as data in the report. Errors mean no
/// meaningful record could be produced.
pub fn run_benchmark(
    cfg: &Config,
    settings: &RunSettings,
    collaborators: Collaborators,
    logger: &ActivityLoggerHandle,
) -> Result<RunReport> {
    let result = run_inner(cfg, settings, collaborators, logger);
    if let Err(e) = &result {
        logger.send(ActivityEvent::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        });
    }
    result
}

#[allow(clippy::too_many_lines)]
fn run_inner(
    cfg: &Config,
    settings: &RunSettings,
    collaborators: Collaborators,
    logger: &ActivityLoggerHandle,
) -> Result<RunReport> {
    let Collaborators {
        target,
        lifecycle,
        monitor,
        stats,
        diagnostics,
        platform,
        mut graphs,
    } = collaborators;
    let plan = ScenarioPlan::from_config(&cfg.scenario)?;
    let remote = cfg.scenario.remote;
    let name = cfg.run_label().to_string();
    let graph_prefix = plan.graph_prefix();
    let bench_start = Instant::now();

    let scenario_path = match &lifecycle {
        Some(lifecycle) if !remote => {
            let dir = cfg.paths.output_dir.join(&plan.name);
            let path = lifecycle.write_config(&plan, &dir)?;
            lifecycle.startup()?;
            Some(path)
        }
        _ => None,
    };

    let token = CancellationToken::new();
    let monitor_wait = wait_established(
        monitor.as_ref(),
        Duration::from_millis(cfg.sampling.monitor_interval_ms),
        Duration::from_secs(cfg.sampling.establish_timeout_secs),
        &token,
    )?;
    if settings.echo {
        println!(
            "[BGPERF-RUN] monitor established after {}s, required {} routes",
            monitor_wait.as_secs(),
            plan.required
        );
    }

    let (tx, rx) = sample_queue();
    let mut producers = ProducerSet::new(token);
    {
        let monitor = Arc::clone(&monitor);
        let tx = tx.clone();
        let interval = Duration::from_millis(cfg.sampling.monitor_interval_ms);
        producers.spawn("monitor", move |token| {
            run_monitor_sampler(&monitor, interval, &tx, &token);
        })?;
    }
    if !remote {
        if let Some(feed) = stats {
            let tx = tx.clone();
            producers.spawn("resource", move |token| run_resource_sampler(feed, &tx, &token))?;
        }
        let target = Arc::clone(&target);
        let checkpoints = plan.neighbor_checkpoints();
        let tx = tx.clone();
        let interval = Duration::from_millis(cfg.sampling.neighbor_interval_ms);
        producers.spawn("neighbors", move |token| {
            run_neighbor_sampler(&target, &checkpoints, interval, &tx, &token);
        })?;
    }
    {
        let platform = Arc::clone(&platform);
        let tx = tx.clone();
        let window = Duration::from_millis(cfg.sampling.idle_window_ms);
        producers.spawn("idle", move |token| run_idle_sampler(&platform, window, &tx, &token))?;
    }
    {
        let platform = Arc::clone(&platform);
        let tx = tx.clone();
        let interval = Duration::from_millis(cfg.sampling.free_memory_interval_ms);
        producers.spawn("free-memory", move |token| {
            run_free_memory_sampler(&platform, interval, &tx, &token);
        })?;
    }
    // Only producers hold senders now; if they all exit the queue reports closed.
    drop(tx);

    logger.send(ActivityEvent::BenchStarted {
        run: name.clone(),
        target: plan.target.clone(),
        required: plan.required,
        neighbors: plan.neighbors.len(),
        config_hash: cfg.stable_hash()?,
    });

    let mut recorder = settings.record_path.as_deref().map(open_writer).transpose()?;
    let mut progress = settings.progress_path.as_deref().map(open_writer).transpose()?;

    let mut convergence = ConvergenceMonitor::new(
        Utc::now(),
        plan.required,
        plan.neighbors.len(),
        remote,
        Thresholds::from(&cfg.thresholds),
    );
    let driven = convergence.run(&rx, |monitor, sample, observation| {
        if let Some((path, writer)) = recorder.as_mut() {
            serde_json::to_writer(&mut *writer, sample)?;
            writer.write_all(b"\n").map_err(|source| BenchError::io(&*path, source))?;
        }
        if let Some(row) = &observation.heartbeat {
            if settings.echo {
                println!("{}", report::progress_line(row));
            }
            if let Some((path, writer)) = progress.as_mut() {
                writeln!(writer, "{}", report::progress_file_line(row))
                    .and_then(|()| writer.flush())
                    .map_err(|source| BenchError::io(&*path, source))?;
            }
        }
        if observation.snapshot_due {
            emit_series(
                graphs.as_mut(),
                &graph_prefix,
                monitor.series(),
                &name,
                monitor.state(),
                logger,
            );
        }
        Ok(())
    });
    // Producers are told to stop but never awaited; late samples stay in the queue.
    producers.cancel();
    drop(rx);
    let outcome = driven?;

    for (path, mut writer) in recorder.into_iter().chain(progress) {
        writer.flush().map_err(|source| BenchError::io(&path, source))?;
    }

    let (state, series, _) = convergence.into_parts();
    let tester_errors = best_effort(logger, "testers", diagnostics.error_count(), 0);
    let tester_timeouts = best_effort(logger, "testers", diagnostics.timeout_count(), 0);
    let version = best_effort(logger, "target", target.version(), UNKNOWN_VERSION.to_string());
    let hardware =
        best_effort(logger, "platform", platform.hardware_info(), HardwareInfo::default());
    let total = bench_start.elapsed();

    let facts = RunFacts {
        name: &name,
        plan: &plan,
        single_table: cfg.scenario.single_table,
        version: &version,
        monitor_wait,
        total,
        hardware,
        tester_errors,
        tester_timeouts,
        date: Local::now().date_naive(),
    };
    let record = ResultRecord::from_run(&facts, &state, &outcome);

    if settings.echo {
        print!("{}", report::render_report(&record, &state, settings.color)?);
        println!();
    }
    emit_series(graphs.as_mut(), &graph_prefix, &series, &name, &state, logger);

    logger.send(ActivityEvent::BenchFinished(RunSummary {
        run: name,
        target: plan.target.clone(),
        version,
        neighbors: plan.neighbors.len(),
        prefixes: plan.prefix_num,
        required: state.required,
        recved: state.recved,
        elapsed_secs: state.elapsed.as_secs(),
        total_secs: total.as_secs_f64(),
        outcome: outcome.label().to_string(),
        message: outcome.message().map(str::to_string),
    }));

    Ok(RunReport {
        plan,
        record,
        outcome,
        state,
        series,
        scenario_path,
    })
}

fn open_writer(path: &Path) -> Result<(PathBuf, BufWriter<File>)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| BenchError::io(parent, source))?;
    }
    let file = File::create(path).map_err(|source| BenchError::io(path, source))?;
    Ok((path.to_path_buf(), BufWriter::new(file)))
}

/// Graph emissions never affect the run; failures are only logged.
fn emit_series(
    sink: &mut dyn GraphSink,
    prefix: &str,
    series: &TimeSeries,
    run: &str,
    state: &BenchmarkState,
    logger: &ActivityLoggerHandle,
) {
    match sink.emit(prefix, series) {
        Ok(path) => logger.send(ActivityEvent::SnapshotWritten {
            run: run.to_string(),
            path: path.display().to_string(),
            elapsed_secs: state.elapsed.as_secs(),
        }),
        Err(e) => {
            eprintln!("[BGPERF-RUN] series emission failed: {e}");
            log_collaborator_error(logger, "graphs", &e);
        }
    }
}

fn best_effort<T>(
    logger: &ActivityLoggerHandle,
    component: &str,
    value: Result<T>,
    fallback: T,
) -> T {
    value.unwrap_or_else(|e| {
        eprintln!("[BGPERF-RUN] {component}: {e}");
        log_collaborator_error(logger, component, &e);
        fallback
    })
}

fn log_collaborator_error(logger: &ActivityLoggerHandle, component: &str, error: &BenchError) {
    logger.send(ActivityEvent::CollaboratorError {
        component: component.to_string(),
        code: error.code().to_string(),
        message: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::cpu::DockerStats;
    use crate::platform::collaborators::{
        FixedDiagnostics, MonitorReading, ScriptedMonitor, ScriptedTarget, VecStatsFeed,
    };
    use crate::platform::pal::{CpuTimes, MemoryInfo, MockPlatform};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default, Clone)]
    struct MemorySink {
        emissions: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl GraphSink for MemorySink {
        fn emit(&mut self, prefix: &str, series: &TimeSeries) -> Result<PathBuf> {
            self.emissions.lock().push((prefix.to_string(), series.len()));
            Ok(PathBuf::from(prefix))
        }
    }

    fn fast_config(dir: &Path, remote: bool) -> Config {
        let mut cfg = Config::default();
        cfg.scenario.neighbor_num = 2;
        cfg.scenario.prefix_num = 100;
        cfg.scenario.remote = remote;
        cfg.sampling.neighbor_interval_ms = 1;
        cfg.sampling.free_memory_interval_ms = 1;
        cfg.sampling.idle_window_ms = 1;
        cfg.sampling.monitor_interval_ms = 1;
        cfg.sampling.establish_timeout_secs = 5;
        cfg.thresholds.stall_samples = 50;
        cfg.paths.output_dir = dir.to_path_buf();
        cfg
    }

    fn platform() -> Arc<dyn Platform> {
        Arc::new(MockPlatform::new(
            vec![
                CpuTimes {
                    idle: 100,
                    user: 100,
                    ..CpuTimes::default()
                },
                CpuTimes {
                    idle: 150,
                    user: 150,
                    ..CpuTimes::default()
                },
            ],
            vec![MemoryInfo {
                total_bytes: 8 << 30,
                free_bytes: 1 << 30,
                available_bytes: 2 << 30,
            }],
            HardwareInfo {
                cores: 4,
                total_memory_bytes: 8 << 30,
            },
        ))
    }

    fn collaborators(
        accepted: Vec<BTreeMap<String, u64>>,
        readings: Vec<MonitorReading>,
        version: Option<&str>,
        sink: MemorySink,
    ) -> Collaborators {
        let target = Arc::new(ScriptedTarget::new(accepted, version));
        Collaborators {
            target: Arc::clone(&target) as Arc<dyn TargetControl>,
            lifecycle: Some(target),
            monitor: Arc::new(ScriptedMonitor::new(readings).establish_after(1)),
            stats: Some(Box::new(VecStatsFeed::new(vec![DockerStats::default()]))),
            diagnostics: Arc::new(FixedDiagnostics {
                errors: 1,
                timeouts: 0,
            }),
            platform: platform(),
            graphs: Box::new(sink),
        }
    }

    fn full_neighbors() -> BTreeMap<String, u64> {
        BTreeMap::from([("10.10.0.3".to_string(), 100), ("10.10.0.4".to_string(), 100)])
    }

    #[test]
    fn converges_with_scripted_collaborators() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fast_config(dir.path(), false);
        let sink = MemorySink::default();
        let readings = vec![
            MonitorReading {
                accepted: 0,
                all_testers_checked: false,
            },
            MonitorReading {
                accepted: 120,
                all_testers_checked: false,
            },
            MonitorReading {
                accepted: 200,
                all_testers_checked: true,
            },
        ];
        let settings = RunSettings {
            record_path: Some(dir.path().join("samples.jsonl")),
            progress_path: Some(dir.path().join("progress.txt")),
            ..RunSettings::default()
        };
        let report = run_benchmark(
            &cfg,
            &settings,
            collaborators(vec![BTreeMap::new(), full_neighbors()], readings, Some("3.25.0"), sink.clone()),
            &ActivityLoggerHandle::disabled(),
        )
        .unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.record.recved, 200);
        assert_eq!(report.record.version, "3.25.0");
        assert_eq!(report.record.cores, 4);
        assert_eq!(report.record.tester_errors, 1);
        assert!(!report.record.failed);
        assert!(report.scenario_path.unwrap().ends_with("bgperf/scenario.toml"));

        let emissions = sink.emissions.lock();
        let last = emissions.last().unwrap();
        assert_eq!(last.0, "gobgp_bird_100_2");
        assert_eq!(last.1, report.series.len());

        let recorded = std::fs::read_to_string(dir.path().join("samples.jsonl")).unwrap();
        assert!(recorded.lines().any(|l| l.contains("\"kind\":\"routes\"")));
        let progress = std::fs::read_to_string(dir.path().join("progress.txt")).unwrap();
        assert_eq!(progress.lines().count(), report.series.len());
    }

    #[test]
    fn flat_monitor_stalls_and_version_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fast_config(dir.path(), true);
        let readings = vec![MonitorReading {
            accepted: 150,
            all_testers_checked: false,
        }];
        let report = run_benchmark(
            &cfg,
            &RunSettings::default(),
            collaborators(Vec::new(), readings, None, MemorySink::default()),
            &ActivityLoggerHandle::disabled(),
        )
        .unwrap();

        assert!(matches!(report.outcome, RunOutcome::Stalled { .. }));
        assert!(report.record.failed);
        assert!(report.record.message.contains("stuck"));
        assert_eq!(report.record.version, UNKNOWN_VERSION);
        assert!(report.scenario_path.is_none());
    }

    #[test]
    fn unestablished_monitor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = fast_config(dir.path(), true);
        cfg.sampling.establish_timeout_secs = 0;
        let mut collab = collaborators(Vec::new(), Vec::new(), Some("x"), MemorySink::default());
        collab.monitor = Arc::new(ScriptedMonitor::new(Vec::new()).establish_after(usize::MAX));
        let err = run_benchmark(&cfg, &RunSettings::default(), collab, &ActivityLoggerHandle::disabled())
            .expect_err("monitor never comes up");
        assert_eq!(err.code(), "BGP-2002");
    }
}

//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::control;
use serde_json::{Value, json};
use thiserror::Error;

use bgperf::bench::batch::{BatchFile, LiveExecutor, run_batch};
use bgperf::bench::replay::{ReplayParams, replay_file};
use bgperf::bench::runner::{Collaborators, RunSettings, run_benchmark};
use bgperf::bench::signals::StopSignal;
use bgperf::core::config::Config;
use bgperf::core::errors::BenchError;
use bgperf::core::scenario::ScenarioPlan;
use bgperf::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use bgperf::logger::sqlite::SqliteLogger;
use bgperf::monitor::convergence::Thresholds;

/// BGP daemon benchmark driver.
#[derive(Debug, Parser)]
#[command(
    name = "bgperf",
    author,
    version,
    about = "Benchmark BGP daemons and classify each run as converged, stalled or regressed",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Quiet mode (errors and final results only).
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run one benchmark until it converges, stalls or regresses.
    Bench(BenchArgs),
    /// Run every case of a batch file.
    Batch(BatchArgs),
    /// Feed a recorded sample stream through the convergence monitor.
    Replay(ReplayArgs),
    /// Print the derived scenario plan.
    Scenario(ScenarioArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Show recent runs from the history database.
    History(HistoryArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Scenario fields that can be set on the command line.
#[derive(Debug, Clone, Args, Default)]
struct ScenarioOverrides {
    /// Target daemon (gobgp, bird, frr, ...).
    #[arg(short, long)]
    target: Option<String>,
    /// Number of tester neighbors.
    #[arg(short, long, value_name = "COUNT")]
    neighbors: Option<usize>,
    /// Prefixes advertised per neighbor.
    #[arg(short, long, value_name = "COUNT")]
    prefixes: Option<u64>,
    /// Tester implementation.
    #[arg(long, value_name = "TYPE")]
    tester_type: Option<String>,
    /// Name written in the first result column.
    #[arg(long)]
    label: Option<String>,
    /// Fraction of the advertised routes required for success.
    #[arg(long, value_name = "FACTOR")]
    required_factor: Option<f64>,
    /// Target runs in single-table mode.
    #[arg(short, long)]
    single_table: bool,
    /// Target is managed outside this host.
    #[arg(long)]
    remote: bool,
}

impl ScenarioOverrides {
    fn apply(&self, cfg: &mut Config) -> Result<(), CliError> {
        let scenario = &mut cfg.scenario;
        if let Some(target) = &self.target {
            scenario.target.clone_from(target);
        }
        if let Some(neighbors) = self.neighbors {
            scenario.neighbor_num = neighbors;
        }
        if let Some(prefixes) = self.prefixes {
            scenario.prefix_num = prefixes;
        }
        if let Some(tester_type) = &self.tester_type {
            scenario.tester_type.clone_from(tester_type);
        }
        if self.label.is_some() {
            scenario.label.clone_from(&self.label);
        }
        if self.required_factor.is_some() {
            scenario.required_factor = self.required_factor;
        }
        scenario.single_table |= self.single_table;
        scenario.remote |= self.remote;
        cfg.validate().map_err(CliError::from)
    }
}

#[derive(Debug, Clone, Args)]
struct BenchArgs {
    #[command(flatten)]
    scenario: ScenarioOverrides,
    /// Record every sample as a JSON line for later replay.
    #[arg(long, value_name = "PATH")]
    record: Option<PathBuf>,
    /// Write per-heartbeat progress lines to this file.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct BatchArgs {
    /// Batch definition (TOML).
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// Sample file written by `bench --record`.
    #[arg(value_name = "PATH")]
    path: PathBuf,
    /// Monitor checkpoint of the recorded run.
    #[arg(long, value_name = "COUNT")]
    required: u64,
    /// Number of tester neighbors of the recorded run.
    #[arg(long, value_name = "COUNT")]
    neighbors: usize,
    /// Recorded run had a remote target.
    #[arg(long)]
    remote: bool,
}

#[derive(Debug, Clone, Args)]
struct ScenarioArgs {
    #[command(flatten)]
    scenario: ScenarioOverrides,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Only show runs of this target.
    #[arg(short, long)]
    target: Option<String>,
    /// Maximum number of runs to show.
    #[arg(short, long, default_value_t = 20)]
    limit: u32,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<BenchError> for CliError {
    fn from(error: BenchError) -> Self {
        // 1xxx codes are configuration and scenario problems the user can fix.
        if error.code().starts_with("BGP-1") {
            Self::User(error.to_string())
        } else {
            Self::Runtime(error.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Bench(args) => run_bench(cli, args),
        Command::Batch(args) => run_batch_command(cli, args),
        Command::Replay(args) => run_replay(cli, args),
        Command::Scenario(args) => run_scenario(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::History(args) => run_history(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── bench / batch ────────────────────

struct LoggerGuard {
    handle: ActivityLoggerHandle,
    join: Option<JoinHandle<()>>,
}

impl LoggerGuard {
    fn start(cfg: &Config) -> Self {
        let config = DualLoggerConfig::new(
            cfg.paths.activity_log.clone(),
            Some(cfg.paths.sqlite_db.clone()),
        );
        match spawn_logger(config) {
            Ok((handle, join)) => Self {
                handle,
                join: Some(join),
            },
            Err(e) => {
                eprintln!("[BGPERF-RUN] activity logging disabled: {e}");
                Self {
                    handle: ActivityLoggerHandle::disabled(),
                    join: None,
                }
            }
        }
    }
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_settings(cli: &Cli, mode: OutputMode) -> RunSettings {
    RunSettings {
        record_path: None,
        progress_path: None,
        echo: mode == OutputMode::Human && !cli.quiet,
        color: !cli.no_color && io::stdout().is_terminal(),
    }
}

fn run_bench(cli: &Cli, args: &BenchArgs) -> Result<(), CliError> {
    let mut cfg = Config::load(cli.config.as_deref())?;
    args.scenario.apply(&mut cfg)?;
    let plan = ScenarioPlan::from_config(&cfg.scenario)?;
    let mode = output_mode(cli);
    let settings = RunSettings {
        record_path: args.record.clone(),
        progress_path: args.output.clone(),
        ..run_settings(cli, mode)
    };

    let logger = LoggerGuard::start(&cfg);
    let collaborators = Collaborators::from_config(&cfg, &plan)?;
    let report = run_benchmark(&cfg, &settings, collaborators, &logger.handle)?;

    if mode == OutputMode::Json {
        let payload = json!({
            "command": "bench",
            "outcome": report.outcome.label(),
            "message": report.outcome.message(),
            "record": report.record,
            "state": report.state,
        });
        write_json_line(&payload)?;
    } else if cli.quiet {
        println!("{}", report.record.to_csv_line()?);
    }
    Ok(())
}

fn run_batch_command(cli: &Cli, args: &BatchArgs) -> Result<(), CliError> {
    let cfg = Config::load(cli.config.as_deref())?;
    let batch = BatchFile::load(&args.file)?;
    let mode = output_mode(cli);
    let settings = run_settings(cli, mode);

    let stop = StopSignal::install();
    let logger = LoggerGuard::start(&cfg);
    let mut executor = LiveExecutor {
        settings,
        logger: logger.handle.clone(),
    };
    let summary = run_batch(
        &batch,
        &cfg,
        &mut executor,
        &|| stop.should_stop(),
        &logger.handle,
        mode == OutputMode::Human && !cli.quiet,
    )?;

    if mode == OutputMode::Json {
        let tests: Vec<Value> = summary
            .tests
            .iter()
            .map(|test| {
                json!({
                    "name": test.name,
                    "results": test.results_path.to_string_lossy(),
                    "completed": test.records.len(),
                    "skipped": test.skipped,
                })
            })
            .collect();
        write_json_line(&json!({
            "command": "batch",
            "tests": tests,
            "interrupted": summary.interrupted,
        }))?;
    }

    if summary.interrupted {
        return Err(CliError::Partial(format!(
            "batch interrupted after {} runs",
            summary.completed()
        )));
    }
    if summary.skipped() > 0 {
        return Err(CliError::Partial(format!(
            "{} of {} runs failed to produce a result",
            summary.skipped(),
            summary.skipped() + summary.completed()
        )));
    }
    Ok(())
}

// ──────────────────── offline commands ────────────────────

fn run_replay(cli: &Cli, args: &ReplayArgs) -> Result<(), CliError> {
    let cfg = Config::load(cli.config.as_deref())?;
    let params = ReplayParams {
        required: args.required,
        neighbors: args.neighbors,
        remote: args.remote,
        thresholds: Thresholds::from(&cfg.thresholds),
    };
    let result = replay_file(&args.path, params)?;
    let label = result.outcome.as_ref().map_or("running", |o| o.label());

    match output_mode(cli) {
        OutputMode::Human => {
            println!("outcome: {label}");
            if let Some(message) = result.outcome.as_ref().and_then(|o| o.message()) {
                println!("message: {message}");
            }
            println!(
                "samples: {} read, {} consumed, {} heartbeats",
                result.samples_read, result.samples_consumed, result.heartbeats
            );
            let state = &result.state;
            println!("elapsed: {}s", state.elapsed.as_secs());
            println!("received: {} / {}", state.recved, state.required);
            println!("neighbors checked: {}", state.neighbors_checked_count);
            if let Some(first) = state.first_received_time {
                println!("first received: {}s", first.as_secs());
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "replay",
                "outcome": label,
                "result": result,
            }))?;
        }
    }
    Ok(())
}

fn run_scenario(cli: &Cli, args: &ScenarioArgs) -> Result<(), CliError> {
    let mut cfg = Config::load(cli.config.as_deref())?;
    args.scenario.apply(&mut cfg)?;
    let plan = ScenarioPlan::from_config(&cfg.scenario)?;
    match output_mode(cli) {
        OutputMode::Human => {
            let rendered = toml::to_string_pretty(&plan)
                .map_err(|e| CliError::Internal(format!("serialize scenario: {e}")))?;
            println!("{rendered}");
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "scenario",
                "plan": plan,
            }))?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let cfg = Config::load(cli.config.as_deref())?;
    let db = SqliteLogger::open(&cfg.paths.sqlite_db)?;
    let runs = db.recent_runs(args.target.as_deref(), args.limit)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if runs.is_empty() {
                println!("No runs recorded in {}", db.path().display());
            }
            for run in &runs {
                println!(
                    "{}  {:<12} {:<10} {:>4}n {:>8}p  {}/{}  {}s  {}{}",
                    run.finished_at,
                    run.name,
                    run.version,
                    run.neighbors,
                    run.prefixes,
                    run.recved,
                    run.required,
                    run.elapsed_secs,
                    run.outcome,
                    run.message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default(),
                );
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "history",
                "runs": runs,
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("BGPERF_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_subcommands() {
        let cases = [
            vec!["bgperf", "bench", "-t", "bird", "-n", "10", "-p", "1000"],
            vec!["bgperf", "bench", "--remote", "--record", "/tmp/s.jsonl", "-o", "/tmp/p.txt"],
            vec!["bgperf", "batch", "nightly.toml"],
            vec!["bgperf", "replay", "s.jsonl", "--required", "500", "--neighbors", "2"],
            vec!["bgperf", "scenario", "--tester-type", "bgpdump2", "-s"],
            vec!["bgperf", "config", "path"],
            vec!["bgperf", "config", "show"],
            vec!["bgperf", "config", "validate"],
            vec!["bgperf", "history", "--target", "gobgp", "--limit", "5"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn replay_requires_checkpoint_and_neighbors() {
        assert!(Cli::try_parse_from(["bgperf", "replay", "s.jsonl"]).is_err());
        assert!(Cli::try_parse_from(["bgperf", "replay", "s.jsonl", "--required", "5"]).is_err());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from(["bgperf", "config", "show", "--json", "--no-color", "-q"]).unwrap();
        assert!(cli.json && cli.no_color && cli.quiet);
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["bgperf", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn scenario_overrides_are_validated() {
        let mut cfg = Config::default();
        let overrides = ScenarioOverrides {
            neighbors: Some(0),
            ..ScenarioOverrides::default()
        };
        let err = overrides.apply(&mut cfg).expect_err("zero neighbors");
        assert_eq!(err.exit_code(), 1);

        let mut cfg = Config::default();
        let overrides = ScenarioOverrides {
            target: Some("bird".to_string()),
            prefixes: Some(500),
            remote: true,
            ..ScenarioOverrides::default()
        };
        overrides.apply(&mut cfg).unwrap();
        assert_eq!(cfg.scenario.target, "bird");
        assert_eq!(cfg.scenario.prefix_num, 500);
        assert!(cfg.scenario.remote);
    }

    #[test]
    fn bench_errors_map_to_exit_codes() {
        let user: CliError = BenchError::InvalidConfig {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);
        let runtime: CliError = BenchError::collaborator("monitor", "down").into();
        assert_eq!(runtime.exit_code(), 2);
    }
}

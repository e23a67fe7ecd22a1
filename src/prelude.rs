//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use bgperf::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{BenchError, Result};
pub use crate::core::scenario::ScenarioPlan;

// Platform
pub use crate::platform::collaborators::{
    ContainerStatsFeed, MonitorControl, TargetControl, TargetLifecycle, TesterDiagnostics,
};
pub use crate::platform::pal::{Platform, detect_platform};

// Monitor
pub use crate::monitor::convergence::{
    BenchmarkState, ConvergenceMonitor, RunOutcome, RunPhase, Thresholds,
};
pub use crate::monitor::queue::{SampleReceiver, SampleSender, sample_queue};
pub use crate::monitor::sample::{Payload, Sample, SampleSource};
pub use crate::monitor::series::{SeriesRow, TimeSeries};

// Bench
pub use crate::bench::batch::{BatchFile, RunExecutor, run_batch};
pub use crate::bench::replay::{ReplayParams, replay, replay_file};
pub use crate::bench::report::ResultRecord;
pub use crate::bench::runner::{Collaborators, RunReport, RunSettings, run_benchmark};

// Logger
pub use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

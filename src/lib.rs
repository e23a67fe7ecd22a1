#![forbid(unsafe_code)]

//! bgperf: a BGP daemon benchmark driver.
//!
//! A run feeds a target daemon routes from a set of tester neighbors while a
//! monitor peer counts what the target re-advertises. Independent sample
//! producers push tagged readings into one queue; a single convergence
//! monitor consumes them and classifies the run as converged, stalled or
//! regressed. Results land in a CSV table, a JSONL activity log and an
//! optional SQLite history.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use bgperf::prelude::*;
//! ```
//!
//! Offline replay of a recorded sample stream needs no collaborators:
//!
//! ```rust,no_run
//! use bgperf::bench::replay::{ReplayParams, replay_file};
//! use bgperf::monitor::convergence::Thresholds;
//!
//! let params = ReplayParams {
//!     required: 1000,
//!     neighbors: 10,
//!     remote: false,
//!     thresholds: Thresholds::default(),
//! };
//! let result = replay_file(std::path::Path::new("samples.jsonl"), params)?;
//! println!("{:?}", result.outcome);
//! # Ok::<(), bgperf::core::errors::BenchError>(())
//! ```

pub mod prelude;

pub mod bench;
pub mod core;
pub mod logger;
pub mod monitor;
pub mod platform;
pub mod sampler;

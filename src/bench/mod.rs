//! Benchmark lifecycle: single runs, batches, replay and result reporting.

pub mod batch;
pub mod graphs;
pub mod replay;
pub mod report;
pub mod runner;
#[cfg(feature = "signals")]
pub mod signals;

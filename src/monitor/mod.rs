//! Convergence monitoring: tagged samples, the sample queue, container CPU
//! accounting, the heartbeat time series and the convergence state machine.

pub mod convergence;
pub mod cpu;
pub mod queue;
pub mod sample;
pub mod series;

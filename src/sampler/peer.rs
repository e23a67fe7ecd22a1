//! Monitoring-peer producer and session establishment wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::core::errors::{BenchError, Result};
use crate::monitor::queue::SampleSender;
use crate::monitor::sample::Sample;
use crate::platform::collaborators::MonitorControl;
use crate::sampler::CancellationToken;

/// Poll the monitor every `interval`; each successful poll is one heartbeat sample.
pub fn run_monitor_sampler(
    monitor: &Arc<dyn MonitorControl>,
    interval: Duration,
    tx: &SampleSender,
    token: &CancellationToken,
) {
    while !token.is_cancelled() {
        match monitor.poll() {
            Ok(reading) => {
                let sample =
                    Sample::routes(Utc::now(), reading.accepted, reading.all_testers_checked);
                if !tx.send(sample) {
                    return;
                }
            }
            Err(e) => eprintln!("[BGPERF-SAMPLER] monitor poll: {e}"),
        }
        if !token.pause(interval) {
            return;
        }
    }
}

/// Block until the monitor reports an established session.
///
/// Query failures count as "not yet". Returns the time spent waiting.
pub fn wait_established(
    monitor: &dyn MonitorControl,
    poll_every: Duration,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<Duration> {
    let started = Instant::now();
    loop {
        if monitor.is_established().unwrap_or(false) {
            return Ok(started.elapsed());
        }
        if started.elapsed() >= timeout {
            return Err(BenchError::collaborator(
                "monitor",
                format!("session not established within {}s", timeout.as_secs()),
            ));
        }
        if !token.pause(poll_every) {
            return Err(BenchError::Interrupted {
                details: "cancelled while waiting for the monitor session".to_string(),
            });
        }
    }
}

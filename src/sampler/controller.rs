//! Host-wide producers running on the benchmark controller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::monitor::queue::SampleSender;
use crate::monitor::sample::Sample;
use crate::platform::pal::{Platform, idle_percent_between};
use crate::sampler::CancellationToken;

/// Measure idle CPU over back-to-back windows of `window`.
///
/// The window itself is the only wait between samples.
pub fn run_idle_sampler(
    platform: &Arc<dyn Platform>,
    window: Duration,
    tx: &SampleSender,
    token: &CancellationToken,
) {
    while !token.is_cancelled() {
        let before = match platform.cpu_times() {
            Ok(times) => times,
            Err(e) => {
                eprintln!("[BGPERF-SAMPLER] idle: {e}");
                if !token.pause(window) {
                    return;
                }
                continue;
            }
        };
        if !token.pause(window) {
            return;
        }
        let after = match platform.cpu_times() {
            Ok(times) => times,
            Err(e) => {
                eprintln!("[BGPERF-SAMPLER] idle: {e}");
                continue;
            }
        };
        let Some(idle_percent) = idle_percent_between(&before, &after) else {
            continue;
        };
        if !tx.send(Sample::idle(Utc::now(), idle_percent)) {
            return;
        }
    }
}

/// Report available memory, sleeping `interval` between reads.
pub fn run_free_memory_sampler(
    platform: &Arc<dyn Platform>,
    interval: Duration,
    tx: &SampleSender,
    token: &CancellationToken,
) {
    while !token.is_cancelled() {
        match platform.memory_info() {
            Ok(info) => {
                if !tx.send(Sample::free_memory(Utc::now(), info.available_bytes)) {
                    return;
                }
            }
            Err(e) => eprintln!("[BGPERF-SAMPLER] free memory: {e}"),
        }
        if !token.pause(interval) {
            return;
        }
    }
}

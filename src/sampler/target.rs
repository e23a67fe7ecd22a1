//! Target-side producers: container resource usage and per-neighbor checkpoints.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::monitor::queue::SampleSender;
use crate::monitor::sample::Sample;
use crate::platform::collaborators::{ContainerStatsFeed, TargetControl};
use crate::sampler::CancellationToken;

/// Stream container stats until the feed ends, the queue closes, or the token fires.
///
/// Ticks without enough data for a CPU percentage are skipped, not emitted.
pub fn run_resource_sampler(
    mut feed: Box<dyn ContainerStatsFeed>,
    tx: &SampleSender,
    token: &CancellationToken,
) {
    while !token.is_cancelled() {
        let Some(next) = feed.next_stats() else {
            return;
        };
        let stats = match next {
            Ok(stats) => stats,
            Err(e) => {
                eprintln!("[BGPERF-SAMPLER] resource feed: {e}");
                continue;
            }
        };
        let Some(cpu_percent) = stats.cpu_percent() else {
            continue;
        };
        if !tx.send(Sample::resource(Utc::now(), cpu_percent, stats.mem_bytes())) {
            return;
        }
    }
}

/// Whether each configured neighbor has reached its checkpoint.
///
/// Neighbors missing from `accepted` count as not checked; entries in
/// `accepted` that are not configured (the monitoring peer, for one) are ignored.
#[must_use]
pub fn neighbors_checked(
    accepted: &BTreeMap<String, u64>,
    checkpoints: &BTreeMap<String, u64>,
) -> BTreeMap<String, bool> {
    checkpoints
        .iter()
        .map(|(address, checkpoint)| {
            let reached = accepted.get(address).is_some_and(|count| count >= checkpoint);
            (address.clone(), reached)
        })
        .collect()
}

/// Poll the target's accepted counts once per `interval`.
///
/// A failing query (daemon not up yet, unparseable output) reports every
/// neighbor as not checked instead of stopping.
pub fn run_neighbor_sampler(
    target: &Arc<dyn TargetControl>,
    checkpoints: &BTreeMap<String, u64>,
    interval: Duration,
    tx: &SampleSender,
    token: &CancellationToken,
) {
    let mut failing = false;
    while !token.is_cancelled() {
        let accepted = match target.neighbor_accepted() {
            Ok(accepted) => {
                failing = false;
                accepted
            }
            Err(e) => {
                if !failing {
                    eprintln!("[BGPERF-SAMPLER] neighbor query not ready: {e}");
                }
                failing = true;
                BTreeMap::new()
            }
        };
        let checked = neighbors_checked(&accepted, checkpoints);
        if !tx.send(Sample::neighbors(Utc::now(), checked)) {
            return;
        }
        if !token.pause(interval) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::cpu::{CpuStats, CpuUsage, DockerStats, MemoryStats};
    use crate::monitor::queue::sample_queue;
    use crate::monitor::sample::Payload;
    use crate::platform::collaborators::{ScriptedTarget, VecStatsFeed};

    fn stats(total: u64, pre_total: u64, system: u64, pre_system: u64, cores: usize) -> DockerStats {
        DockerStats {
            cpu_stats: CpuStats {
                cpu_usage: CpuUsage {
                    total_usage: total,
                    percpu_usage: Some(vec![0; cores]),
                },
                system_cpu_usage: Some(system),
                online_cpus: None,
            },
            precpu_stats: CpuStats {
                cpu_usage: CpuUsage {
                    total_usage: pre_total,
                    percpu_usage: Some(vec![0; cores]),
                },
                system_cpu_usage: Some(pre_system),
                online_cpus: None,
            },
            memory_stats: MemoryStats {
                usage: Some(4096),
            },
        }
    }

    fn checkpoints() -> BTreeMap<String, u64> {
        BTreeMap::from([("10.10.0.3".to_string(), 100), ("10.10.0.4".to_string(), 100)])
    }

    #[test]
    fn resource_sampler_skips_ticks_without_core_breakdown() {
        let mut bare = stats(200, 100, 2000, 1000, 0);
        bare.cpu_stats.cpu_usage.percpu_usage = None;
        bare.precpu_stats.cpu_usage.percpu_usage = None;
        let feed = VecStatsFeed::new(vec![bare, stats(200, 100, 2000, 1000, 4)]);
        let (tx, rx) = sample_queue();
        run_resource_sampler(Box::new(feed), &tx, &CancellationToken::new());

        assert_eq!(rx.len(), 1);
        let sample = rx.try_recv().unwrap();
        match sample.payload {
            Payload::Resource {
                cpu_percent,
                mem_bytes,
            } => {
                assert!((cpu_percent - 40.0).abs() < 1e-9);
                assert_eq!(mem_bytes, 4096);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn resource_sampler_honors_cancellation() {
        let feed = VecStatsFeed::new(vec![stats(200, 100, 2000, 1000, 1)]);
        let (tx, rx) = sample_queue();
        let token = CancellationToken::new();
        token.cancel();
        run_resource_sampler(Box::new(feed), &tx, &token);
        assert!(rx.is_empty());
    }

    #[test]
    fn checkpoint_comparison_ignores_unknown_peers() {
        let accepted = BTreeMap::from([
            ("10.10.0.3".to_string(), 100),
            ("10.10.0.4".to_string(), 99),
            ("10.10.0.2".to_string(), 5000),
        ]);
        let checked = neighbors_checked(&accepted, &checkpoints());
        assert_eq!(checked.len(), 2);
        assert!(checked["10.10.0.3"]);
        assert!(!checked["10.10.0.4"]);
    }

    #[test]
    fn missing_neighbors_are_unchecked() {
        let checked = neighbors_checked(&BTreeMap::new(), &checkpoints());
        assert!(checked.values().all(|reached| !reached));
    }

    #[test]
    fn neighbor_sampler_treats_query_failure_as_unchecked() {
        struct Failing;
        impl TargetControl for Failing {
            fn neighbor_accepted(&self) -> crate::core::errors::Result<BTreeMap<String, u64>> {
                Err(crate::core::errors::BenchError::collaborator("target", "not running"))
            }
            fn version(&self) -> crate::core::errors::Result<String> {
                Ok("x".to_string())
            }
        }

        let (tx, rx) = sample_queue();
        let token = CancellationToken::new();
        let target: Arc<dyn TargetControl> = Arc::new(Failing);
        let worker_token = token.clone();
        let worker = std::thread::spawn(move || {
            run_neighbor_sampler(&target, &checkpoints(), Duration::from_millis(5), &tx, &worker_token);
        });
        let first = rx.recv().unwrap();
        token.cancel();
        worker.join().unwrap();
        match first.payload {
            Payload::Neighbors { neighbors_checked } => {
                assert_eq!(neighbors_checked.len(), 2);
                assert!(neighbors_checked.values().all(|reached| !reached));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn neighbor_sampler_reports_progress() {
        let full = BTreeMap::from([("10.10.0.3".to_string(), 100), ("10.10.0.4".to_string(), 100)]);
        let target: Arc<dyn TargetControl> =
            Arc::new(ScriptedTarget::new(vec![BTreeMap::new(), full], Some("1.0")));
        let (tx, rx) = sample_queue();
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker = std::thread::spawn(move || {
            run_neighbor_sampler(&target, &checkpoints(), Duration::from_millis(1), &tx, &worker_token);
        });
        let _ = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        token.cancel();
        worker.join().unwrap();
        let Payload::Neighbors { neighbors_checked } = second.payload else {
            panic!("expected neighbors payload");
        };
        assert!(neighbors_checked.values().all(|reached| *reached));
    }
}

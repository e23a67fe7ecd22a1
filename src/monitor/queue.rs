//! Unbounded multi-producer/single-consumer sample queue.
//!
//! Producers never block on the queue. Worst-case growth is bounded in
//! practice by the stall threshold: a consumer that stops draining stops the
//! run long before memory matters.

#![allow(missing_docs)]

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::core::errors::{BenchError, Result};
use crate::monitor::sample::Sample;

/// Create a connected sender/receiver pair.
#[must_use]
pub fn sample_queue() -> (SampleSender, SampleReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (SampleSender { tx }, SampleReceiver { rx })
}

/// Cloneable producer end. One clone per producer keeps per-producer FIFO.
#[derive(Debug, Clone)]
pub struct SampleSender {
    tx: Sender<Sample>,
}

impl SampleSender {
    /// Enqueue a sample. Returns `false` once the consumer is gone.
    pub fn send(&self, sample: Sample) -> bool {
        self.tx.send(sample).is_ok()
    }
}

/// Single consumer end, owned by the convergence loop.
#[derive(Debug)]
pub struct SampleReceiver {
    rx: Receiver<Sample>,
}

impl SampleReceiver {
    /// Block until a sample is available.
    pub fn recv(&self) -> Result<Sample> {
        self.rx.recv().map_err(|_| BenchError::ChannelClosed {
            component: "sample-queue",
        })
    }

    pub fn try_recv(&self) -> Option<Sample> {
        match self.rx.try_recv() {
            Ok(sample) => Some(sample),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Samples currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::thread;

    #[test]
    fn preserves_per_producer_order() {
        let (tx, rx) = sample_queue();
        let producers: Vec<_> = (0..4_u64)
            .map(|producer| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for seq in 0..100_u64 {
                        assert!(tx.send(Sample::free_memory(Utc::now(), producer * 1_000 + seq)));
                    }
                })
            })
            .collect();
        drop(tx);
        for handle in producers {
            handle.join().unwrap();
        }

        let mut last_seen = [None::<u64>; 4];
        while let Ok(sample) = rx.recv() {
            let crate::monitor::sample::Payload::FreeMemory { free_bytes } = sample.payload else {
                panic!("unexpected payload");
            };
            let producer = usize::try_from(free_bytes / 1_000).unwrap();
            let seq = free_bytes % 1_000;
            if let Some(prev) = last_seen[producer] {
                assert!(seq > prev, "producer {producer} reordered: {prev} then {seq}");
            }
            last_seen[producer] = Some(seq);
        }
        assert!(last_seen.iter().all(|seen| *seen == Some(99)));
    }

    #[test]
    fn recv_reports_closed_channel() {
        let (tx, rx) = sample_queue();
        drop(tx);
        let err = rx.recv().expect_err("closed channel");
        assert_eq!(err.code(), "BGP-3003");
    }

    #[test]
    fn send_fails_after_consumer_dropped() {
        let (tx, rx) = sample_queue();
        drop(rx);
        assert!(!tx.send(Sample::idle(Utc::now(), 50.0)));
    }
}

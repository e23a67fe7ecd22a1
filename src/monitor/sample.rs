//! Tagged samples exchanged between producers and the convergence monitor.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the testbed produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Target,
    Monitor,
    Controller,
}

impl fmt::Display for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Target => "target",
            Self::Monitor => "monitor",
            Self::Controller => "controller",
        })
    }
}

/// Source-specific measurement carried by a [`Sample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Target container resource usage.
    Resource { cpu_percent: f64, mem_bytes: u64 },
    /// Neighbor address to "has reached its checkpoint".
    Neighbors {
        neighbors_checked: BTreeMap<String, bool>,
    },
    /// Host-wide idle CPU percentage.
    Idle { idle_percent: f64 },
    /// Host-wide available memory.
    FreeMemory { free_bytes: u64 },
    /// Monitoring peer's view of the target.
    Routes {
        accepted_count: u64,
        all_testers_checked: bool,
    },
}

/// One observation on the sample queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub source: SampleSource,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Sample {
    #[must_use]
    pub const fn resource(timestamp: DateTime<Utc>, cpu_percent: f64, mem_bytes: u64) -> Self {
        Self {
            source: SampleSource::Target,
            timestamp,
            payload: Payload::Resource {
                cpu_percent,
                mem_bytes,
            },
        }
    }

    #[must_use]
    pub const fn neighbors(
        timestamp: DateTime<Utc>,
        neighbors_checked: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            source: SampleSource::Target,
            timestamp,
            payload: Payload::Neighbors { neighbors_checked },
        }
    }

    #[must_use]
    pub const fn idle(timestamp: DateTime<Utc>, idle_percent: f64) -> Self {
        Self {
            source: SampleSource::Controller,
            timestamp,
            payload: Payload::Idle { idle_percent },
        }
    }

    #[must_use]
    pub const fn free_memory(timestamp: DateTime<Utc>, free_bytes: u64) -> Self {
        Self {
            source: SampleSource::Controller,
            timestamp,
            payload: Payload::FreeMemory { free_bytes },
        }
    }

    #[must_use]
    pub const fn routes(
        timestamp: DateTime<Utc>,
        accepted_count: u64,
        all_testers_checked: bool,
    ) -> Self {
        Self {
            source: SampleSource::Monitor,
            timestamp,
            payload: Payload::Routes {
                accepted_count,
                all_testers_checked,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_serializes_as_flat_tagged_object() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = serde_json::to_value(Sample::routes(ts, 42, true)).unwrap();
        assert_eq!(json["source"], "monitor");
        assert_eq!(json["kind"], "routes");
        assert_eq!(json["accepted_count"], 42);
        assert_eq!(json["all_testers_checked"], true);

        let back: Sample = serde_json::from_value(json).unwrap();
        assert_eq!(back.payload, Payload::Routes {
            accepted_count: 42,
            all_testers_checked: true
        });
    }

    #[test]
    fn constructors_tag_the_right_source() {
        let ts = Utc::now();
        assert_eq!(Sample::resource(ts, 1.0, 1).source, SampleSource::Target);
        assert_eq!(Sample::neighbors(ts, BTreeMap::new()).source, SampleSource::Target);
        assert_eq!(Sample::idle(ts, 99.0).source, SampleSource::Controller);
        assert_eq!(Sample::free_memory(ts, 1).source, SampleSource::Controller);
        assert_eq!(SampleSource::Monitor.to_string(), "monitor");
    }
}

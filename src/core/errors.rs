//! BGP-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Top-level error type for bgperf.
///
/// Run failures (stall, regression) are not represented here: they are
/// ordinary outcomes of a benchmark and travel as `RunOutcome` values.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("[BGP-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[BGP-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[BGP-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[BGP-1004] invalid scenario: {details}")]
    InvalidScenario { details: String },

    #[error("[BGP-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[BGP-2001] host metrics parse failure in {source_name}: {details}")]
    HostMetrics {
        source_name: &'static str,
        details: String,
    },

    #[error("[BGP-2002] collaborator {component} failed: {details}")]
    Collaborator {
        component: &'static str,
        details: String,
    },

    #[error("[BGP-2003] malformed sample from {context}: {details}")]
    SampleParse {
        context: &'static str,
        details: String,
    },

    #[error("[BGP-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[BGP-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[BGP-2103] CSV failure: {details}")]
    Csv { details: String },

    #[error("[BGP-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[BGP-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[BGP-3004] interrupted: {details}")]
    Interrupted { details: String },

    #[error("[BGP-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl BenchError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "BGP-1001",
            Self::MissingConfig { .. } => "BGP-1002",
            Self::ConfigParse { .. } => "BGP-1003",
            Self::InvalidScenario { .. } => "BGP-1004",
            Self::UnsupportedPlatform { .. } => "BGP-1101",
            Self::HostMetrics { .. } => "BGP-2001",
            Self::Collaborator { .. } => "BGP-2002",
            Self::SampleParse { .. } => "BGP-2003",
            Self::Serialization { .. } => "BGP-2101",
            Self::Sql { .. } => "BGP-2102",
            Self::Csv { .. } => "BGP-2103",
            Self::Io { .. } => "BGP-3002",
            Self::ChannelClosed { .. } => "BGP-3003",
            Self::Interrupted { .. } => "BGP-3004",
            Self::Runtime { .. } => "BGP-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Collaborator failures are retryable: the target or monitor daemon is
    /// frequently not ready yet when the first queries go out.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Collaborator { .. }
                | Self::SampleParse { .. }
                | Self::HostMetrics { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a failed external collaborator call.
    #[must_use]
    pub fn collaborator(component: &'static str, details: impl Into<String>) -> Self {
        Self::Collaborator {
            component,
            details: details.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BenchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for BenchError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for BenchError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<csv::Error> for BenchError {
    fn from(value: csv::Error) -> Self {
        Self::Csv {
            details: value.to_string(),
        }
    }
}

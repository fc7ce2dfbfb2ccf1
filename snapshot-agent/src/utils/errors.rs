//! Custom error types for the snapshot agent.

use std::fmt;
use thiserror::Error;

/// A pre-run condition that was not met. The run stops before touching the
/// destination and the process exits normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardFailure {
    /// The backup server did not answer the reachability probe.
    HostUnreachable { host: String },

    /// Another invocation holds the destination lock.
    ConcurrentRun { holder: String },

    /// A backup already completed today and the run was not forced.
    AlreadyRanToday { date: String },
}

impl fmt::Display for GuardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardFailure::HostUnreachable { host } => {
                write!(f, "backup server {} is off line", host)
            }
            GuardFailure::ConcurrentRun { holder } => {
                write!(f, "backup already running ({})", holder)
            }
            GuardFailure::AlreadyRanToday { date } => {
                write!(f, "already backed up today ({})", date)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Guard check failed: {0}")]
    Guard(GuardFailure),

    #[error("Transfer of {source_path} failed: {reason}")]
    Transfer { source_path: String, reason: String },

    #[error("Invalid metadata key: {0}")]
    MetadataKey(String),

    #[error("Remote command failed ({status}): {command}: {output}")]
    RemoteCommand {
        command: String,
        status: i32,
        output: String,
    },

    #[error("Remote copy failed: {0}")]
    Copy(String),

    #[error("Promotion failed: {0}")]
    Promotion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for SnapshotError {
    fn from(e: config::ConfigError) -> Self {
        SnapshotError::Config(e.to_string())
    }
}

impl From<GuardFailure> for SnapshotError {
    fn from(g: GuardFailure) -> Self {
        SnapshotError::Guard(g)
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

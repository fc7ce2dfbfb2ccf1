//! Utility modules for the snapshot agent.

pub mod errors;
pub mod logger;

pub use errors::{GuardFailure, Result, SnapshotError};

//! Snapshot Agent Library
//!
//! Incremental hard-linked snapshot backups of one machine to a backup
//! server, driven by rsync over ssh or to a locally mounted destination.

pub mod config;
pub mod controller;
pub mod daemon;
pub mod executor;
pub mod remote;
pub mod retention;
pub mod snapshot;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use controller::{Controller, RunFlags, RunReport};
pub use utils::errors::{GuardFailure, Result, SnapshotError};

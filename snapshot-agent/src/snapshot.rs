//! Snapshot naming and the destination directory layout.
//!
//! A snapshot is a directory named `YYYY-MM-DD-HHMMSS` under the host
//! directory. Names are validated with a full timestamp parse so unrelated
//! entries (`WORKING`, `LATEST`, dot files, stray folders) never count as
//! snapshots, and ordering follows the parsed time rather than a prefix.

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;
use std::path::{Path, PathBuf};

const NAME_FORMAT: &str = "%Y-%m-%d-%H%M%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

pub const WORKING: &str = "WORKING";
pub const LATEST: &str = "LATEST";
pub const METADATA_FILE: &str = ".metadata";
pub const LOCK_FILE: &str = ".lock";

/// Name of a promoted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName {
    // Field order matters: derived Ord compares the timestamp first.
    taken_at: NaiveDateTime,
    name: String,
}

impl SnapshotName {
    /// Parse a directory name; `None` for anything that is not a snapshot.
    pub fn parse(name: &str) -> Option<Self> {
        // chrono accepts some non-padded fields; the length check keeps names canonical
        if name.len() != 17 {
            return None;
        }
        let taken_at = NaiveDateTime::parse_from_str(name, NAME_FORMAT).ok()?;
        Some(Self {
            taken_at,
            name: name.to_string(),
        })
    }

    pub fn from_datetime(taken_at: NaiveDateTime) -> Self {
        let taken_at = taken_at.with_nanosecond(0).unwrap_or(taken_at);
        Self {
            name: taken_at.format(NAME_FORMAT).to_string(),
            taken_at,
        }
    }

    /// Snapshot name for the current local time
    pub fn now() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn taken_at(&self) -> NaiveDateTime {
        self.taken_at
    }

    pub fn day(&self) -> NaiveDate {
        self.taken_at.date()
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// `YYYY-MM-DD` as stored in the metadata record
pub fn day_string(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

pub fn today() -> String {
    day_string(Local::now().date_naive())
}

/// Keep the valid snapshot names from a directory listing, oldest first.
pub fn parse_listing(listing: &str) -> Vec<SnapshotName> {
    let mut snapshots: Vec<SnapshotName> = listing
        .lines()
        .map(|l| l.trim().trim_end_matches('/'))
        .filter_map(|l| {
            // `ls` may print full paths depending on the invocation
            let base = l.rsplit('/').next().unwrap_or(l);
            SnapshotName::parse(base)
        })
        .collect();
    snapshots.sort();
    snapshots.dedup();
    snapshots
}

/// Paths inside `<backup-destination>/<hostname>` on the destination.
#[derive(Debug, Clone)]
pub struct Layout {
    destination: PathBuf,
    host_root: PathBuf,
}

impl Layout {
    pub fn new(backup_destination: &Path, hostname: &str) -> Self {
        Self {
            destination: backup_destination.to_path_buf(),
            host_root: backup_destination.join(hostname),
        }
    }

    /// Root shared by every backed-up host
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    pub fn working(&self) -> PathBuf {
        self.host_root.join(WORKING)
    }

    pub fn latest_alias(&self) -> PathBuf {
        self.host_root.join(LATEST)
    }

    pub fn snapshot(&self, name: &SnapshotName) -> PathBuf {
        self.host_root.join(name.as_str())
    }

    pub fn metadata(&self) -> PathBuf {
        self.host_root.join(METADATA_FILE)
    }

    pub fn lock(&self) -> PathBuf {
        self.host_root.join(LOCK_FILE)
    }

    pub fn marker(&self, file_name: &str) -> PathBuf {
        self.host_root.join(file_name)
    }
}

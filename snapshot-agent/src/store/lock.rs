//! Advisory run lock at `<host dir>/.lock`.
//!
//! The lock file records who is backing this host up. A second invocation
//! that finds a live holder stops with a concurrent-run guard failure.
//! Holders that crashed are recognised as stale (dead pid on this machine,
//! or older than the configured age) and taken over with a warning.

use super::{read_remote, write_remote};
use crate::remote::{path_arg, Channel};
use crate::utils::errors::{GuardFailure, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LockRecord {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn describe(&self) -> String {
        format!(
            "pid {} on {} since {}",
            self.pid,
            self.host,
            self.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

pub struct AdvisoryLock {
    channel: Arc<dyn Channel>,
    path: PathBuf,
    scratch_dir: PathBuf,
    hostname: String,
    pid: u32,
    stale_after: Duration,
}

impl AdvisoryLock {
    pub fn new(
        channel: Arc<dyn Channel>,
        path: PathBuf,
        scratch_dir: PathBuf,
        hostname: &str,
        stale_after_minutes: i64,
    ) -> Self {
        Self {
            channel,
            path,
            scratch_dir,
            hostname: hostname.to_string(),
            pid: std::process::id(),
            stale_after: Duration::minutes(stale_after_minutes),
        }
    }

    /// Fail with `ConcurrentRun` if a live holder exists; writes nothing.
    pub async fn check(&self) -> Result<()> {
        match self.read().await? {
            Some(record) if !self.is_stale(&record, Utc::now()) => Err(GuardFailure::ConcurrentRun {
                holder: record.describe(),
            }
            .into()),
            Some(record) => {
                warn!("Ignoring stale lock held by {}", record.describe());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Take the lock, replacing a stale one.
    pub async fn acquire(&self) -> Result<()> {
        self.check().await?;

        let record = LockRecord {
            pid: self.pid,
            host: self.hostname.clone(),
            acquired_at: Utc::now(),
        };
        let document = serde_json::to_string(&record)?;
        write_remote(self.channel.as_ref(), &self.scratch_dir, &document, &self.path).await?;

        // Two runs can both see a free lock; whoever wrote last owns it
        match self.read().await? {
            Some(current) if current == record => {
                info!("Acquired lock {}", self.path.display());
                Ok(())
            }
            Some(current) => Err(GuardFailure::ConcurrentRun {
                holder: current.describe(),
            }
            .into()),
            None => Err(GuardFailure::ConcurrentRun {
                holder: "lock vanished after it was written".to_string(),
            }
            .into()),
        }
    }

    /// Remove the lock if this process still holds it.
    pub async fn release(&self) {
        match self.read().await {
            Ok(Some(record)) if self.is_own(&record) => {}
            Ok(Some(record)) => {
                warn!("Lock now held by {}, leaving it in place", record.describe());
                return;
            }
            Ok(None) => return,
            Err(e) => warn!("Could not read lock before release: {}", e),
        }

        let path = path_arg(&self.path);
        match self.channel.run(&["rm", "-f", &path]).await {
            Ok(out) if out.success() => info!("Released lock {}", self.path.display()),
            Ok(_) => warn!("Could not remove lock {}", self.path.display()),
            Err(e) => warn!("Could not remove lock {}: {}", self.path.display(), e),
        }
    }

    async fn read(&self) -> Result<Option<LockRecord>> {
        let Some(document) = read_remote(self.channel.as_ref(), &self.path).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<LockRecord>(&document) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Unreadable lock file {} ({}), treating it as stale", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn is_own(&self, record: &LockRecord) -> bool {
        record.pid == self.pid && record.host == self.hostname
    }

    fn is_stale(&self, record: &LockRecord, now: DateTime<Utc>) -> bool {
        if now - record.acquired_at > self.stale_after {
            return true;
        }
        if record.host != self.hostname {
            // Pids of other machines cannot be checked from here
            return false;
        }
        // Our own pid in a lock we have not taken yet is a reused pid from an earlier crash
        record.pid == self.pid || !is_process_alive(record.pid)
    }
}

/// Signal 0 checks for existence without delivering anything.
fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM: exists but belongs to someone else
        Err(_) => true,
    }
}

//! Space reclamation on the destination.
//!
//! While the destination filesystem is at or above the configured usage,
//! the oldest snapshot is deleted and usage is measured again. The last
//! remaining snapshot is never deleted, and neither is the snapshot that
//! serves as the hard-link baseline for the next transfer.

use crate::remote::{path_arg, test_path, Channel};
use crate::snapshot::{parse_listing, Layout, SnapshotName};
use crate::utils::errors::{Result, SnapshotError};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RetentionManager {
    channel: Arc<dyn Channel>,
    layout: Layout,
    maximum_used_percent: u8,
    dry_run: bool,
}

impl RetentionManager {
    pub fn new(channel: Arc<dyn Channel>, layout: Layout, maximum_used_percent: u8, dry_run: bool) -> Self {
        Self {
            channel,
            layout,
            maximum_used_percent,
            dry_run,
        }
    }

    /// Used space of the filesystem holding the host directory, in percent.
    ///
    /// Before the first run creates the host directory, the destination
    /// itself is measured.
    pub async fn used_percent(&self) -> Result<u8> {
        let measured = if test_path(self.channel.as_ref(), "-d", self.layout.host_root()).await? {
            self.layout.host_root()
        } else {
            self.layout.destination()
        };
        let measured = path_arg(measured);
        let out = self.channel.run_checked(&["df", "-P", &measured]).await?;
        parse_df_used(&out.output).ok_or_else(|| SnapshotError::RemoteCommand {
            command: format!("df -P {}", measured),
            status: out.status,
            output: format!("unexpected df output: {}", out.output),
        })
    }

    /// Snapshots in the host directory, oldest first.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotName>> {
        // Nothing has been backed up to a host directory that does not exist yet
        if !test_path(self.channel.as_ref(), "-d", self.layout.host_root()).await? {
            return Ok(Vec::new());
        }
        let host_root = path_arg(self.layout.host_root());
        let out = self.channel.run_checked(&["ls", "-1", &host_root]).await?;
        Ok(parse_listing(&out.output))
    }

    /// Evict oldest snapshots until usage drops below the maximum or nothing
    /// more may be evicted. Returns the evicted snapshots.
    pub async fn enforce(&self, protected: Option<&str>) -> Result<Vec<SnapshotName>> {
        let mut evicted = Vec::new();

        loop {
            let used = match self.used_percent().await {
                Ok(used) => used,
                // A dry run may point at a destination that is not there yet
                Err(e) if self.dry_run => {
                    warn!("Cannot measure destination usage: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            };
            if used < self.maximum_used_percent {
                info!(
                    "Destination {}% used (maximum {}%)",
                    used, self.maximum_used_percent
                );
                break;
            }

            let snapshots = self.list_snapshots().await?;
            let Some(oldest) = eviction_candidate(&snapshots, protected) else {
                warn!(
                    "Destination {}% used (maximum {}%) but no snapshot may be removed ({} present)",
                    used,
                    self.maximum_used_percent,
                    snapshots.len()
                );
                break;
            };

            if self.dry_run {
                info!(
                    "Destination {}% used; would remove oldest snapshot {}",
                    used, oldest
                );
                break;
            }

            info!(
                "Destination {}% used (maximum {}%), removing oldest snapshot {}",
                used, self.maximum_used_percent, oldest
            );
            self.delete(&oldest).await?;
            evicted.push(oldest);
        }

        Ok(evicted)
    }

    /// Evict the oldest eligible snapshot regardless of usage.
    ///
    /// Used when a transfer ran out of space.
    pub async fn evict_one(&self, protected: Option<&str>) -> Result<Option<SnapshotName>> {
        let snapshots = self.list_snapshots().await?;
        let Some(oldest) = eviction_candidate(&snapshots, protected) else {
            return Ok(None);
        };

        if self.dry_run {
            info!("Would remove oldest snapshot {}", oldest);
            return Ok(None);
        }

        info!("Destination full, removing oldest snapshot {}", oldest);
        self.delete(&oldest).await?;
        Ok(Some(oldest))
    }

    async fn delete(&self, name: &SnapshotName) -> Result<()> {
        let path = path_arg(&self.layout.snapshot(name));
        // Copied files keep source permissions that can forbid removal
        self.channel.run_checked(&["chmod", "-R", "u+w", &path]).await?;
        self.channel.run_checked(&["rm", "-rf", &path]).await?;
        Ok(())
    }
}

/// Oldest snapshot that may be deleted.
fn eviction_candidate(snapshots: &[SnapshotName], protected: Option<&str>) -> Option<SnapshotName> {
    if snapshots.len() <= 1 {
        return None;
    }
    snapshots
        .iter()
        .find(|s| Some(s.as_str()) != protected)
        .cloned()
}

/// Capacity column of the last line of `df -P` output.
fn parse_df_used(output: &str) -> Option<u8> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let field = line.split_whitespace().nth(4)?;
    field.trim_end_matches('%').parse().ok()
}

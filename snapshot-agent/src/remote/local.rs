//! Channel to a destination mounted on this machine (USB disk, NFS share).

use super::process::{self, CommandOutput};
use super::{path_arg, Channel};
use crate::utils::errors::{Result, SnapshotError};
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Default)]
pub struct LocalChannel;

impl LocalChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn describe(&self) -> String {
        "local".to_string()
    }

    async fn is_reachable(&self) -> bool {
        true
    }

    async fn spawn(&self, argv: &[&str]) -> Result<CommandOutput> {
        let Some((program, rest)) = argv.split_first() else {
            return Err(SnapshotError::RemoteCommand {
                command: String::new(),
                status: -1,
                output: "empty command".to_string(),
            });
        };
        let args: Vec<String> = rest.iter().map(|a| a.to_string()).collect();
        process::output(program, &args).await
    }

    async fn copy(&self, local: &Path, remote: &Path) -> Result<()> {
        tokio::fs::copy(local, remote).await.map_err(|e| {
            SnapshotError::Copy(format!("{} -> {}: {}", local.display(), remote.display(), e))
        })?;
        Ok(())
    }

    fn transfer_target(&self, remote: &Path) -> String {
        path_arg(remote)
    }
}

//! Remote channel to the backup destination.
//!
//! Every mutation of the destination tree goes through a [`Channel`], one
//! command at a time. Commands are explicit argument lists; the ssh
//! implementation quotes each argument before it reaches the remote shell.

pub mod local;
pub mod process;
pub mod ssh;

use crate::config::{Settings, Transport};
use crate::utils::errors::{Result, SnapshotError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::error;

pub use local::LocalChannel;
pub use process::CommandOutput;
pub use ssh::SshChannel;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Short description used in log lines
    fn describe(&self) -> String;

    /// Is the destination host answering?
    async fn is_reachable(&self) -> bool;

    /// Execute a command on the destination and collect its output.
    ///
    /// A non-zero exit status is not an error at this level.
    async fn spawn(&self, argv: &[&str]) -> Result<CommandOutput>;

    /// Copy a local file to a path on the destination.
    async fn copy(&self, local: &Path, remote: &Path) -> Result<()>;

    /// How the transfer tool should address a destination path
    fn transfer_target(&self, remote: &Path) -> String;

    /// Remote shell the transfer tool should use (`rsync -e`), if any
    fn transfer_shell(&self) -> Option<String> {
        None
    }

    /// Execute a command, logging it with its status and output on failure.
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
        let out = self.spawn(argv).await?;
        if !out.success() {
            error!("(remote command) {}", argv.join(" "));
            error!("(remote command) {} {}", out.status, out.output);
        }
        Ok(out)
    }

    /// Execute a command that must succeed.
    async fn run_checked(&self, argv: &[&str]) -> Result<CommandOutput> {
        let out = self.run(argv).await?;
        if !out.success() {
            return Err(SnapshotError::RemoteCommand {
                command: argv.join(" "),
                status: out.status,
                output: out.output,
            });
        }
        Ok(out)
    }
}

/// Build the channel selected by the settings
pub fn connect(settings: &Settings) -> Arc<dyn Channel> {
    match settings.transport {
        Transport::Ssh => Arc::new(SshChannel::new(&settings.server_address)),
        Transport::Local => Arc::new(LocalChannel::new()),
    }
}

/// Ask `test <flag> path` on the destination.
///
/// Status 1 means the test is false; any other failure is an error.
pub async fn test_path(channel: &dyn Channel, flag: &str, path: &Path) -> Result<bool> {
    let path_str = path_arg(path);
    let out = channel.spawn(&["test", flag, &path_str]).await?;
    match out.status {
        0 => Ok(true),
        1 => Ok(false),
        status => Err(SnapshotError::RemoteCommand {
            command: format!("test {} {}", flag, path_str),
            status,
            output: out.output,
        }),
    }
}

/// Lossy string form of a destination path for argument lists
pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

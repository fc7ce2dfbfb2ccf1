//! Channel to a backup server reached over ssh and scp.

use super::process::{self, shell_line, CommandOutput, LOCALE_ENV};
use super::{path_arg, Channel};
use crate::utils::errors::{Result, SnapshotError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, error};

/// Shared by remote commands and the transfer tool's remote shell
const SSH_OPTIONS: [&str; 4] = ["ssh", "-q", "-o", "BatchMode=yes"];

pub struct SshChannel {
    address: String,
}

impl SshChannel {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }

    /// Arguments for `ssh` running `argv` on the server.
    ///
    /// ssh forwards the caller's `LANG`/`LC_*`, so the locale is pinned again
    /// on the remote side.
    fn ssh_args(&self, argv: &[&str]) -> Vec<String> {
        let locale = format!("{}={}", LOCALE_ENV.0, LOCALE_ENV.1);
        let mut remote = vec!["env", locale.as_str()];
        remote.extend_from_slice(argv);

        let mut args: Vec<String> = SSH_OPTIONS[1..].iter().map(|s| s.to_string()).collect();
        args.push(self.address.clone());
        args.push("--".to_string());
        args.push(shell_line(&remote));
        args
    }

    fn scp_args(&self, local: &Path, remote: &Path) -> Vec<String> {
        vec![
            "-q".to_string(),
            "-B".to_string(),
            path_arg(local),
            format!("{}:{}", self.address, path_arg(remote)),
        ]
    }
}

#[async_trait]
impl Channel for SshChannel {
    fn describe(&self) -> String {
        format!("ssh://{}", self.address)
    }

    async fn is_reachable(&self) -> bool {
        let status = tokio::process::Command::new("ping")
            .args(["-q", "-c1", "-W5", &self.address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(s) if s.success() => true,
            Ok(_) => {
                error!("Backup server {} is off line at present.", self.address);
                false
            }
            Err(e) => {
                error!("Failed to probe {}: {}", self.address, e);
                false
            }
        }
    }

    async fn spawn(&self, argv: &[&str]) -> Result<CommandOutput> {
        let args = self.ssh_args(argv);
        debug!("ssh {}", args.join(" "));
        process::output("ssh", &args).await
    }

    async fn copy(&self, local: &Path, remote: &Path) -> Result<()> {
        // scp hands the remote path to the server unquoted (or to SFTP verbatim
        // on newer releases), so only plain paths are accepted
        let remote_str = path_arg(remote);
        if !process::is_shell_safe(&remote_str) {
            return Err(SnapshotError::Copy(format!(
                "remote path needs quoting: {}",
                remote_str
            )));
        }

        let args = self.scp_args(local, remote);
        let out = process::output("scp", &args).await?;
        if !out.success() {
            let command = format!("scp {}", args.join(" "));
            error!("(remote copy) {}", command);
            error!("(remote copy) {} {}", out.status, out.output);
            return Err(SnapshotError::Copy(format!("{} ({}): {}", command, out.status, out.output)));
        }
        Ok(())
    }

    fn transfer_target(&self, remote: &Path) -> String {
        format!("{}:{}", self.address, path_arg(remote))
    }

    fn transfer_shell(&self) -> Option<String> {
        Some(SSH_OPTIONS.join(" "))
    }
}

//! Transfer executor - runs the file-transfer tool for one source at a time.
//!
//! Each call builds an rsync-compatible command that mirrors one local source
//! into `<host dir>/WORKING`, hard-linking unchanged files against the
//! baseline snapshot. Output is streamed into the log while the child runs,
//! and the exit status is classified into a [`TransferOutcome`].

pub mod excludes;
pub mod outcome;

use crate::config::Settings;
use crate::remote::process::LOCALE_ENV;
use crate::remote::{path_arg, Channel};
use crate::snapshot::{Layout, SnapshotName};
use crate::utils::errors::{Result, SnapshotError};
pub use outcome::{classify, OutputFlags, TransferOutcome};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Output lines kept for the failure report
const DIAGNOSTIC_TAIL: usize = 64;

/// Last lines of the tool's output.
#[derive(Debug, Default)]
struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    fn push(&mut self, line: String) {
        if self.lines.len() == DIAGNOSTIC_TAIL {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

pub struct TransferExecutor {
    channel: Arc<dyn Channel>,
    layout: Layout,
    tool: String,
    timeout_secs: u64,
    bandwidth_limit: u32,
    exclusions: Vec<String>,
    scratch_dir: PathBuf,
    dry_run: bool,
    cancel_token: CancellationToken,
}

impl TransferExecutor {
    pub fn new(
        settings: &Settings,
        channel: Arc<dyn Channel>,
        layout: Layout,
        dry_run: bool,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            channel,
            layout,
            tool: settings.transfer_tool.clone(),
            timeout_secs: settings.transfer_timeout,
            bandwidth_limit: settings.bandwidth_limit,
            exclusions: settings.exclusions(),
            scratch_dir: settings.settings_dir.clone(),
            dry_run,
            cancel_token,
        }
    }

    /// Command-line arguments for one source
    fn build_args(&self, source: &Path, baseline: Option<&SnapshotName>, exclude_file: &Path) -> Vec<String> {
        let mut args = vec!["-a".to_string(), "-v".to_string()];
        if let Some(shell) = self.channel.transfer_shell() {
            args.push("-e".to_string());
            args.push(shell);
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args.push("--delete".to_string());
        args.push("--delete-excluded".to_string());
        args.push(format!("--timeout={}", self.timeout_secs));
        if self.bandwidth_limit > 0 {
            args.push(format!("--bwlimit={}", self.bandwidth_limit));
        }
        if let Some(baseline) = baseline {
            // Relative to the receiving directory
            args.push(format!("--link-dest=../{}", baseline));
        }
        args.push(format!("--exclude-from={}", exclude_file.display()));
        args.push(path_arg(source));
        args.push(format!("{}/", self.channel.transfer_target(&self.layout.working())));
        args
    }

    /// Mirror one source into the working snapshot.
    pub async fn transfer(&self, source: &Path, baseline: Option<&SnapshotName>) -> Result<TransferOutcome> {
        if self.cancel_token.is_cancelled() {
            return Ok(TransferOutcome::Interrupted);
        }

        let exclude_file = excludes::write_exclude_file(&self.scratch_dir, &self.exclusions)?;
        let args = self.build_args(source, baseline, exclude_file.path());
        info!("{} {}", self.tool, args.join(" "));

        let mut child = Command::new(&self.tool)
            .args(&args)
            .env(LOCALE_ENV.0, LOCALE_ENV.1)
            .env_remove("LANGUAGE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SnapshotError::Transfer {
                source_path: source.display().to_string(),
                reason: format!("could not start {}: {}", self.tool, e),
            })?;

        let mut tail = OutputTail::default();
        let mut flags = OutputFlags::default();

        if !self.stream_output(&mut child, &mut tail, &mut flags).await {
            return Ok(self.interrupt(&mut child, source).await);
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = self.cancel_token.cancelled() => {
                return Ok(self.interrupt(&mut child, source).await);
            }
        };

        let outcome = classify(status.code(), flags);
        match &outcome {
            TransferOutcome::Succeeded => info!("Transfer of {} {}", source.display(), outcome),
            TransferOutcome::FilesVanished | TransferOutcome::PartialTransfer => {
                warn!("Transfer of {} {}", source.display(), outcome)
            }
            _ => {
                error!("Transfer of {} {} (status {:?})", source.display(), outcome, status.code());
                for line in &tail.lines {
                    error!("  {}", line);
                }
            }
        }

        Ok(outcome)
    }

    /// Log both output streams line by line until they close.
    ///
    /// Returns `false` if the run was cancelled first.
    async fn stream_output(&self, child: &mut Child, tail: &mut OutputTail, flags: &mut OutputFlags) -> bool {
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return true;
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                _ = self.cancel_token.cancelled() => return false,
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => record_line(line, tail, flags),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!("Reading transfer output failed: {}", e);
                        stdout_open = false;
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => record_line(line, tail, flags),
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!("Reading transfer output failed: {}", e);
                        stderr_open = false;
                    }
                },
            }
        }

        true
    }

    async fn interrupt(&self, child: &mut Child, source: &Path) -> TransferOutcome {
        warn!("Transfer of {} interrupted", source.display());
        if let Err(e) = child.kill().await {
            warn!("Could not stop {}: {}", self.tool, e);
        }
        TransferOutcome::Interrupted
    }
}

fn record_line(line: String, tail: &mut OutputTail, flags: &mut OutputFlags) {
    info!("{}", line);
    flags.observe(&line);
    tail.push(line);
}

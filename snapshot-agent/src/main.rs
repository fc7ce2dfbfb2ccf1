//! Snapshot Agent - Main entry point
//!
//! Runs one backup of this machine and exits. Meant to be started by cron.

use anyhow::{Context, Result};
use clap::Parser;
use snapshot_agent::{daemon::shutdown::ShutdownCoordinator, remote, utils, Controller, RunFlags, Settings};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the settings file (default: ~/.snapshot-agent/settings.json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Show what would be done without changing the destination
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Back up even if a backup already completed today
    #[arg(short, long)]
    force: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn default_settings_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set; pass --config")?;
    Ok(PathBuf::from(home).join(".snapshot-agent").join("settings.json"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let settings_path = match args.config {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&settings.log_level);
    utils::logger::init(log_level, Some(settings.log_file.as_path()))?;

    tracing::info!(
        "Starting snapshot-agent v{} (host: {})",
        env!("CARGO_PKG_VERSION"),
        settings.local_hostname
    );

    let shutdown = ShutdownCoordinator::new();
    shutdown.listen();

    let flags = RunFlags {
        dry_run: args.dry_run,
        force: args.force,
    };
    let channel = remote::connect(&settings);
    let controller = Controller::new(settings, channel, flags, shutdown.token());

    match controller.run().await {
        Ok(report) => {
            tracing::info!("Run finished: {}", report);
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

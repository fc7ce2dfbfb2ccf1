//! Snapshot lifecycle controller.
//!
//! One run walks `Idle -> GuardChecking -> Preparing -> Transferring ->
//! Promoting | RollingBack -> Idle`. Sources are transferred into the
//! `WORKING` directory, which survives failed and interrupted runs so the
//! next run resumes it. Renaming `WORKING` to its timestamp name is the
//! commit point: before it the run can be repeated, after it the snapshot
//! is permanent.

mod report;

pub use report::{Phase, RunFlags, RunReport};

use crate::config::Settings;
use crate::executor::{TransferExecutor, TransferOutcome};
use crate::remote::{path_arg, test_path, Channel};
use crate::retention::RetentionManager;
use crate::snapshot::{self, Layout, SnapshotName, LATEST};
use crate::store::{AdvisoryLock, Marker, MarkerStore, MetadataKey, MetadataStore, RunMetadata};
use crate::utils::errors::{GuardFailure, Result, SnapshotError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tally of the transfer loop
#[derive(Debug, Default)]
struct TransferTally {
    succeeded: usize,
    interrupted: bool,
}

pub struct Controller {
    settings: Settings,
    channel: Arc<dyn Channel>,
    layout: Layout,
    flags: RunFlags,
    metadata: MetadataStore,
    markers: MarkerStore,
    lock: AdvisoryLock,
    retention: RetentionManager,
    executor: TransferExecutor,
    cancel_token: CancellationToken,
}

impl Controller {
    pub fn new(
        settings: Settings,
        channel: Arc<dyn Channel>,
        flags: RunFlags,
        cancel_token: CancellationToken,
    ) -> Self {
        let layout = Layout::new(&settings.backup_destination, &settings.local_hostname);
        let metadata = MetadataStore::new(channel.clone(), layout.metadata(), settings.settings_dir.clone());
        let markers = MarkerStore::new(channel.clone(), layout.clone(), !flags.dry_run);
        let lock = AdvisoryLock::new(
            channel.clone(),
            layout.lock(),
            settings.settings_dir.clone(),
            &settings.local_hostname,
            settings.lock_stale_after_minutes,
        );
        let retention = RetentionManager::new(
            channel.clone(),
            layout.clone(),
            settings.maximum_used_percent,
            flags.dry_run,
        );
        let executor = TransferExecutor::new(
            &settings,
            channel.clone(),
            layout.clone(),
            flags.dry_run,
            cancel_token.clone(),
        );

        Self {
            settings,
            channel,
            layout,
            flags,
            metadata,
            markers,
            lock,
            retention,
            executor,
            cancel_token,
        }
    }

    /// Perform one backup run.
    pub async fn run(&self) -> Result<RunReport> {
        let sources = self.settings.sources();
        if sources.is_empty() {
            return Err(SnapshotError::Config("no backup sources to back up".to_string()));
        }

        info!(
            "Backing up {} to {} {}{}",
            self.settings.local_hostname,
            self.channel.describe(),
            self.layout.host_root().display(),
            if self.flags.dry_run { " (dry run)" } else { "" }
        );

        self.enter(Phase::GuardChecking);
        let metadata = match self.check_guards().await {
            Ok(metadata) => metadata,
            Err(SnapshotError::Guard(guard)) => {
                warn!("Not backing up: {}", guard);
                self.enter(Phase::Idle);
                return Ok(RunReport::Skipped(guard));
            }
            Err(e) => return Err(e),
        };

        let result = self.run_guarded(&metadata, &sources).await;

        self.markers.clear_all().await;
        if !self.flags.dry_run {
            self.lock.release().await;
        }
        self.enter(Phase::Idle);

        result
    }

    /// Reachability, concurrency and once-a-day checks. On success the lock
    /// is held (except in a dry run) and the current metadata is returned.
    async fn check_guards(&self) -> Result<RunMetadata> {
        if !self.channel.is_reachable().await {
            return Err(GuardFailure::HostUnreachable {
                host: self.settings.server_name.clone(),
            }
            .into());
        }

        self.lock.check().await?;

        let metadata = self.metadata.load().await?;
        let today = snapshot::today();
        if !self.flags.force && metadata.backup_today() == Some(today.as_str()) {
            return Err(GuardFailure::AlreadyRanToday { date: today }.into());
        }
        if self.flags.force && metadata.backup_today() == Some(today.as_str()) {
            info!("Already backed up today, forced to run again");
        }

        if !self.flags.dry_run {
            self.ensure_dir(self.layout.host_root()).await?;
            self.lock.acquire().await?;
        }

        Ok(metadata)
    }

    async fn run_guarded(&self, metadata: &RunMetadata, sources: &[PathBuf]) -> Result<RunReport> {
        self.markers.set(Marker::Running).await;

        self.enter(Phase::Preparing);
        self.markers.set(Marker::Preparing).await;
        let protected = metadata.latest_complete();
        let evicted = self.retention.enforce(protected).await?;
        if !evicted.is_empty() {
            info!("Removed {} old snapshot(s)", evicted.len());
        }
        let baseline = choose_baseline(&self.retention.list_snapshots().await?, protected);
        match &baseline {
            Some(name) => info!("Baseline snapshot is {}", name),
            None => info!("No earlier snapshot, this is a full backup"),
        }
        if !self.flags.dry_run {
            self.ensure_dir(&self.layout.working()).await?;
        }

        self.enter(Phase::Transferring);
        self.markers.clear(Marker::Preparing).await;
        self.markers.set(Marker::BackingUp).await;
        let tally = self.transfer_all(sources, baseline.as_ref(), protected).await?;
        self.markers.clear(Marker::BackingUp).await;

        let total = sources.len();
        info!("{} of {} sources backed up", tally.succeeded, total);

        if self.flags.dry_run {
            info!("Dry run, nothing promoted");
            return Ok(RunReport::DryRun {
                succeeded: tally.succeeded,
                total,
            });
        }

        if tally.succeeded == total && !tally.interrupted {
            self.enter(Phase::Promoting);
            let snapshot = self.promote(metadata).await?;
            return Ok(RunReport::Promoted { snapshot });
        }

        self.enter(Phase::RollingBack);
        warn!(
            "Backup incomplete, {} kept for the next run",
            self.layout.working().display()
        );
        Ok(RunReport::RolledBack {
            succeeded: tally.succeeded,
            total,
            interrupted: tally.interrupted,
        })
    }

    /// Transfer every source in order. Failed sources are counted and the
    /// loop continues; an interrupt stops it.
    async fn transfer_all(
        &self,
        sources: &[PathBuf],
        baseline: Option<&SnapshotName>,
        protected: Option<&str>,
    ) -> Result<TransferTally> {
        let mut tally = TransferTally::default();

        for (index, source) in sources.iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                warn!(
                    "Interrupted before {}, {} source(s) not backed up",
                    source.display(),
                    sources.len() - index
                );
                tally.interrupted = true;
                break;
            }

            info!("Backing up {} ({}/{})", source.display(), index + 1, sources.len());
            match self.transfer_source(source, baseline, protected).await {
                Ok(TransferOutcome::Interrupted) => {
                    warn!("Backup interrupted while transferring {}", source.display());
                    tally.interrupted = true;
                    break;
                }
                Ok(outcome) if outcome.is_success() => tally.succeeded += 1,
                Ok(outcome) => error!("Backup of {} {}", source.display(), outcome),
                Err(e) => error!("Backup of {} failed: {}", source.display(), e),
            }
        }

        Ok(tally)
    }

    /// Transfer one source, evicting old snapshots and retrying when the
    /// destination fills up.
    async fn transfer_source(
        &self,
        source: &Path,
        baseline: Option<&SnapshotName>,
        protected: Option<&str>,
    ) -> Result<TransferOutcome> {
        let mut retries = 0;
        loop {
            let outcome = self.executor.transfer(source, baseline).await?;
            if outcome != TransferOutcome::DiskFull || self.flags.dry_run {
                return Ok(outcome);
            }
            if retries >= self.settings.disk_full_retries {
                error!("Destination still full after {} retries", retries);
                return Ok(outcome);
            }

            // The baseline must survive: the working snapshot links against it
            let keep = baseline.map(|b| b.as_str()).or(protected);
            match self.retention.evict_one(keep).await? {
                Some(evicted) => {
                    retries += 1;
                    info!(
                        "Removed {} to make room, retrying {} ({}/{})",
                        evicted,
                        source.display(),
                        retries,
                        self.settings.disk_full_retries
                    );
                }
                None => {
                    error!("Destination full and no snapshot can be removed");
                    return Ok(outcome);
                }
            }
        }
    }

    /// Record the new snapshot in the metadata, then rename `WORKING`.
    async fn promote(&self, previous: &RunMetadata) -> Result<SnapshotName> {
        let snapshot = SnapshotName::now();
        let target = path_arg(&self.layout.snapshot(&snapshot));
        let working = path_arg(&self.layout.working());

        if test_path(self.channel.as_ref(), "-e", &self.layout.snapshot(&snapshot)).await? {
            return Err(SnapshotError::Promotion(format!("{} already exists", target)));
        }

        let mut metadata = previous.clone();
        metadata.set(MetadataKey::LatestComplete.as_str(), snapshot.as_str())?;
        metadata.set(MetadataKey::BackupToday.as_str(), &snapshot::day_string(snapshot.day()))?;
        self.metadata.save(&metadata).await?;

        if let Err(e) = self.channel.run_checked(&["mv", &working, &target]).await {
            // Point the record back at a snapshot that exists
            if let Err(restore) = self.metadata.save(previous).await {
                error!("Could not restore metadata: {}", restore);
            }
            return Err(SnapshotError::Promotion(e.to_string()));
        }

        let latest = path_arg(&self.layout.latest_alias());
        let out = self.channel.run(&["ln", "-sfn", snapshot.as_str(), &latest]).await?;
        if !out.success() {
            warn!("Could not point {} at {}", LATEST, snapshot);
        }

        info!("Latest snapshot is now {}", snapshot);
        Ok(snapshot)
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        let dir = path_arg(dir);
        self.channel.run_checked(&["mkdir", "-p", &dir]).await?;
        Ok(())
    }

    fn enter(&self, phase: Phase) {
        debug!("Phase: {}", phase);
    }
}

/// Snapshot the next transfer links against: the recorded latest-complete
/// snapshot if it is still present, otherwise the newest one.
pub fn choose_baseline(snapshots: &[SnapshotName], latest_complete: Option<&str>) -> Option<SnapshotName> {
    if let Some(latest) = latest_complete {
        if let Some(found) = snapshots.iter().find(|s| s.as_str() == latest) {
            return Some(found.clone());
        }
        warn!("Recorded latest snapshot {} is missing, using the newest present", latest);
    }
    snapshots.last().cloned()
}

//! Run flags, lifecycle phases and the report returned by a run.

use crate::snapshot::SnapshotName;
use crate::utils::errors::GuardFailure;
use std::fmt;

/// Options chosen on the command line for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Go through every step without changing the destination
    pub dry_run: bool,
    /// Run even if a backup already completed today
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    GuardChecking,
    Preparing,
    Transferring,
    Promoting,
    RollingBack,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::GuardChecking => "checking guards",
            Phase::Preparing => "preparing",
            Phase::Transferring => "transferring",
            Phase::Promoting => "promoting",
            Phase::RollingBack => "rolling back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// A guard stopped the run before anything changed
    Skipped(GuardFailure),
    /// Every source succeeded and the working snapshot was promoted
    Promoted { snapshot: SnapshotName },
    /// The working snapshot was kept for the next run
    RolledBack {
        succeeded: usize,
        total: usize,
        interrupted: bool,
    },
    DryRun { succeeded: usize, total: usize },
}

impl RunReport {
    /// Whether the process should exit successfully
    pub fn is_success(&self) -> bool {
        match self {
            RunReport::Skipped(_) | RunReport::Promoted { .. } => true,
            RunReport::RolledBack { .. } => false,
            RunReport::DryRun { succeeded, total } => succeeded == total,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunReport::Skipped(guard) => write!(f, "skipped: {}", guard),
            RunReport::Promoted { snapshot } => write!(f, "promoted snapshot {}", snapshot),
            RunReport::RolledBack {
                succeeded,
                total,
                interrupted,
            } => write!(
                f,
                "incomplete: {} of {} sources backed up{}",
                succeeded,
                total,
                if *interrupted { " (interrupted)" } else { "" }
            ),
            RunReport::DryRun { succeeded, total } => {
                write!(f, "dry run: {} of {} sources would succeed", succeeded, total)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success_mapping() {
        let skipped = RunReport::Skipped(GuardFailure::AlreadyRanToday {
            date: "2024-03-01".to_string(),
        });
        assert!(skipped.is_success());
        assert!(RunReport::DryRun { succeeded: 2, total: 2 }.is_success());
        assert!(!RunReport::DryRun { succeeded: 1, total: 2 }.is_success());

        let rolled_back = RunReport::RolledBack {
            succeeded: 1,
            total: 2,
            interrupted: true,
        };
        assert!(!rolled_back.is_success());
        assert_eq!(
            rolled_back.to_string(),
            "incomplete: 1 of 2 sources backed up (interrupted)"
        );
    }
}

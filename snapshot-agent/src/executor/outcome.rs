//! Classification of a finished transfer.
//!
//! rsync reports many unrelated conditions through the same few exit codes.
//! Files vanishing mid-scan or a handful of unreadable files are normal on
//! a live machine and must not fail the backup.

use std::fmt;

pub const EXIT_SUCCESS: i32 = 0;
/// Some files could not be transferred (usually permission denied at source)
pub const EXIT_PARTIAL_TRANSFER: i32 = 23;
/// Source files vanished before they could be transferred
pub const EXIT_FILES_VANISHED: i32 = 24;
/// The vanished-files code as a raw wait status (24 << 8)
pub const EXIT_FILES_VANISHED_RAW: i32 = 6144;
/// Timeout in data send/receive; the receiving disk stalled when full
pub const EXIT_TIMEOUT: i32 = 30;

const VANISHED_PHRASE: &str = "some files vanished";
const NO_SPACE_PHRASE: &str = "No space left on device";

/// Phrases noticed while the tool's output streamed past.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputFlags {
    pub files_vanished: bool,
    pub no_space: bool,
}

impl OutputFlags {
    pub fn observe(&mut self, line: &str) {
        if line.contains(VANISHED_PHRASE) {
            self.files_vanished = true;
        }
        if line.contains(NO_SPACE_PHRASE) {
            self.no_space = true;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    /// Source changed during the scan
    FilesVanished,
    /// Unreadable files were skipped
    PartialTransfer,
    /// Destination ran out of space; evict and retry
    DiskFull,
    /// The run was cancelled while the transfer was in flight
    Interrupted,
    Failed { reason: String },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TransferOutcome::Succeeded | TransferOutcome::FilesVanished | TransferOutcome::PartialTransfer
        )
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Succeeded => write!(f, "succeeded"),
            TransferOutcome::FilesVanished => write!(f, "succeeded, some files vanished"),
            TransferOutcome::PartialTransfer => write!(f, "succeeded, some files could not be transferred"),
            TransferOutcome::DiskFull => write!(f, "destination full"),
            TransferOutcome::Interrupted => write!(f, "interrupted"),
            TransferOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Map an exit status (`None` when killed by a signal) to an outcome.
pub fn classify(status: Option<i32>, flags: OutputFlags) -> TransferOutcome {
    let Some(code) = status else {
        return TransferOutcome::Failed {
            reason: "terminated by signal".to_string(),
        };
    };

    match code {
        EXIT_SUCCESS => TransferOutcome::Succeeded,
        _ if flags.no_space => TransferOutcome::DiskFull,
        EXIT_FILES_VANISHED | EXIT_FILES_VANISHED_RAW => TransferOutcome::FilesVanished,
        _ if flags.files_vanished => TransferOutcome::FilesVanished,
        EXIT_PARTIAL_TRANSFER => TransferOutcome::PartialTransfer,
        EXIT_TIMEOUT => TransferOutcome::DiskFull,
        other => TransferOutcome::Failed {
            reason: format!("exit status {}", other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(files_vanished: bool, no_space: bool) -> OutputFlags {
        OutputFlags {
            files_vanished,
            no_space,
        }
    }

    #[test]
    fn test_benign_codes_are_success() {
        for code in [0, 23, 24, 6144] {
            let outcome = classify(Some(code), OutputFlags::default());
            assert!(outcome.is_success(), "code {code} -> {outcome}");
        }
        assert_eq!(classify(Some(24), OutputFlags::default()), TransferOutcome::FilesVanished);
        assert_eq!(classify(Some(23), OutputFlags::default()), TransferOutcome::PartialTransfer);
    }

    #[test]
    fn test_vanished_phrase_overrides_code() {
        assert_eq!(classify(Some(12), flags(true, false)), TransferOutcome::FilesVanished);
    }

    #[test]
    fn test_timeout_and_no_space_are_disk_full() {
        assert_eq!(classify(Some(30), OutputFlags::default()), TransferOutcome::DiskFull);
        assert_eq!(classify(Some(23), flags(false, true)), TransferOutcome::DiskFull);
        assert_eq!(classify(Some(11), flags(true, true)), TransferOutcome::DiskFull);
        assert!(!TransferOutcome::DiskFull.is_success());
    }

    #[test]
    fn test_other_codes_fail() {
        for code in [1, 2, 5, 10, 12, 20, 35, 255] {
            let outcome = classify(Some(code), OutputFlags::default());
            assert!(!outcome.is_success(), "code {code} -> {outcome}");
            assert!(matches!(outcome, TransferOutcome::Failed { .. }));
        }
        assert!(matches!(
            classify(None, OutputFlags::default()),
            TransferOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_observe_phrases() {
        let mut flags = OutputFlags::default();
        flags.observe("sending incremental file list");
        assert_eq!(flags, OutputFlags::default());

        flags.observe("file has vanished: \"/home/u/.cache/x\"");
        assert!(!flags.files_vanished);
        flags.observe("rsync warning: some files vanished before they could be transferred (code 24)");
        assert!(flags.files_vanished);

        flags.observe("rsync: write failed on \"/b/x\": No space left on device (28)");
        assert!(flags.no_space);
    }
}

//! Small state files kept in the host directory on the destination.

pub mod lock;
pub mod markers;
pub mod metadata;

use crate::remote::{path_arg, test_path, Channel};
use crate::utils::errors::{Result, SnapshotError};
use std::io::Write;
use std::path::Path;

pub use lock::AdvisoryLock;
pub use markers::{Marker, MarkerStore};
pub use metadata::{MetadataKey, MetadataStore, RunMetadata};

/// Read a file on the destination; `None` when it does not exist.
pub(crate) async fn read_remote(channel: &dyn Channel, path: &Path) -> Result<Option<String>> {
    if !test_path(channel, "-e", path).await? {
        return Ok(None);
    }
    let path_str = path_arg(path);
    let out = channel.spawn(&["cat", &path_str]).await?;
    if out.success() {
        return Ok(Some(out.output));
    }
    Err(SnapshotError::RemoteCommand {
        command: format!("cat {}", path_str),
        status: out.status,
        output: out.output,
    })
}

/// Write `contents` to a local temporary file in `scratch_dir`, then copy it
/// over `path` on the destination.
pub(crate) async fn write_remote(
    channel: &dyn Channel,
    scratch_dir: &Path,
    contents: &str,
    path: &Path,
) -> Result<()> {
    std::fs::create_dir_all(scratch_dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(scratch_dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    channel.copy(tmp.path(), path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CommandOutput;
    use async_trait::async_trait;

    /// Destination whose tools answer in German and hold no files.
    struct GermanEmptyChannel;

    #[async_trait]
    impl Channel for GermanEmptyChannel {
        fn describe(&self) -> String {
            "german".to_string()
        }

        async fn is_reachable(&self) -> bool {
            true
        }

        async fn spawn(&self, argv: &[&str]) -> Result<CommandOutput> {
            let output = match argv {
                ["test", ..] => String::new(),
                [cmd, path, ..] => format!("{}: {}: Datei oder Verzeichnis nicht gefunden", cmd, path),
                _ => String::new(),
            };
            Ok(CommandOutput { status: 1, output })
        }

        async fn copy(&self, _local: &Path, _remote: &Path) -> Result<()> {
            Ok(())
        }

        fn transfer_target(&self, remote: &Path) -> String {
            path_arg(remote)
        }
    }

    #[tokio::test]
    async fn test_read_missing_file_ignores_message_language() {
        let contents = read_remote(&GermanEmptyChannel, Path::new("/b/laptop/.lock")).await.unwrap();
        assert!(contents.is_none());
    }

    #[tokio::test]
    async fn test_read_unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let channel = crate::remote::LocalChannel::new();
        // A directory exists but cannot be read with cat
        let err = read_remote(&channel, dir.path()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::RemoteCommand { .. }));
    }
}

//! Exclusion list handed to the transfer tool through `--exclude-from`.

use crate::utils::errors::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Write one pattern per line to a temporary file in `dir`.
///
/// The file is removed when the returned handle is dropped.
pub fn write_exclude_file(dir: &Path, patterns: &[String]) -> Result<NamedTempFile> {
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::Builder::new()
        .prefix("excludes-")
        .tempfile_in(dir)?;

    for pattern in patterns {
        writeln!(file, "{}", pattern)?;
    }
    file.flush()?;

    debug!(
        "Wrote {} exclusions to {}",
        patterns.len(),
        file.path().display()
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclude_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let patterns = vec![".DS_Store".to_string(), "node_modules".to_string()];

        let file = write_exclude_file(&dir.path().join("settings"), &patterns).unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), ".DS_Store\nnode_modules\n");

        drop(file);
        assert!(!path.exists());
    }
}

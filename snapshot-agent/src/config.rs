//! Configuration management for the snapshot agent.
//!
//! Loads the settings document (JSON or TOML, chosen by file extension) and
//! validates it once into an immutable [`Settings`] value. Every component
//! receives the settings it needs at construction; nothing reads them lazily.

use crate::remote::process::is_shell_safe;
use crate::utils::errors::{Result, SnapshotError};
use config::{Config, ConfigBuilder, File, FileFormat};
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

const DEFAULT_EXCLUDE_FILES: &str = ".AppleDB,.AppleDesktop,.AppleDouble,:2e*,.DS_Store,._*,\
.Trashes,.Trash,.fseventsd,.bzvol,.cocoapods";

const DEFAULT_EXCLUDE_FOLDERS: &str = "lost+found,Network Trash Folder,Temporary Items,\
Saved Application State,Library,Parallels,VirtualBoxVMs,VirtualBox VMs,node_modules";

/// How the destination is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Backup server over ssh/scp.
    Ssh,
    /// Destination mounted on this machine.
    Local,
}

/// The settings document as written by the operator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSettings {
    server_name: Option<String>,
    server_address: Option<String>,
    backup_destination: Option<String>,
    extra_backup_sources: String,
    exclude_files: String,
    exclude_folders: String,
    maximum_used_percent: i64,
    settings_dir: String,
    include_home: bool,
    local_hostname: Option<String>,
    transport: Transport,
    transfer_tool: String,
    bandwidth_limit: u32,
    transfer_timeout: u64,
    lock_stale_after_minutes: i64,
    disk_full_retries: u32,
    log_file: Option<String>,
    log_level: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Hostname of the backup server
    pub server_name: String,

    /// Address used for ssh/scp/ping (defaults to the server name)
    pub server_address: String,

    /// Absolute root of all backups on the destination
    pub backup_destination: PathBuf,

    /// Extra local trees to back up after the home directory
    pub extra_backup_sources: Vec<PathBuf>,

    pub exclude_files: Vec<String>,
    pub exclude_folders: Vec<String>,

    /// Destination usage at or above which the oldest snapshot is evicted
    pub maximum_used_percent: u8,

    /// Local directory for the log and temporary files
    pub settings_dir: PathBuf,

    /// Home directory, leading the source list when enabled
    pub home: Option<PathBuf>,

    /// Name of this machine; snapshots live under `<destination>/<local_hostname>`
    pub local_hostname: String,

    pub transport: Transport,

    /// File-transfer program (rsync compatible)
    pub transfer_tool: String,

    /// KiB/s, 0 means unlimited
    pub bandwidth_limit: u32,

    /// I/O timeout handed to the transfer tool, in seconds
    pub transfer_timeout: u64,

    pub lock_stale_after_minutes: i64,

    /// Evict-and-retry attempts per source after a disk-full outcome
    pub disk_full_retries: u32,

    pub log_file: PathBuf,
    pub log_level: String,
}

impl Settings {
    /// Load settings from a JSON or TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SnapshotError::Config(format!(
                "settings file {} not found",
                path.display()
            )));
        }
        let builder = with_defaults()?.add_source(File::from(path));
        Self::from_raw(builder.build()?.try_deserialize()?)
    }

    /// Parse settings from an in-memory document
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        let builder = with_defaults()?.add_source(File::from_str(content, format));
        Self::from_raw(builder.build()?.try_deserialize()?)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let server_name = required(raw.server_name, "server-name")?;
        let server_address = raw
            .server_address
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| server_name.clone());

        let backup_destination = PathBuf::from(required(raw.backup_destination, "backup-destination")?);
        if !backup_destination.is_absolute() {
            return Err(SnapshotError::Config(format!(
                "backup-destination must be absolute, got {}",
                backup_destination.display()
            )));
        }

        if !(1..=100).contains(&raw.maximum_used_percent) {
            return Err(SnapshotError::Config(format!(
                "maximum-used-percent must be between 1 and 100, got {}",
                raw.maximum_used_percent
            )));
        }

        if raw.transfer_tool.trim().is_empty() {
            return Err(SnapshotError::Config("transfer-tool is empty".to_string()));
        }

        let home = std::env::var_os("HOME").map(PathBuf::from);

        let settings_dir = {
            let dir = PathBuf::from(&raw.settings_dir);
            if dir.is_absolute() {
                dir
            } else {
                match &home {
                    Some(h) => h.join(dir),
                    None => {
                        return Err(SnapshotError::Config(
                            "settings-dir is relative and HOME is not set".to_string(),
                        ))
                    }
                }
            }
        };

        if raw.include_home && home.is_none() {
            return Err(SnapshotError::Config(
                "include-home is set but HOME is not set".to_string(),
            ));
        }

        let local_hostname = match raw.local_hostname.filter(|h| !h.trim().is_empty()) {
            Some(h) => h,
            None => hostname::get()?
                .into_string()
                .map_err(|_| SnapshotError::Config("hostname is not valid UTF-8".to_string()))?,
        };
        if local_hostname.contains('/') {
            return Err(SnapshotError::Config(format!(
                "local-hostname must not contain '/': {}",
                local_hostname
            )));
        }

        // scp and rsync pass the remote path to the server's shell unquoted
        if raw.transport == Transport::Ssh {
            let host_root = backup_destination.join(&local_hostname);
            if !is_shell_safe(&host_root.to_string_lossy()) {
                return Err(SnapshotError::Config(format!(
                    "{} needs shell quoting, which the ssh transport cannot pass through",
                    host_root.display()
                )));
            }
        }

        let extra_backup_sources: Vec<PathBuf> = split_list(&raw.extra_backup_sources)
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let home = if raw.include_home { home } else { None };
        check_source_names(home.iter().chain(extra_backup_sources.iter()))?;

        let log_file = raw
            .log_file
            .map(PathBuf::from)
            .unwrap_or_else(|| settings_dir.join("backup.log"));

        Ok(Settings {
            server_name,
            server_address,
            backup_destination,
            extra_backup_sources,
            exclude_files: split_list(&raw.exclude_files),
            exclude_folders: split_list(&raw.exclude_folders),
            maximum_used_percent: raw.maximum_used_percent as u8,
            settings_dir,
            home,
            local_hostname,
            transport: raw.transport,
            transfer_tool: raw.transfer_tool,
            bandwidth_limit: raw.bandwidth_limit,
            transfer_timeout: raw.transfer_timeout,
            lock_stale_after_minutes: raw.lock_stale_after_minutes,
            disk_full_retries: raw.disk_full_retries,
            log_file,
            log_level: raw.log_level,
        })
    }

    /// Ordered, de-duplicated list of local trees to back up.
    ///
    /// Extra sources that do not exist on this machine are skipped.
    pub fn sources(&self) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = Vec::new();

        if let Some(home) = &self.home {
            sources.push(home.clone());
        }

        for extra in &self.extra_backup_sources {
            if !extra.exists() {
                tracing::warn!("Extra backup source {} does not exist, skipping", extra.display());
                continue;
            }
            if !sources.contains(extra) {
                sources.push(extra.clone());
            }
        }

        sources
    }

    /// Exclusion patterns handed to the transfer tool, files first
    pub fn exclusions(&self) -> Vec<String> {
        self.exclude_files
            .iter()
            .chain(self.exclude_folders.iter())
            .cloned()
            .collect()
    }

    /// `<backup-destination>/<local-hostname>`
    pub fn host_root(&self) -> PathBuf {
        self.backup_destination.join(&self.local_hostname)
    }
}

fn with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
    Ok(Config::builder()
        .set_default("extra-backup-sources", "")?
        .set_default("exclude-files", DEFAULT_EXCLUDE_FILES)?
        .set_default("exclude-folders", DEFAULT_EXCLUDE_FOLDERS)?
        .set_default("maximum-used-percent", 90_i64)?
        .set_default("settings-dir", ".snapshot-agent")?
        .set_default("include-home", true)?
        .set_default("transport", "ssh")?
        .set_default("transfer-tool", "rsync")?
        .set_default("bandwidth-limit", 2500_i64)?
        .set_default("transfer-timeout", 300_i64)?
        .set_default("lock-stale-after-minutes", 720_i64)?
        .set_default("disk-full-retries", 2_i64)?
        .set_default("log-level", "info")?)
}

/// Each source lands in `WORKING/<last component>`, so two different
/// sources must not share one.
fn check_source_names<'a>(sources: impl Iterator<Item = &'a PathBuf>) -> Result<()> {
    let mut seen: Vec<(&OsStr, &PathBuf)> = Vec::new();
    for source in sources {
        let Some(name) = source.file_name() else {
            return Err(SnapshotError::Config(format!(
                "backup source {} has no directory name",
                source.display()
            )));
        };
        match seen.iter().find(|(n, _)| *n == name) {
            Some((_, other)) if *other != source => {
                return Err(SnapshotError::Config(format!(
                    "backup sources {} and {} would both be stored as {}",
                    other.display(),
                    source.display(),
                    name.to_string_lossy()
                )));
            }
            Some(_) => {}
            None => seen.push((name, source)),
        }
    }
    Ok(())
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(SnapshotError::Config(format!("missing required key '{}'", key))),
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!(
            r#"{{
                "server-name": "skynet",
                "backup-destination": "/zdata/backups",
                "settings-dir": "/tmp/snapshot-agent-test",
                "local-hostname": "laptop",
                "include-home": false{}
            }}"#,
            extra
        )
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::parse(&minimal(""), FileFormat::Json).unwrap();

        assert_eq!(settings.server_address, "skynet");
        assert_eq!(settings.maximum_used_percent, 90);
        assert_eq!(settings.transport, Transport::Ssh);
        assert_eq!(settings.transfer_tool, "rsync");
        assert_eq!(settings.disk_full_retries, 2);
        assert!(settings.exclude_files.contains(&".DS_Store".to_string()));
        assert!(settings.exclude_folders.contains(&"lost+found".to_string()));
        assert_eq!(settings.host_root(), PathBuf::from("/zdata/backups/laptop"));
        assert_eq!(
            settings.log_file,
            PathBuf::from("/tmp/snapshot-agent-test/backup.log")
        );
    }

    #[test]
    fn test_missing_required_key() {
        let doc = r#"{ "server-name": "skynet", "local-hostname": "laptop", "include-home": false }"#;
        let err = Settings::parse(doc, FileFormat::Json).unwrap_err();

        match err {
            SnapshotError::Config(msg) => assert!(msg.contains("backup-destination")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_relative_destination_rejected() {
        let doc = r#"{
            "server-name": "skynet",
            "backup-destination": "backups",
            "local-hostname": "laptop",
            "settings-dir": "/tmp/x",
            "include-home": false
        }"#;
        assert!(matches!(
            Settings::parse(doc, FileFormat::Json),
            Err(SnapshotError::Config(_))
        ));
    }

    #[test]
    fn test_maximum_used_percent_range() {
        let doc = minimal(r#", "maximum-used-percent": 0"#);
        assert!(Settings::parse(&doc, FileFormat::Json).is_err());

        let doc = minimal(r#", "maximum-used-percent": 75"#);
        let settings = Settings::parse(&doc, FileFormat::Json).unwrap();
        assert_eq!(settings.maximum_used_percent, 75);
    }

    #[test]
    fn test_toml_document() {
        let doc = r#"
server-name = "nas"
server-address = "192.168.0.7"
backup-destination = "/volume1/backups"
settings-dir = "/tmp/snapshot-agent-test"
local-hostname = "desktop"
include-home = false
transport = "local"
exclude-files = ".DS_Store, Thumbs.db"
"#;
        let settings = Settings::parse(doc, FileFormat::Toml).unwrap();

        assert_eq!(settings.server_address, "192.168.0.7");
        assert_eq!(settings.transport, Transport::Local);
        assert_eq!(settings.exclude_files, vec![".DS_Store", "Thumbs.db"]);
    }

    #[test]
    fn test_sources_skip_missing_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::create_dir(&a).unwrap();
        let missing = dir.path().join("missing");

        let extra = format!(
            r#", "extra-backup-sources": "{a},{missing},{a}""#,
            a = a.display(),
            missing = missing.display()
        );
        let settings = Settings::parse(&minimal(&extra), FileFormat::Json).unwrap();

        assert_eq!(settings.sources(), vec![a]);
    }

    #[test]
    fn test_sources_with_same_name_rejected() {
        let extra = r#", "extra-backup-sources": "/home/u/data,/srv/data""#;
        match Settings::parse(&minimal(extra), FileFormat::Json) {
            Err(SnapshotError::Config(msg)) => {
                assert!(msg.contains("/home/u/data"));
                assert!(msg.contains("/srv/data"));
            }
            other => panic!("expected a config error, got {other:?}"),
        }

        // Listing the same tree twice is not a collision
        let extra = r#", "extra-backup-sources": "/srv/data,/srv/data/,/srv/media""#;
        assert!(Settings::parse(&minimal(extra), FileFormat::Json).is_ok());

        let extra = r#", "extra-backup-sources": "/""#;
        assert!(matches!(
            Settings::parse(&minimal(extra), FileFormat::Json),
            Err(SnapshotError::Config(_))
        ));
    }

    #[test]
    fn test_ssh_destination_must_be_plain() {
        let doc = r#"{
            "server-name": "skynet",
            "backup-destination": "/zdata/my backups",
            "settings-dir": "/tmp/x",
            "local-hostname": "laptop",
            "include-home": false
        }"#;
        assert!(matches!(
            Settings::parse(doc, FileFormat::Json),
            Err(SnapshotError::Config(_))
        ));

        let local = doc.replace(r#""include-home": false"#, r#""include-home": false, "transport": "local""#);
        assert!(Settings::parse(&local, FileFormat::Json).is_ok());
    }

    #[test]
    fn test_exclusions_order() {
        let doc = minimal(r#", "exclude-files": ".DS_Store", "exclude-folders": "Library,node_modules""#);
        let settings = Settings::parse(&doc, FileFormat::Json).unwrap();

        assert_eq!(settings.exclusions(), vec![".DS_Store", "Library", "node_modules"]);
    }
}

//! Run metadata record kept at `<host dir>/.metadata`.
//!
//! The document is a flat JSON object with two keys, `latest-complete` and
//! `backup-today`. Reading is forgiving: unknown keys are dropped and missing
//! keys default to an empty string, so older or damaged documents heal on the
//! next write. Access by key name is strict and rejects anything else.

use super::{read_remote, write_remote};
use crate::remote::Channel;
use crate::utils::errors::{Result, SnapshotError};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    /// Name of the most recently promoted snapshot
    LatestComplete,
    /// Date (`YYYY-MM-DD`) of the last fully successful run
    BackupToday,
}

impl MetadataKey {
    pub const ALL: [MetadataKey; 2] = [MetadataKey::LatestComplete, MetadataKey::BackupToday];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKey::LatestComplete => "latest-complete",
            MetadataKey::BackupToday => "backup-today",
        }
    }
}

impl FromStr for MetadataKey {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "latest-complete" => Ok(MetadataKey::LatestComplete),
            "backup-today" => Ok(MetadataKey::BackupToday),
            other => Err(SnapshotError::MetadataKey(other.to_string())),
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetadata {
    latest_complete: String,
    backup_today: String,
}

impl RunMetadata {
    /// Parse a stored document, healing whatever does not fit.
    pub fn from_document(document: &str) -> Self {
        let mut metadata = RunMetadata::default();
        if document.trim().is_empty() {
            return metadata;
        }

        let object = match serde_json::from_str::<Value>(document) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                warn!("Metadata is not a JSON object, starting from empty values");
                return metadata;
            }
            Err(e) => {
                warn!("Metadata is not valid JSON ({}), starting from empty values", e);
                return metadata;
            }
        };

        for (name, value) in object {
            let key = match name.parse::<MetadataKey>() {
                Ok(key) => key,
                Err(_) => {
                    warn!("Dropping unexpected metadata key '{}'", name);
                    continue;
                }
            };
            match value {
                Value::String(s) => metadata.slot_mut(key).push_str(&s),
                Value::Null => {}
                other => warn!("Metadata key '{}' holds {} instead of a string, clearing it", key, other),
            }
        }

        metadata
    }

    pub fn to_document(&self) -> Result<String> {
        let mut object = Map::new();
        for key in MetadataKey::ALL {
            object.insert(key.as_str().to_string(), Value::String(self.value(key).to_string()));
        }
        Ok(serde_json::to_string_pretty(&Value::Object(object))?)
    }

    /// Look up a key by name
    pub fn get(&self, key: &str) -> Result<&str> {
        Ok(self.value(key.parse()?))
    }

    /// Set a key by name
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let slot = self.slot_mut(key.parse()?);
        slot.clear();
        slot.push_str(value);
        Ok(())
    }

    pub fn value(&self, key: MetadataKey) -> &str {
        match key {
            MetadataKey::LatestComplete => &self.latest_complete,
            MetadataKey::BackupToday => &self.backup_today,
        }
    }

    fn slot_mut(&mut self, key: MetadataKey) -> &mut String {
        match key {
            MetadataKey::LatestComplete => &mut self.latest_complete,
            MetadataKey::BackupToday => &mut self.backup_today,
        }
    }

    pub fn latest_complete(&self) -> Option<&str> {
        Some(self.latest_complete.as_str()).filter(|s| !s.is_empty())
    }

    pub fn backup_today(&self) -> Option<&str> {
        Some(self.backup_today.as_str()).filter(|s| !s.is_empty())
    }
}

/// Fetches and pushes the metadata document through the channel.
pub struct MetadataStore {
    channel: Arc<dyn Channel>,
    path: PathBuf,
    scratch_dir: PathBuf,
}

impl MetadataStore {
    pub fn new(channel: Arc<dyn Channel>, path: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            channel,
            path,
            scratch_dir,
        }
    }

    pub async fn load(&self) -> Result<RunMetadata> {
        match read_remote(self.channel.as_ref(), &self.path).await? {
            Some(document) => Ok(RunMetadata::from_document(&document)),
            None => {
                debug!("No metadata at {}, starting fresh", self.path.display());
                Ok(RunMetadata::default())
            }
        }
    }

    /// Overwrite the stored document
    pub async fn save(&self, metadata: &RunMetadata) -> Result<()> {
        let document = metadata.to_document()?;
        write_remote(self.channel.as_ref(), &self.scratch_dir, &document, &self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::LocalChannel;

    #[test]
    fn test_get_set_known_keys() {
        let mut metadata = RunMetadata::default();
        metadata.set("latest-complete", "2024-03-01-021507").unwrap();
        metadata.set("backup-today", "2024-03-01").unwrap();

        assert_eq!(metadata.get("latest-complete").unwrap(), "2024-03-01-021507");
        assert_eq!(metadata.backup_today(), Some("2024-03-01"));
    }

    #[test]
    fn test_unknown_key_is_typed_error() {
        let mut metadata = RunMetadata::default();

        match metadata.get("latest") {
            Err(SnapshotError::MetadataKey(key)) => assert_eq!(key, "latest"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            metadata.set("backup_today", "x"),
            Err(SnapshotError::MetadataKey(_))
        ));
    }

    #[test]
    fn test_load_drops_extra_and_defaults_missing() {
        let doc = r#"{"latest-complete": "2024-03-01-021507", "backup-yesterday": "2024-02-29"}"#;
        let metadata = RunMetadata::from_document(doc);

        assert_eq!(metadata.latest_complete(), Some("2024-03-01-021507"));
        assert_eq!(metadata.get("backup-today").unwrap(), "");
        assert_eq!(metadata.backup_today(), None);
    }

    #[test]
    fn test_load_heals_garbage() {
        assert_eq!(RunMetadata::from_document("{not json"), RunMetadata::default());
        assert_eq!(RunMetadata::from_document("[1, 2]"), RunMetadata::default());
        assert_eq!(RunMetadata::from_document(""), RunMetadata::default());

        let doc = r#"{"latest-complete": 42, "backup-today": "2024-03-01"}"#;
        let metadata = RunMetadata::from_document(doc);
        assert_eq!(metadata.latest_complete(), None);
        assert_eq!(metadata.backup_today(), Some("2024-03-01"));
    }

    #[test]
    fn test_document_has_exactly_the_two_keys() {
        let mut metadata = RunMetadata::default();
        metadata.set("backup-today", "2024-03-01").unwrap();

        let value: Value = serde_json::from_str(&metadata.to_document().unwrap()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["latest-complete"], "");
        assert_eq!(object["backup-today"], "2024-03-01");
    }

    #[tokio::test]
    async fn test_store_round_trip_over_local_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(
            Arc::new(LocalChannel::new()),
            dir.path().join(".metadata"),
            dir.path().join("scratch"),
        );

        assert_eq!(store.load().await.unwrap(), RunMetadata::default());

        let mut metadata = RunMetadata::default();
        metadata.set("latest-complete", "2024-03-01-021507").unwrap();
        store.save(&metadata).await.unwrap();

        assert_eq!(store.load().await.unwrap(), metadata);
    }
}

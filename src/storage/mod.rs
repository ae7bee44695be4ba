//! Storage backends for finished artifacts and the dispatcher that picks one.

mod local;
mod s3;
mod sigv4;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::backup_store::BackupRecord;
use crate::config::RuntimeSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Object key prefix used by the S3 backend; also how legacy records without
/// a stored kind are recognised as S3 objects.
pub const S3_KEY_PREFIX: &str = "backups/";

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Local,
    S3,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "local" => Some(StorageKind::Local),
            "s3" => Some(StorageKind::S3),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {key} returned {status}: {body}")]
    UnexpectedStatus {
        method: &'static str,
        key: String,
        status: u16,
        body: String,
    },

    #[error("Storage configuration incomplete: {0}")]
    ConfigurationIncomplete(String),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
}

/// A place where artifacts are kept permanently.
///
/// The path returned by `save` is all that is needed to later `fetch` or
/// `delete` the artifact.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Copies the artifact at `artifact` into the backend under `name`.
    async fn save(&self, name: &str, artifact: &Path) -> Result<String, StorageError>;

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting an artifact that is already gone succeeds.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Builds storage backends from the current runtime settings.
///
/// Nothing is cached: every resolve sees the latest settings.
pub struct StorageDispatcher {
    settings: RuntimeSettings,
    http: reqwest::Client,
}

impl StorageDispatcher {
    pub fn new(settings: RuntimeSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build storage HTTP client")?;
        Ok(Self { settings, http })
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// The kind new artifacts go to. Unknown values fall back to local.
    pub fn default_kind(&self) -> StorageKind {
        let configured = self.settings.storage_type();
        StorageKind::parse(&configured).unwrap_or_else(|| {
            debug!(
                "Unknown storage type '{}', falling back to local",
                configured
            );
            StorageKind::Local
        })
    }

    pub fn resolve(&self, kind: StorageKind) -> Result<Box<dyn StorageBackend>, StorageError> {
        match kind {
            StorageKind::Local => Ok(Box::new(LocalStorage::new(self.settings.local_path()))),
            StorageKind::S3 => Ok(Box::new(S3Storage::new(
                self.settings.s3(),
                self.http.clone(),
            )?)),
        }
    }

    pub fn resolve_default(&self) -> Result<Box<dyn StorageBackend>, StorageError> {
        self.resolve(self.default_kind())
    }

    /// Kind that holds a record's artifact: the kind stored on the record,
    /// then the configured default, then the path convention.
    pub fn kind_for_record(&self, record: &BackupRecord) -> StorageKind {
        if let Some(kind) = StorageKind::parse(&record.storage_type) {
            return kind;
        }
        if let Some(kind) = StorageKind::parse(&self.settings.storage_type()) {
            return kind;
        }
        if record.file_path.starts_with(S3_KEY_PREFIX) {
            StorageKind::S3
        } else {
            StorageKind::Local
        }
    }

    pub fn resolve_for_record(
        &self,
        record: &BackupRecord,
    ) -> Result<Box<dyn StorageBackend>, StorageError> {
        self.resolve(self.kind_for_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup_store::BackupStatus;
    use crate::config::{keys, MemorySettingsStore};
    use std::sync::Arc;

    fn dispatcher(values: &[(&str, &str)]) -> StorageDispatcher {
        let store = Arc::new(MemorySettingsStore::with_values(values));
        StorageDispatcher::new(RuntimeSettings::new(store)).unwrap()
    }

    fn record(storage_type: &str, file_path: &str) -> BackupRecord {
        let mut record = BackupRecord::started(1, BackupStatus::Success, String::new());
        record.storage_type = storage_type.to_string();
        record.file_path = file_path.to_string();
        record
    }

    #[test]
    fn default_kind_falls_back_to_local() {
        assert_eq!(
            dispatcher(&[(keys::STORAGE_TYPE, "s3")]).default_kind(),
            StorageKind::S3
        );
        assert_eq!(
            dispatcher(&[(keys::STORAGE_TYPE, "ftp")]).default_kind(),
            StorageKind::Local
        );
        assert_eq!(dispatcher(&[]).default_kind(), StorageKind::Local);
    }

    #[test]
    fn stored_kind_wins_over_configuration() {
        let d = dispatcher(&[(keys::STORAGE_TYPE, "s3")]);
        assert_eq!(
            d.kind_for_record(&record("local", "backups/20240101/a.zip")),
            StorageKind::Local
        );
    }

    #[test]
    fn configured_kind_used_for_legacy_records() {
        let d = dispatcher(&[(keys::STORAGE_TYPE, "s3")]);
        assert_eq!(
            d.kind_for_record(&record("", "20240101/a.zip")),
            StorageKind::S3
        );
    }

    #[test]
    fn path_convention_is_last_resort() {
        let d = dispatcher(&[(keys::STORAGE_TYPE, "nfs")]);
        assert_eq!(
            d.kind_for_record(&record("", "backups/20240101/a.zip")),
            StorageKind::S3
        );
        assert_eq!(
            d.kind_for_record(&record("", "/srv/backups/20240101/a.zip")),
            StorageKind::Local
        );
    }

    #[test]
    fn resolving_incomplete_s3_fails() {
        let d = dispatcher(&[(keys::S3_ACCESS_KEY, "AKIA")]);
        let err = d.resolve(StorageKind::S3).err().unwrap();
        assert!(matches!(err, StorageError::ConfigurationIncomplete(_)));

        assert_eq!(
            d.resolve(StorageKind::Local).unwrap().kind(),
            StorageKind::Local
        );
    }
}

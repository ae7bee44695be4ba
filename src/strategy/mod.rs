//! Backup strategies: turn a task's source into a single local artifact.

mod database_dump;
mod file_archive;
pub mod naming;

pub use database_dump::DatabaseDump;
pub use file_archive::FileArchive;

use crate::backup_store::BackupKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Backup command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Unsupported database type: {0}")]
    UnsupportedDatabase(String),

    #[error("Strategy {strategy} cannot handle {source_kind} sources")]
    SourceMismatch {
        strategy: &'static str,
        source_kind: &'static str,
    },

    #[error("Timed out after {} s", .0.as_secs())]
    Timeout(Duration),
}

impl From<zip::result::ZipError> for StrategyError {
    fn from(e: zip::result::ZipError) -> Self {
        StrategyError::Archive(e.to_string())
    }
}

fn default_database_type() -> String {
    "mysql".to_string()
}

/// Connection details of a database task.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatabaseSource {
    #[serde(rename = "type", default = "default_database_type")]
    pub db_type: String,
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Empty or `all` dumps every database.
    #[serde(default)]
    pub database: String,
}

impl DatabaseSource {
    pub fn dumps_all_databases(&self) -> bool {
        self.database.is_empty() || self.database == "all"
    }

    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            3306
        } else {
            self.port
        }
    }
}

/// Paths archived by a file or config task.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FileSource {
    pub paths: Vec<String>,
}

/// A task's `source_info`, parsed according to its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Database(DatabaseSource),
    Files(FileSource),
    Config(FileSource),
}

impl SourceDescriptor {
    pub fn parse(kind: BackupKind, source_info: &str) -> Result<Self, String> {
        match kind {
            BackupKind::Database => {
                let source: DatabaseSource =
                    serde_json::from_str(source_info).map_err(|e| e.to_string())?;
                if source.host.trim().is_empty() {
                    return Err("host must not be empty".to_string());
                }
                Ok(SourceDescriptor::Database(source))
            }
            BackupKind::File => Ok(SourceDescriptor::Files(Self::parse_paths(source_info)?)),
            BackupKind::Config => Ok(SourceDescriptor::Config(Self::parse_paths(source_info)?)),
        }
    }

    fn parse_paths(source_info: &str) -> Result<FileSource, String> {
        let source: FileSource = serde_json::from_str(source_info).map_err(|e| e.to_string())?;
        if source.paths.is_empty() {
            return Err("paths must not be empty".to_string());
        }
        if source.paths.iter().any(|p| p.trim().is_empty()) {
            return Err("paths must not contain empty entries".to_string());
        }
        Ok(source)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SourceDescriptor::Database(_) => "database",
            SourceDescriptor::Files(_) => "file",
            SourceDescriptor::Config(_) => "config",
        }
    }
}

/// What a strategy needs to know about the run it produces an artifact for.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub task_id: i64,
    pub task_name: String,
    /// `YYYYMMDDhhmmss` version tag shared with the record.
    pub version: String,
    /// Directory the artifact must be written into. Owned by the caller.
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

#[async_trait]
pub trait BackupStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn produce_artifact(
        &self,
        source: &SourceDescriptor,
        request: &ArtifactRequest,
    ) -> Result<Artifact, StrategyError>;
}

/// One strategy per source family.
#[derive(Clone)]
pub struct StrategySet {
    database: Arc<dyn BackupStrategy>,
    archive: Arc<dyn BackupStrategy>,
}

impl StrategySet {
    pub fn new(database: Arc<dyn BackupStrategy>, archive: Arc<dyn BackupStrategy>) -> Self {
        Self { database, archive }
    }

    /// `mysqldump` at the given path and zip archives.
    pub fn standard(mysqldump_path: impl Into<String>) -> Self {
        Self::new(
            Arc::new(DatabaseDump::new(mysqldump_path)),
            Arc::new(FileArchive::new()),
        )
    }

    pub fn for_source(&self, source: &SourceDescriptor) -> &Arc<dyn BackupStrategy> {
        match source {
            SourceDescriptor::Database(_) => &self.database,
            SourceDescriptor::Files(_) | SourceDescriptor::Config(_) => &self.archive,
        }
    }
}

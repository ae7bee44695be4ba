//! Error taxonomy shared by the scheduler, the engine and the sweepers.

use crate::backup_store::BackupRecord;
use crate::storage::StorageError;
use crate::strategy::StrategyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidScheduleExpression { expression: String, reason: String },

    #[error("Malformed source info for task {task_id}: {reason}")]
    MalformedSourceInfo { task_id: i64, reason: String },

    #[error("Backup strategy failed: {0}")]
    StrategyFailure(#[from] StrategyError),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    #[error("Configuration incomplete: {0}")]
    ConfigurationIncomplete(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task {0} already has a run in progress")]
    TaskAlreadyRunning(i64),

    #[error("Record store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Failure of a single execution.
///
/// `record` holds the terminal `failed` record when one was created. It is
/// `None` for failures that happen before anything is persisted.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionError {
    pub record: Option<Box<BackupRecord>>,
    #[source]
    pub error: BackupError,
}

impl ExecutionError {
    pub fn before_record(error: impl Into<BackupError>) -> Self {
        Self {
            record: None,
            error: error.into(),
        }
    }

    pub fn with_record(record: BackupRecord, error: impl Into<BackupError>) -> Self {
        Self {
            record: Some(Box::new(record)),
            error: error.into(),
        }
    }
}

//! Durable storage for backup tasks, backup records and runtime settings.

mod models;
mod schema;
mod sqlite_backup_store;

pub use models::*;
pub use schema::BACKUP_VERSIONED_SCHEMAS;
pub use sqlite_backup_store::SqliteBackupStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Record store contract.
///
/// Lookups return `Ok(None)` for absent rows; `Err` is reserved for genuine I/O
/// or data failures. Updating a row that does not exist is an error.
pub trait BackupStore: Send + Sync {
    // Tasks
    fn create_task(&self, task: &NewBackupTask) -> Result<BackupTask>;
    fn update_task(&self, task: &BackupTask) -> Result<()>;
    /// Returns whether a task was deleted. Records of the task are kept.
    fn delete_task(&self, id: i64) -> Result<bool>;
    fn get_task(&self, id: i64) -> Result<Option<BackupTask>>;
    fn list_tasks(&self) -> Result<Vec<BackupTask>>;
    fn list_enabled_tasks(&self) -> Result<Vec<BackupTask>>;

    // Records
    /// Inserts the record and returns its new id; `record.id` is ignored.
    fn create_record(&self, record: &BackupRecord) -> Result<i64>;
    fn update_record(&self, record: &BackupRecord) -> Result<()>;
    fn get_record(&self, id: i64) -> Result<Option<BackupRecord>>;
    fn delete_record(&self, id: i64) -> Result<bool>;
    fn list_records_by_status(&self, status: BackupStatus) -> Result<Vec<BackupRecord>>;
    /// Records started at or before `cutoff` that still own an artifact and are not cleaned.
    fn list_records_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>>;
    /// Most recent records of a task first.
    fn list_records_by_task(&self, task_id: i64, limit: usize) -> Result<Vec<BackupRecord>>;
    /// Page of records, most recent first, together with the total count.
    fn list_records(&self, offset: usize, limit: usize) -> Result<(Vec<BackupRecord>, usize)>;
}

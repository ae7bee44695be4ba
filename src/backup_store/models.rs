use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a task backs up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Database,
    File,
    Config,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Database => "database",
            BackupKind::File => "file",
            BackupKind::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "database" => Some(BackupKind::Database),
            "file" => Some(BackupKind::File),
            "config" => Some(BackupKind::Config),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a backup record.
///
/// `Success`, `Failed` and `Cleaned` are terminal for the engine. `Cancelled`
/// exists in the persisted vocabulary but nothing in this crate produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Cleaned,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Success => "success",
            BackupStatus::Failed => "failed",
            BackupStatus::Cancelled => "cancelled",
            BackupStatus::Cleaned => "cleaned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BackupStatus::Pending),
            "running" => Some(BackupStatus::Running),
            "success" => Some(BackupStatus::Success),
            "failed" => Some(BackupStatus::Failed),
            "cancelled" => Some(BackupStatus::Cancelled),
            "cleaned" => Some(BackupStatus::Cleaned),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring backup job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTask {
    pub id: i64,
    pub name: String,
    pub kind: BackupKind,
    /// Kind-specific JSON, parsed only when the task runs.
    pub source_info: String,
    /// Cron expression with a leading seconds field.
    pub schedule: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a task; ids and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewBackupTask {
    pub name: String,
    pub kind: BackupKind,
    pub source_info: String,
    pub schedule: String,
    pub enabled: bool,
}

/// One execution attempt of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: i64,
    pub task_id: i64,
    pub status: BackupStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_size: i64,
    /// Backend-specific location of the artifact; empty unless status is `Success`.
    pub file_path: String,
    /// Storage kind tag as persisted. Historical rows may hold an empty or unknown value.
    pub storage_type: String,
    pub error_message: String,
    pub backup_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupRecord {
    /// A record that has not been persisted yet (id 0).
    pub fn started(task_id: i64, status: BackupStatus, backup_version: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            task_id,
            status,
            start_time: now,
            end_time: None,
            file_size: 0,
            file_path: String::new(),
            storage_type: String::new(),
            error_message: String::new(),
            backup_version,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the record to `Failed` with the given message and closes it.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = BackupStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error_message = message.into();
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// A runtime setting row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_persisted_vocabulary() {
        for status in [
            BackupStatus::Pending,
            BackupStatus::Running,
            BackupStatus::Success,
            BackupStatus::Failed,
            BackupStatus::Cancelled,
            BackupStatus::Cleaned,
        ] {
            assert_eq!(BackupStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BackupStatus::parse("done"), None);
    }

    #[test]
    fn mark_failed_closes_record() {
        let mut record = BackupRecord::started(3, BackupStatus::Running, "20240101000000".into());
        record.mark_failed("mysqldump exited with 2");

        assert_eq!(record.status, BackupStatus::Failed);
        assert_eq!(record.error_message, "mysqldump exited with 2");
        let end = record.end_time.unwrap();
        assert!(end >= record.start_time);
    }

    #[test]
    fn record_json_uses_persisted_status_and_rfc3339_times() {
        let mut record = BackupRecord::started(9, BackupStatus::Success, "20240101000000".into());
        record.start_time = "2024-01-01T00:00:00Z".parse().unwrap();
        record.storage_type = "local".into();

        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["task_id"], 9);
        assert_eq!(json["start_time"], "2024-01-01T00:00:00Z");
        assert!(json["end_time"].is_null());
        let back: BackupRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.start_time, record.start_time);
    }

    #[test]
    fn backup_kind_rejects_unknown() {
        assert_eq!(BackupKind::parse("config"), Some(BackupKind::Config));
        assert_eq!(BackupKind::parse("postgres"), None);
    }
}

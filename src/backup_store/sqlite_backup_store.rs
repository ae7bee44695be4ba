use super::models::{
    BackupKind, BackupRecord, BackupStatus, BackupTask, NewBackupTask, SettingEntry,
};
use super::schema::BACKUP_VERSIONED_SCHEMAS;
use super::BackupStore;
use crate::config::SettingsStore;
use crate::sqlite_persistence::create_or_migrate;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

const RECORD_COLUMNS: &str = "id, task_id, status, start_time, end_time, file_size, file_path, \
     storage_type, error_message, backup_version, created_at, updated_at";

const TASK_COLUMNS: &str = "id, name, type, source_info, schedule, enabled, created_at, updated_at";

pub struct SqliteBackupStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteBackupStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open backup database at {:?}", path))?;

        if is_new_db {
            info!("Creating new backup database at {:?}", path);
        }
        create_or_migrate(&mut conn, BACKUP_VERSIONED_SCHEMAS, is_new_db)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(
        row: &rusqlite::Row,
        column: &str,
        raw: &str,
    ) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                let index = row.as_ref().column_index(column).unwrap_or_default();
                rusqlite::Error::FromSqlConversionFailure(
                    index,
                    rusqlite::types::Type::Text,
                    format!("invalid {} '{}': {}", column, raw, e).into(),
                )
            })
    }

    fn datetime_column(row: &rusqlite::Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
        let raw: String = row.get(column)?;
        Self::parse_datetime(row, column, &raw)
    }

    fn optional_datetime_column(
        row: &rusqlite::Row,
        column: &str,
    ) -> rusqlite::Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = row.get(column)?;
        raw.map(|raw| Self::parse_datetime(row, column, &raw))
            .transpose()
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<BackupTask> {
        let kind_str: String = row.get("type")?;
        let kind = BackupKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown backup type '{}'", kind_str).into(),
            )
        })?;
        Ok(BackupTask {
            id: row.get("id")?,
            name: row.get("name")?,
            kind,
            source_info: row.get("source_info")?,
            schedule: row.get("schedule")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            created_at: Self::datetime_column(row, "created_at")?,
            updated_at: Self::datetime_column(row, "updated_at")?,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<BackupRecord> {
        let status_str: String = row.get("status")?;
        let status = BackupStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown record status '{}'", status_str).into(),
            )
        })?;

        Ok(BackupRecord {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            status,
            start_time: Self::datetime_column(row, "start_time")?,
            end_time: Self::optional_datetime_column(row, "end_time")?,
            file_size: row.get("file_size")?,
            file_path: row.get("file_path")?,
            storage_type: row.get("storage_type")?,
            error_message: row.get("error_message")?,
            backup_version: row.get("backup_version")?,
            created_at: Self::datetime_column(row, "created_at")?,
            updated_at: Self::datetime_column(row, "updated_at")?,
        })
    }

    fn query_records<P: rusqlite::Params>(
        &self,
        where_clause: &str,
        params: P,
    ) -> Result<Vec<BackupRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM backup_records {}",
            RECORD_COLUMNS, where_clause
        ))?;
        let records = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn query_tasks<P: rusqlite::Params>(
        &self,
        where_clause: &str,
        params: P,
    ) -> Result<Vec<BackupTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM backup_tasks {}",
            TASK_COLUMNS, where_clause
        ))?;
        let tasks = stmt
            .query_map(params, Self::row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }
}

impl BackupStore for SqliteBackupStore {
    fn create_task(&self, task: &NewBackupTask) -> Result<BackupTask> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let now_str = Self::format_datetime(&now);

        conn.execute(
            "INSERT INTO backup_tasks (name, type, source_info, schedule, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                task.name,
                task.kind.as_str(),
                task.source_info,
                task.schedule,
                task.enabled as i64,
                now_str
            ],
        )?;

        Ok(BackupTask {
            id: conn.last_insert_rowid(),
            name: task.name.clone(),
            kind: task.kind,
            source_info: task.source_info.clone(),
            schedule: task.schedule.clone(),
            enabled: task.enabled,
            created_at: now,
            updated_at: now,
        })
    }

    fn update_task(&self, task: &BackupTask) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        let updated = conn.execute(
            "UPDATE backup_tasks
             SET name = ?1, type = ?2, source_info = ?3, schedule = ?4, enabled = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                task.name,
                task.kind.as_str(),
                task.source_info,
                task.schedule,
                task.enabled as i64,
                now,
                task.id
            ],
        )?;
        if updated == 0 {
            bail!("Backup task {} not found", task.id);
        }
        Ok(())
    }

    fn delete_task(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM backup_tasks WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn get_task(&self, id: i64) -> Result<Option<BackupTask>> {
        let conn = self.conn.lock().unwrap();
        let task = conn
            .query_row(
                &format!("SELECT {} FROM backup_tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        self.query_tasks("ORDER BY id", [])
    }

    fn list_enabled_tasks(&self) -> Result<Vec<BackupTask>> {
        self.query_tasks("WHERE enabled = 1 ORDER BY id", [])
    }

    fn create_record(&self, record: &BackupRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO backup_records (task_id, status, start_time, end_time, file_size, file_path,
                storage_type, error_message, backup_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                record.task_id,
                record.status.as_str(),
                Self::format_datetime(&record.start_time),
                record.end_time.as_ref().map(Self::format_datetime),
                record.file_size,
                record.file_path,
                record.storage_type,
                record.error_message,
                record.backup_version,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_record(&self, record: &BackupRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        let updated = conn.execute(
            "UPDATE backup_records
             SET status = ?1, start_time = ?2, end_time = ?3, file_size = ?4, file_path = ?5,
                 storage_type = ?6, error_message = ?7, backup_version = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                record.status.as_str(),
                Self::format_datetime(&record.start_time),
                record.end_time.as_ref().map(Self::format_datetime),
                record.file_size,
                record.file_path,
                record.storage_type,
                record.error_message,
                record.backup_version,
                now,
                record.id
            ],
        )?;
        if updated == 0 {
            bail!("Backup record {} not found", record.id);
        }
        Ok(())
    }

    fn get_record(&self, id: i64) -> Result<Option<BackupRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!("SELECT {} FROM backup_records WHERE id = ?1", RECORD_COLUMNS),
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_record(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM backup_records WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn list_records_by_status(&self, status: BackupStatus) -> Result<Vec<BackupRecord>> {
        self.query_records("WHERE status = ?1 ORDER BY id", params![status.as_str()])
    }

    fn list_records_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        // julianday() normalizes UTC offsets and fractional seconds of varying width.
        self.query_records(
            "WHERE file_path != '' AND status != ?1 AND julianday(start_time) <= julianday(?2)
             ORDER BY start_time",
            params![
                BackupStatus::Cleaned.as_str(),
                Self::format_datetime(&cutoff)
            ],
        )
    }

    fn list_records_by_task(&self, task_id: i64, limit: usize) -> Result<Vec<BackupRecord>> {
        self.query_records(
            "WHERE task_id = ?1 ORDER BY start_time DESC, id DESC LIMIT ?2",
            params![task_id, limit as i64],
        )
    }

    fn list_records(&self, offset: usize, limit: usize) -> Result<(Vec<BackupRecord>, usize)> {
        let total: i64 = {
            let conn = self.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM backup_records", [], |row| row.get(0))?
        };
        let records = self.query_records(
            "ORDER BY start_time DESC, id DESC LIMIT ?1 OFFSET ?2",
            params![limit as i64, offset as i64],
        )?;
        Ok((records, total as usize))
    }
}

impl SettingsStore for SqliteBackupStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT config_value FROM system_configs WHERE config_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str, description: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO system_configs (config_key, config_value, description, created_at, updated_at)
             VALUES (?1, ?2, COALESCE(?3, ''), ?4, ?4)
             ON CONFLICT(config_key) DO UPDATE SET
                config_value = ?2,
                description = COALESCE(?3, description),
                updated_at = ?4",
            params![key, value, description, now],
        )?;
        Ok(())
    }

    fn list_settings(&self) -> Result<Vec<SettingEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT config_key, config_value, description, updated_at
             FROM system_configs ORDER BY config_key",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(SettingEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    description: row.get(2)?,
                    updated_at: Self::datetime_column(row, "updated_at")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

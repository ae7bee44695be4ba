//! SQLite schema definitions for the backup database.
//!
//! Tasks and records are related by `task_id` only; there is no foreign key,
//! records outlive the task that produced them.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Tasks and records
// =============================================================================

const BACKUP_TASKS_TABLE_V1: Table = Table {
    name: "backup_tasks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("type", &SqlType::Text, non_null = true),
        sqlite_column!("source_info", &SqlType::Text, non_null = true),
        sqlite_column!("schedule", &SqlType::Text, non_null = true),
        sqlite_column!(
            "enabled",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_backup_tasks_enabled", "enabled")],
};

const BACKUP_RECORDS_TABLE_V1: Table = Table {
    name: "backup_records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("task_id", &SqlType::Integer, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("start_time", &SqlType::Text, non_null = true),
        sqlite_column!("end_time", &SqlType::Text),
        sqlite_column!(
            "file_size",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "file_path",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!(
            "storage_type",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!(
            "error_message",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!(
            "backup_version",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_backup_records_task_id", "task_id"),
        ("idx_backup_records_status", "status"),
        ("idx_backup_records_start_time", "start_time"),
    ],
};

// =============================================================================
// Version 2 - Runtime settings
// =============================================================================

const SYSTEM_CONFIGS_TABLE_V2: Table = Table {
    name: "system_configs",
    columns: &[
        sqlite_column!("config_key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("config_value", &SqlType::Text, non_null = true),
        sqlite_column!(
            "description",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    SYSTEM_CONFIGS_TABLE_V2.create(conn)
}

pub const BACKUP_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[BACKUP_TASKS_TABLE_V1, BACKUP_RECORDS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            BACKUP_TASKS_TABLE_V1,
            BACKUP_RECORDS_TABLE_V1,
            SYSTEM_CONFIGS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];

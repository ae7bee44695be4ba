use chrono::{DateTime, Local};

/// Version tag shared by a record and its artifact.
pub fn version_tag(at: DateTime<Local>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Keeps letters, digits, `_` and `-`; everything else becomes `_`.
pub fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn database_artifact_name(
    task_id: i64,
    task_name: &str,
    database: Option<&str>,
    version: &str,
) -> String {
    let target = match database {
        Some(db) => safe_name(db),
        None => "all_databases".to_string(),
    };
    format!(
        "task_{}_{}_{}_{}.sql",
        task_id,
        safe_name(task_name),
        target,
        version
    )
}

/// `label` is `files` or `config`.
pub fn archive_artifact_name(task_id: i64, task_name: &str, label: &str, version: &str) -> String {
    format!(
        "task_{}_{}_{}_{}.zip",
        task_id,
        safe_name(task_name),
        label,
        version
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn safe_name_replaces_separators_and_spaces() {
        assert_eq!(safe_name("prod db/main"), "prod_db_main");
        assert_eq!(safe_name("nightly-etc_2"), "nightly-etc_2");
        assert_eq!(safe_name("../../etc"), "______etc");
        assert_eq!(safe_name("备份"), "备份");
    }

    #[test]
    fn version_tag_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(version_tag(at), "20240309070501");
    }

    #[test]
    fn artifact_names() {
        assert_eq!(
            database_artifact_name(3, "orders db", Some("shop"), "20240101020304"),
            "task_3_orders_db_shop_20240101020304.sql"
        );
        assert_eq!(
            database_artifact_name(3, "orders", None, "20240101020304"),
            "task_3_orders_all_databases_20240101020304.sql"
        );
        assert_eq!(
            archive_artifact_name(9, "etc", "config", "20240101020304"),
            "task_9_etc_config_20240101020304.zip"
        );
    }
}

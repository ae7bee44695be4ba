use super::naming::database_artifact_name;
use super::{
    Artifact, ArtifactRequest, BackupStrategy, DatabaseSource, SourceDescriptor, StrategyError,
};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Dumps a MySQL server with `mysqldump`.
pub struct DatabaseDump {
    mysqldump_path: String,
}

impl DatabaseDump {
    pub fn new(mysqldump_path: impl Into<String>) -> Self {
        Self {
            mysqldump_path: mysqldump_path.into(),
        }
    }

    fn build_args(source: &DatabaseSource, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            source.host.clone(),
            "-P".to_string(),
            source.effective_port().to_string(),
            "-u".to_string(),
            source.user.clone(),
            format!("--result-file={}", output.display()),
            "--ssl-mode=DISABLED".to_string(),
        ];
        if source.dumps_all_databases() {
            args.push("--all-databases".to_string());
        } else {
            args.push("--databases".to_string());
            args.push(source.database.clone());
        }
        args
    }
}

#[async_trait]
impl BackupStrategy for DatabaseDump {
    fn name(&self) -> &'static str {
        "database_dump"
    }

    async fn produce_artifact(
        &self,
        source: &SourceDescriptor,
        request: &ArtifactRequest,
    ) -> Result<Artifact, StrategyError> {
        let SourceDescriptor::Database(db) = source else {
            return Err(StrategyError::SourceMismatch {
                strategy: self.name(),
                source_kind: source.kind_name(),
            });
        };
        if db.db_type != "mysql" {
            return Err(StrategyError::UnsupportedDatabase(db.db_type.clone()));
        }

        let database = (!db.dumps_all_databases()).then_some(db.database.as_str());
        let file_name =
            database_artifact_name(request.task_id, &request.task_name, database, &request.version);
        let path = request.work_dir.join(&file_name);

        let args = Self::build_args(db, &path);
        debug!("Running {} {}", self.mysqldump_path, args.join(" "));

        let output = Command::new(&self.mysqldump_path)
            .args(&args)
            .env("MYSQL_PWD", &db.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                StrategyError::CommandFailed(format!(
                    "failed to start {}: {}",
                    self.mysqldump_path, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StrategyError::CommandFailed(format!(
                "{}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let size = tokio::fs::metadata(&path).await?.len();
        info!(
            "Dumped {} for task {} ({} bytes)",
            database.unwrap_or("all databases"),
            request.task_id,
            size
        );

        Ok(Artifact {
            path,
            file_name,
            size,
        })
    }
}

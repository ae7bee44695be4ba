//! Execution engine: runs one backup of one task.
//!
//! A run walks its record through `running` to `success` or `failed`:
//! 1. Parse the task's source info (no record is written if this fails)
//! 2. Persist a `running` record
//! 3. Produce the artifact in a per-run temporary directory
//! 4. Hand the artifact to the configured storage backend
//! 5. Finalize the record and notify
//!
//! The temporary directory is removed when the run ends, whatever the outcome.

use crate::backup_store::{BackupRecord, BackupStatus, BackupStore, BackupTask};
use crate::error::{BackupError, ExecutionError};
use crate::notifier::Notifier;
use crate::scheduler::TaskExecutor;
use crate::storage::{StorageDispatcher, StorageKind};
use crate::strategy::{naming, ArtifactRequest, SourceDescriptor, StrategyError, StrategySet};
use async_trait::async_trait;
use chrono::{Local, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound for producing an artifact. `None` waits indefinitely.
    pub strategy_timeout: Option<Duration>,
    /// When false, a second run of a task that is still running is rejected.
    pub allow_overlapping_runs: bool,
    /// Parent directory of the per-run temporary directories.
    pub work_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategy_timeout: None,
            allow_overlapping_runs: true,
            work_dir: std::env::temp_dir(),
        }
    }
}

struct StoredArtifact {
    path: String,
    size: i64,
    kind: StorageKind,
}

/// Removes the task id from the in-flight set when the run ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    task_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.task_id);
    }
}

pub struct ExecutionEngine {
    store: Arc<dyn BackupStore>,
    dispatcher: Arc<StorageDispatcher>,
    strategies: StrategySet,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
    in_flight: Mutex<HashSet<i64>>,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn BackupStore>,
        dispatcher: Arc<StorageDispatcher>,
        strategies: StrategySet,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            strategies,
            notifier,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn BackupStore> {
        &self.store
    }

    fn claim(&self, task_id: i64) -> Result<InFlightGuard<'_>, BackupError> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(task_id) {
            return Err(BackupError::TaskAlreadyRunning(task_id));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            task_id,
        })
    }

    /// Looks the task up and runs it.
    pub async fn execute_by_id(&self, task_id: i64) -> Result<BackupRecord, ExecutionError> {
        let task = self
            .store
            .get_task(task_id)
            .map_err(ExecutionError::before_record)?
            .ok_or_else(|| {
                ExecutionError::before_record(BackupError::NotFound(format!("task {}", task_id)))
            })?;
        self.execute(&task).await
    }

    /// Runs one backup of `task`.
    ///
    /// On failure the returned error carries the terminal `failed` record when
    /// one was written.
    pub async fn execute(&self, task: &BackupTask) -> Result<BackupRecord, ExecutionError> {
        let source = SourceDescriptor::parse(task.kind, &task.source_info).map_err(|reason| {
            warn!("Task {} has malformed source info: {}", task.id, reason);
            ExecutionError::before_record(BackupError::MalformedSourceInfo {
                task_id: task.id,
                reason,
            })
        })?;

        let _guard = if self.settings.allow_overlapping_runs {
            None
        } else {
            Some(self.claim(task.id).map_err(|e| {
                info!("Rejecting run of task {}: already running", task.id);
                ExecutionError::before_record(e)
            })?)
        };

        let version = naming::version_tag(Local::now());
        let mut record = BackupRecord::started(task.id, BackupStatus::Running, version);
        record.id = self
            .store
            .create_record(&record)
            .map_err(ExecutionError::before_record)?;
        info!(
            "Started backup of task {} ({}), record {}",
            task.id, task.name, record.id
        );

        let stored = match self.produce_and_store(task, &source, &record).await {
            Ok(stored) => stored,
            Err(e) => return Err(self.fail(task, record, e).await),
        };

        record.status = BackupStatus::Success;
        record.end_time = Some(Utc::now());
        record.file_size = stored.size;
        record.file_path = stored.path.clone();
        record.storage_type = stored.kind.as_str().to_string();
        record.error_message.clear();

        if let Err(e) = self.store.update_record(&record) {
            error!("Failed to finalize record {}: {:#}", record.id, e);
            self.discard_artifact(&stored).await;
            return Err(self.fail(task, record, BackupError::Store(e)).await);
        }
        info!(
            "Backup of task {} succeeded, record {} ({} bytes at {})",
            task.id, record.id, record.file_size, record.file_path
        );

        let duration = record
            .duration()
            .and_then(|d| d.to_std().ok())
            .unwrap_or_default();
        if let Err(e) = self
            .notifier
            .notify_backup_success(&task.name, record.file_size, &record.file_path, duration)
            .await
        {
            warn!("Failed to send success notification for task {}: {:#}", task.id, e);
        }

        Ok(record)
    }

    async fn produce_and_store(
        &self,
        task: &BackupTask,
        source: &SourceDescriptor,
        record: &BackupRecord,
    ) -> Result<StoredArtifact, BackupError> {
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("backup-task-{}-", task.id))
            .tempdir_in(&self.settings.work_dir)
            .map_err(StrategyError::Io)?;

        let request = ArtifactRequest {
            task_id: task.id,
            task_name: task.name.clone(),
            version: record.backup_version.clone(),
            work_dir: work_dir.path().to_path_buf(),
        };
        let strategy = self.strategies.for_source(source);
        debug!("Task {} uses strategy {}", task.id, strategy.name());

        let produce = strategy.produce_artifact(source, &request);
        let artifact = match self.settings.strategy_timeout {
            Some(limit) => tokio::time::timeout(limit, produce)
                .await
                .map_err(|_| StrategyError::Timeout(limit))??,
            None => produce.await?,
        };

        let backend = self.dispatcher.resolve_default()?;
        let path = backend.save(&artifact.file_name, &artifact.path).await?;

        Ok(StoredArtifact {
            path,
            size: artifact.size as i64,
            kind: backend.kind(),
        })
    }

    /// Best-effort removal of an artifact whose record could not be finalized.
    async fn discard_artifact(&self, stored: &StoredArtifact) {
        let result = match self.dispatcher.resolve(stored.kind) {
            Ok(backend) => backend.delete(&stored.path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!("Removed orphaned artifact {}", stored.path),
            Err(e) => warn!("Failed to remove orphaned artifact {}: {}", stored.path, e),
        }
    }

    async fn fail(
        &self,
        task: &BackupTask,
        mut record: BackupRecord,
        error: BackupError,
    ) -> ExecutionError {
        let message = error.to_string();
        error!(
            "Backup of task {} failed, record {}: {}",
            task.id, record.id, message
        );

        record.mark_failed(message.clone());
        record.file_path.clear();
        record.file_size = 0;
        if let Err(e) = self.store.update_record(&record) {
            error!("Failed to mark record {} as failed: {:#}", record.id, e);
        }

        if let Err(e) = self
            .notifier
            .notify_backup_failure(&task.name, &message)
            .await
        {
            warn!("Failed to send failure notification for task {}: {:#}", task.id, e);
        }

        ExecutionError::with_record(record, error)
    }
}

#[async_trait]
impl TaskExecutor for ExecutionEngine {
    async fn run_task(&self, task_id: i64) {
        let task = match self.store.get_task(task_id) {
            Ok(Some(task)) if task.enabled => task,
            Ok(Some(_)) => {
                info!("Task {} is disabled, skipping fire", task_id);
                return;
            }
            Ok(None) => {
                info!("Task {} no longer exists, skipping fire", task_id);
                return;
            }
            Err(e) => {
                error!("Failed to load task {}: {:#}", task_id, e);
                return;
            }
        };

        if let Err(e) = self.execute(&task).await {
            debug!("Run of task {} ended with error: {}", task_id, e);
        }
    }
}

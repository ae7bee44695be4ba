//! Keeps the live backup scheduler in line with task edits.
//!
//! The admin CLI writes tasks straight to the database, so a running server
//! only learns about new, edited, disabled or deleted tasks by re-reading them.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::scheduler::BackupScheduler;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub struct ScheduleSyncJob {
    scheduler: BackupScheduler,
    interval: Duration,
}

impl ScheduleSyncJob {
    pub fn new(scheduler: BackupScheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }
}

#[async_trait]
impl BackgroundJob for ScheduleSyncJob {
    fn id(&self) -> &'static str {
        "schedule_sync"
    }

    fn name(&self) -> &'static str {
        "Schedule Sync"
    }

    fn description(&self) -> &'static str {
        "Apply task edits made in the database to the running scheduler"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if !self.scheduler.is_running() {
            debug!("Scheduler not running, nothing to sync");
            return Ok(());
        }

        let changes = self
            .scheduler
            .sync()
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;
        if !changes.is_empty() {
            info!(
                "Schedule sync: {} added, {} updated, {} removed",
                changes.added, changes.updated, changes.removed
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup_store::{BackupKind, BackupStore, NewBackupTask, SqliteBackupStore};
    use crate::scheduler::TaskExecutor;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct IdleExecutor;

    #[async_trait]
    impl TaskExecutor for IdleExecutor {
        async fn run_task(&self, _task_id: i64) {}
    }

    fn ctx() -> JobContext {
        JobContext::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn picks_up_disabled_task() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteBackupStore::new(temp_dir.path().join("s.db")).unwrap());
        let mut task = store
            .create_task(&NewBackupTask {
                name: "nightly".into(),
                kind: BackupKind::File,
                source_info: r#"{"paths":["/tmp"]}"#.into(),
                schedule: "0 0 1 * * *".into(),
                enabled: true,
            })
            .unwrap();
        let scheduler = BackupScheduler::new(store.clone(), Arc::new(IdleExecutor));
        scheduler.start().unwrap();
        let job = ScheduleSyncJob::new(scheduler.clone(), Duration::from_secs(30));
        assert_eq!(job.schedule(), JobSchedule::Interval(Duration::from_secs(30)));

        task.enabled = false;
        store.update_task(&task).unwrap();
        job.execute(&ctx()).await.unwrap();

        assert!(!scheduler.is_task_scheduled(task.id));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stopped_scheduler_is_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteBackupStore::new(temp_dir.path().join("s.db")).unwrap());
        store
            .create_task(&NewBackupTask {
                name: "nightly".into(),
                kind: BackupKind::File,
                source_info: r#"{"paths":["/tmp"]}"#.into(),
                schedule: "0 0 1 * * *".into(),
                enabled: true,
            })
            .unwrap();
        let scheduler = BackupScheduler::new(store, Arc::new(IdleExecutor));
        let job = ScheduleSyncJob::new(scheduler.clone(), Duration::from_secs(30));

        job.execute(&ctx()).await.unwrap();

        assert!(scheduler.scheduled_task_ids().is_empty());
    }
}

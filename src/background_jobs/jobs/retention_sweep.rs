//! Retention sweep background job.
//!
//! Deletes artifacts older than `system.autoCleanupDays` on a cron schedule,
//! daily at 02:00 unless configured otherwise.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::retention::{RetentionSweeper, SweepTrigger};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct RetentionSweepJob {
    sweeper: Arc<RetentionSweeper>,
    schedule: String,
}

impl RetentionSweepJob {
    pub fn new(sweeper: Arc<RetentionSweeper>, schedule: impl Into<String>) -> Self {
        Self {
            sweeper,
            schedule: schedule.into(),
        }
    }
}

#[async_trait]
impl BackgroundJob for RetentionSweepJob {
    fn id(&self) -> &'static str {
        "retention_sweep"
    }

    fn name(&self) -> &'static str {
        "Retention Sweep"
    }

    fn description(&self) -> &'static str {
        "Delete backup files older than the configured retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.schedule.clone())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let result = self.sweeper.sweep(SweepTrigger::Automatic).await;
        if result.failed > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} of {} records could not be cleaned",
                result.failed,
                result.total()
            )));
        }

        info!(
            "Retention sweep job cleaned {} records, skipped {}",
            result.success, result.skipped
        );
        Ok(())
    }
}

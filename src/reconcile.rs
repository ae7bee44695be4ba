//! Startup repair of records an unclean shutdown left non-terminal.
//!
//! Must run before the scheduler starts, so no record it touches can belong
//! to a live run.

use crate::backup_store::{BackupRecord, BackupStatus, BackupStore};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const RUNNING_INTERRUPTED_MESSAGE: &str = "Process restarted while the backup was running";
pub const PENDING_STALE_MESSAGE: &str = "Backup was still pending more than an hour after it was queued";

/// How old a `pending` record must be before it is considered abandoned.
pub fn pending_staleness() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// `running` records found.
    pub running: usize,
    /// Stale `pending` records found.
    pub pending: usize,
    /// Records successfully moved to `failed`.
    pub updated: usize,
    /// Records whose update failed.
    pub failed: usize,
}

impl ReconcileStats {
    pub fn processed(&self) -> usize {
        self.running + self.pending
    }
}

pub struct ReconciliationPass {
    store: Arc<dyn BackupStore>,
}

impl ReconciliationPass {
    pub fn new(store: Arc<dyn BackupStore>) -> Self {
        Self { store }
    }

    pub fn run(&self) -> Result<ReconcileStats> {
        self.run_at(Utc::now())
    }

    /// `running` records started less than [`pending_staleness`] before `now`.
    ///
    /// Outside of process startup these may belong to a server that is still
    /// running them, so an offline pass refuses to go ahead while any exist.
    pub fn recent_running_records(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let cutoff = now - pending_staleness();
        Ok(self
            .store
            .list_records_by_status(BackupStatus::Running)?
            .into_iter()
            .filter(|record| record.start_time >= cutoff)
            .collect())
    }

    /// Reconciles as if the current time were `now`.
    ///
    /// Only the queries can fail the pass; a record that cannot be updated is
    /// logged, counted and skipped.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        let running = self.store.list_records_by_status(BackupStatus::Running)?;
        stats.running = running.len();
        if !running.is_empty() {
            warn!(
                "Found {} records still running at startup, marking them failed",
                running.len()
            );
        }
        for record in running {
            self.fail_record(record, RUNNING_INTERRUPTED_MESSAGE, now, &mut stats);
        }

        let cutoff = now - pending_staleness();
        let stale: Vec<BackupRecord> = self
            .store
            .list_records_by_status(BackupStatus::Pending)?
            .into_iter()
            .filter(|record| record.start_time < cutoff)
            .collect();
        stats.pending = stale.len();
        if !stale.is_empty() {
            warn!(
                "Found {} records pending for over an hour, marking them failed",
                stale.len()
            );
        }
        for record in stale {
            self.fail_record(record, PENDING_STALE_MESSAGE, now, &mut stats);
        }

        info!(
            "Reconciliation processed {} records ({} running, {} pending): {} updated, {} failed",
            stats.processed(),
            stats.running,
            stats.pending,
            stats.updated,
            stats.failed
        );
        Ok(stats)
    }

    fn fail_record(
        &self,
        mut record: BackupRecord,
        message: &str,
        now: DateTime<Utc>,
        stats: &mut ReconcileStats,
    ) {
        let previous = record.status;
        record.status = BackupStatus::Failed;
        record.end_time = Some(now.max(record.start_time));
        record.error_message = message.to_string();

        match self.store.update_record(&record) {
            Ok(()) => {
                info!(
                    "Record {} of task {} moved from {} to failed",
                    record.id, record.task_id, previous
                );
                stats.updated += 1;
            }
            Err(e) => {
                error!("Failed to reconcile record {}: {:#}", record.id, e);
                stats.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup_store::SqliteBackupStore;
    use tempfile::TempDir;

    struct TestStore {
        store: Arc<SqliteBackupStore>,
        _temp_dir: TempDir,
    }

    fn test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteBackupStore::new(temp_dir.path().join("r.db")).unwrap());
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn insert(store: &SqliteBackupStore, status: BackupStatus, started: DateTime<Utc>) -> i64 {
        let mut record = BackupRecord::started(1, status, "20240101000000".into());
        record.start_time = started;
        store.create_record(&record).unwrap()
    }

    #[test]
    fn running_records_are_failed_with_restart_message() {
        let ts = test_store();
        let now = Utc::now();
        let id = insert(&ts.store, BackupStatus::Running, now - Duration::minutes(5));

        let stats = ReconciliationPass::new(ts.store.clone()).run_at(now).unwrap();

        assert_eq!(stats.running, 1);
        assert_eq!(stats.updated, 1);
        let record = ts.store.get_record(id).unwrap().unwrap();
        assert_eq!(record.status, BackupStatus::Failed);
        assert_eq!(record.error_message, RUNNING_INTERRUPTED_MESSAGE);
        assert!(record.end_time.unwrap() >= record.start_time);
    }

    #[test]
    fn only_stale_pending_records_are_failed() {
        let ts = test_store();
        let now = Utc::now();
        let stale = insert(&ts.store, BackupStatus::Pending, now - Duration::hours(2));
        let fresh = insert(&ts.store, BackupStatus::Pending, now - Duration::minutes(10));

        let stats = ReconciliationPass::new(ts.store.clone()).run_at(now).unwrap();

        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processed(), 1);
        let stale = ts.store.get_record(stale).unwrap().unwrap();
        assert_eq!(stale.status, BackupStatus::Failed);
        assert_eq!(stale.error_message, PENDING_STALE_MESSAGE);
        let fresh = ts.store.get_record(fresh).unwrap().unwrap();
        assert_eq!(fresh.status, BackupStatus::Pending);
    }

    #[test]
    fn terminal_records_are_untouched() {
        let ts = test_store();
        let now = Utc::now();
        let id = insert(&ts.store, BackupStatus::Success, now - Duration::days(3));

        let stats = ReconciliationPass::new(ts.store.clone()).run_at(now).unwrap();

        assert_eq!(stats, ReconcileStats::default());
        assert_eq!(
            ts.store.get_record(id).unwrap().unwrap().status,
            BackupStatus::Success
        );
    }

    #[test]
    fn recent_running_records_ignore_old_and_other_statuses() {
        let ts = test_store();
        let now = Utc::now();
        let live = insert(&ts.store, BackupStatus::Running, now - Duration::minutes(2));
        insert(&ts.store, BackupStatus::Running, now - Duration::hours(3));
        insert(&ts.store, BackupStatus::Pending, now - Duration::minutes(2));
        let pass = ReconciliationPass::new(ts.store.clone());

        let recent: Vec<i64> = pass
            .recent_running_records(now)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        assert_eq!(recent, vec![live]);
    }

    #[test]
    fn second_pass_changes_nothing() {
        let ts = test_store();
        let now = Utc::now();
        insert(&ts.store, BackupStatus::Running, now);
        insert(&ts.store, BackupStatus::Pending, now - Duration::hours(5));
        let pass = ReconciliationPass::new(ts.store.clone());

        assert_eq!(pass.run_at(now).unwrap().updated, 2);
        let second = pass.run_at(now).unwrap();
        assert_eq!(second.processed(), 0);
        assert_eq!(second.updated, 0);
    }
}

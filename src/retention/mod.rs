//! Deletes aged artifacts and finalizes their records as `cleaned`.

use crate::backup_store::{BackupRecord, BackupStatus, BackupStore};
use crate::config::{keys, RetentionWindow};
use crate::error::BackupError;
use crate::notifier::Notifier;
use crate::storage::{StorageDispatcher, StorageKind};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Error message carried by every `cleaned` record.
pub const AUTO_CLEANED_MESSAGE: &str = "Backup file was removed by automatic cleanup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    Automatic,
    Manual,
}

impl SweepTrigger {
    pub fn is_auto(&self) -> bool {
        matches!(self, SweepTrigger::Automatic)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupResult {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl CleanupResult {
    pub fn total(&self) -> usize {
        self.success + self.failed + self.skipped
    }
}

enum Outcome {
    Cleaned,
    Failed(String),
    Skipped(String),
}

pub struct RetentionSweeper {
    store: Arc<dyn BackupStore>,
    dispatcher: Arc<StorageDispatcher>,
    notifier: Arc<dyn Notifier>,
    // Automatic and manual sweeps never interleave.
    sweep_lock: Mutex<()>,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn BackupStore>,
        dispatcher: Arc<StorageDispatcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            notifier,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Runs one sweep and notifies the outcome, whatever it is.
    pub async fn sweep(&self, trigger: SweepTrigger) -> CleanupResult {
        let _guard = self.sweep_lock.lock().await;
        info!("Starting {:?} retention sweep", trigger);

        let result = self.collect_and_clean().await;
        info!(
            "Retention sweep finished: {} cleaned, {} failed, {} skipped",
            result.success, result.failed, result.skipped
        );
        for message in &result.errors {
            warn!("Retention sweep: {}", message);
        }

        if let Err(e) = self
            .notifier
            .notify_cleanup(
                result.success,
                result.failed,
                result.skipped,
                trigger.is_auto(),
                &result.errors,
            )
            .await
        {
            warn!("Failed to send cleanup notification: {:#}", e);
        }
        result
    }

    async fn collect_and_clean(&self) -> CleanupResult {
        let mut result = CleanupResult::default();

        let days = match self.dispatcher.settings().retention_window() {
            RetentionWindow::Days(days) => days,
            RetentionWindow::Disabled => {
                result.errors.push(format!(
                    "{} is 0, cleanup skipped",
                    keys::AUTO_CLEANUP_DAYS
                ));
                return result;
            }
            RetentionWindow::Invalid(message) => {
                result.errors.push(message);
                return result;
            }
        };

        let cutoff = Utc::now() - Duration::days(days);
        let records = match self.store.list_records_older_than(cutoff) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to query expired records: {:#}", e);
                result
                    .errors
                    .push(format!("Failed to query expired records: {:#}", e));
                return result;
            }
        };
        info!(
            "Found {} records older than {} days (before {})",
            records.len(),
            days,
            cutoff.format("%Y-%m-%d")
        );

        for record in records {
            match self.clean_record(record).await {
                Outcome::Cleaned => result.success += 1,
                Outcome::Failed(message) => {
                    result.failed += 1;
                    result.errors.push(message);
                }
                Outcome::Skipped(message) => {
                    result.skipped += 1;
                    result.errors.push(message);
                }
            }
        }
        result
    }

    async fn clean_record(&self, mut record: BackupRecord) -> Outcome {
        // The stored kind decides; today's configuration may point elsewhere.
        let kind = match StorageKind::parse(&record.storage_type) {
            Some(kind) => kind,
            None => {
                return Outcome::Skipped(format!(
                    "Unknown storage type '{}' for record {}",
                    record.storage_type, record.id
                ))
            }
        };

        if kind == StorageKind::S3 {
            let missing = self.dispatcher.settings().s3().missing_fields();
            if !missing.is_empty() {
                let reason = BackupError::ConfigurationIncomplete(format!(
                    "missing {}",
                    missing.join(", ")
                ));
                return Outcome::Skipped(format!(
                    "{}, skipped record {} ({})",
                    reason, record.id, record.file_path
                ));
            }
        }

        let deleted = match self.dispatcher.resolve(kind) {
            Ok(backend) => backend.delete(&record.file_path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = deleted {
            error!(
                "Failed to delete artifact of record {} ({}): {}",
                record.id, record.file_path, e
            );
            return Outcome::Failed(format!(
                "Failed to delete {} for record {}: {}",
                record.file_path, record.id, e
            ));
        }

        let path = std::mem::take(&mut record.file_path);
        record.file_size = 0;
        record.status = BackupStatus::Cleaned;
        record.error_message = AUTO_CLEANED_MESSAGE.to_string();
        match self.store.update_record(&record) {
            Ok(()) => {
                info!("Cleaned record {} ({} {})", record.id, kind, path);
                Outcome::Cleaned
            }
            Err(e) => {
                error!("Failed to mark record {} as cleaned: {:#}", record.id, e);
                Outcome::Failed(format!(
                    "Deleted {} but failed to update record {}: {:#}",
                    path, record.id, e
                ))
            }
        }
    }
}

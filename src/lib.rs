//! Backup orchestration engine.
//!
//! Scheduled backups of databases and files, their record lifecycle, startup
//! reconciliation and retention cleanup. `main.rs` wires these together.

pub mod background_jobs;
pub mod backup_store;
pub mod config;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod reconcile;
pub mod retention;
pub mod scheduler;
pub mod sqlite_persistence;
pub mod storage;
pub mod strategy;

// Re-export commonly used types for convenience
pub use backup_store::{BackupStore, SqliteBackupStore};
pub use engine::{EngineSettings, ExecutionEngine};
pub use error::{BackupError, ExecutionError};
pub use reconcile::ReconciliationPass;
pub use retention::{CleanupResult, RetentionSweeper, SweepTrigger};
pub use scheduler::BackupScheduler;

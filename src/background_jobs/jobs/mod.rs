//! Specific background job implementations.

pub mod retention_sweep;
pub mod schedule_sync;

pub use retention_sweep::RetentionSweepJob;
pub use schedule_sync::ScheduleSyncJob;

//! Background job scheduling and execution.
//!
//! Periodic maintenance work (the retention sweep and the schedule sync) runs
//! here, apart from the per-task backup scheduler.

mod context;
mod job;
pub mod jobs;
mod runner;

pub use context::JobContext;
pub use job::{BackgroundJob, JobError, JobSchedule};
pub use runner::JobRunner;

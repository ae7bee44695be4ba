use super::context::JobContext;
use super::job::{BackgroundJob, JobError, JobSchedule};
use crate::scheduler::parse_schedule;
use chrono::Local;
use cron::Schedule;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum Timing {
    Cron(Schedule),
    Interval(Duration),
}

impl Timing {
    fn for_job(job: &dyn BackgroundJob) -> Result<Self, JobError> {
        match job.schedule() {
            JobSchedule::Cron(expr) => parse_schedule(&expr)
                .map(Timing::Cron)
                .map_err(|e| JobError::InvalidSchedule {
                    job_id: job.id().to_string(),
                    reason: e.to_string(),
                }),
            JobSchedule::Interval(every) if every.is_zero() => Err(JobError::InvalidSchedule {
                job_id: job.id().to_string(),
                reason: "interval must be positive".to_string(),
            }),
            JobSchedule::Interval(every) => Ok(Timing::Interval(every)),
        }
    }

    /// `None` when the schedule has no future occurrence.
    fn until_next(&self) -> Option<Duration> {
        match self {
            Timing::Cron(schedule) => {
                let next = schedule.upcoming(Local).next()?;
                Some((next - Local::now()).to_std().unwrap_or(Duration::ZERO))
            }
            Timing::Interval(every) => Some(*every),
        }
    }
}

struct Running {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Drives registered background jobs, each on its own loop. A job never
/// overlaps itself: its next occurrence is computed after the previous run ends.
pub struct JobRunner {
    jobs: Vec<Arc<dyn BackgroundJob>>,
    running: Mutex<Option<Running>>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            running: Mutex::new(None),
        }
    }

    /// Register a job. Jobs registered after `start()` are picked up on the next start.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        info!("Registering job: {} - {}", job.id(), job.description());
        self.jobs.push(job);
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    /// Starts one loop per job. Fails without starting anything when a job's
    /// schedule is invalid; calling it while running does nothing.
    pub fn start(&self) -> Result<(), JobError> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            debug!("Job runner already running");
            return Ok(());
        }

        let timings = self
            .jobs
            .iter()
            .map(|job| Timing::for_job(job.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let token = CancellationToken::new();
        let handles = self
            .jobs
            .iter()
            .cloned()
            .zip(timings)
            .map(|(job, timing)| {
                info!("Scheduling job {} ({})", job.id(), job.schedule());
                let ctx = JobContext::new(token.child_token());
                tokio::spawn(async move { job_loop(job, timing, ctx).await })
            })
            .collect();

        *running = Some(Running { token, handles });
        info!("Job runner started with {} jobs", self.jobs.len());
        Ok(())
    }

    /// Stops the job loops and waits for them to exit. A job that is executing
    /// sees its context cancelled.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();
        let Some(Running { token, handles }) = running else {
            return;
        };
        token.cancel();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Job loop ended abnormally: {}", e);
            }
        }
        info!("Job runner stopped");
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_once(job: &dyn BackgroundJob, ctx: &JobContext) {
    debug!("Running job: {}", job.name());
    match job.execute(ctx).await {
        Ok(()) => debug!("Job {} completed", job.id()),
        Err(JobError::Cancelled) => info!("Job {} cancelled", job.id()),
        Err(e) => error!("Job {} failed: {}", job.id(), e),
    }
}

async fn job_loop(job: Arc<dyn BackgroundJob>, timing: Timing, ctx: JobContext) {
    loop {
        let Some(sleep_duration) = timing.until_next() else {
            warn!("Job {} has no upcoming run, stopping its loop", job.id());
            break;
        };
        debug!("Job {} sleeping for {:?}", job.id(), sleep_duration);

        tokio::select! {
            _ = tokio::time::sleep(sleep_duration) => {
                run_once(job.as_ref(), &ctx).await;
            }
            _ = ctx.cancellation_token.cancelled() => {
                break;
            }
        }
    }
    debug!("Job loop for {} exited", job.id());
}

//! Live registry of recurring backup triggers.
//!
//! The registry maps a task id to its parsed cron schedule and next fire
//! time. One dispatcher loop sleeps until the earliest entry is due, then
//! hands each due task id to the [`TaskExecutor`] on its own tokio task, so a
//! slow backup never delays other fires.

use crate::backup_store::{BackupStore, BackupTask};
use crate::error::BackupError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use cron::Schedule;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest the dispatcher sleeps without re-checking the registry.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Runs a task by id when its trigger fires.
///
/// Implementations re-read the task so a fire never acts on stale data, and
/// treat a task that no longer exists as a no-op.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run_task(&self, task_id: i64);
}

/// Parses a cron expression with a leading seconds field.
pub fn parse_schedule(expression: &str) -> Result<Schedule, BackupError> {
    Schedule::from_str(expression.trim()).map_err(|e| BackupError::InvalidScheduleExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

struct ScheduleEntry {
    expression: String,
    schedule: Schedule,
    next_fire: Option<DateTime<Local>>,
}

impl ScheduleEntry {
    fn new(expression: &str, schedule: Schedule, now: DateTime<Local>) -> Self {
        let next_fire = schedule.after(&now).next();
        Self {
            expression: expression.to_string(),
            schedule,
            next_fire,
        }
    }
}

/// Registry changes made by [`BackupScheduler::sync`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncChanges {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.added + self.updated + self.removed == 0
    }
}

struct Dispatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn BackupStore>,
    executor: Arc<dyn TaskExecutor>,
    registry: Mutex<HashMap<i64, ScheduleEntry>>,
    wake: Notify,
    running: AtomicBool,
    dispatcher: Mutex<Option<Dispatcher>>,
}

/// Handle to the scheduler. Clones share the same registry.
#[derive(Clone)]
pub struct BackupScheduler {
    inner: Arc<Inner>,
}

impl BackupScheduler {
    pub fn new(store: Arc<dyn BackupStore>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                registry: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                running: AtomicBool::new(false),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Registers every enabled task and starts dispatching. Calling it while
    /// already running does nothing and returns 0.
    ///
    /// Tasks with an invalid expression are logged and skipped.
    pub fn start(&self) -> Result<usize> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return Ok(0);
        }

        let registered = match self.reload() {
            Ok(count) => count,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { dispatch_loop(inner, loop_token).await });
        *self.inner.dispatcher.lock().unwrap() = Some(Dispatcher { token, handle });

        info!("Scheduler started with {} tasks", registered);
        Ok(registered)
    }

    /// Halts dispatching and waits for the dispatcher loop to exit. Backups
    /// already handed to the executor keep running.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let dispatcher = self.inner.dispatcher.lock().unwrap().take();
        if let Some(Dispatcher { token, handle }) = dispatcher {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Scheduler dispatcher ended abnormally: {}", e);
            }
        }
        self.inner.registry.lock().unwrap().clear();
        info!("Scheduler stopped");
    }

    /// Rebuilds the registry from the enabled tasks in the store.
    pub fn reload(&self) -> Result<usize> {
        let tasks = self.inner.store.list_enabled_tasks()?;
        let now = Local::now();

        let mut entries = HashMap::new();
        for task in &tasks {
            match parse_schedule(&task.schedule) {
                Ok(schedule) => {
                    entries.insert(task.id, ScheduleEntry::new(&task.schedule, schedule, now));
                }
                Err(e) => warn!("Skipping task {} ({}): {}", task.id, task.name, e),
            }
        }

        let count = entries.len();
        *self.inner.registry.lock().unwrap() = entries;
        self.inner.wake.notify_one();
        Ok(count)
    }

    /// Brings the registry in line with the store without touching entries
    /// whose task is unchanged, so their pending fires are kept.
    ///
    /// Disabled and deleted tasks are removed. A changed expression that no
    /// longer parses keeps the previous trigger.
    pub fn sync(&self) -> Result<SyncChanges> {
        let tasks = self.inner.store.list_enabled_tasks()?;
        let now = Local::now();
        let mut changes = SyncChanges::default();

        {
            let mut registry = self.inner.registry.lock().unwrap();
            let enabled: HashSet<i64> = tasks.iter().map(|task| task.id).collect();
            registry.retain(|task_id, _| {
                let keep = enabled.contains(task_id);
                if !keep {
                    info!("Unscheduled task {}", task_id);
                    changes.removed += 1;
                }
                keep
            });

            for task in &tasks {
                let existing = registry.get(&task.id).map(|entry| entry.expression.as_str());
                if existing == Some(task.schedule.as_str()) {
                    continue;
                }
                let schedule = match parse_schedule(&task.schedule) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        warn!("Keeping previous trigger of task {} ({}): {}", task.id, task.name, e);
                        continue;
                    }
                };
                if registry
                    .insert(task.id, ScheduleEntry::new(&task.schedule, schedule, now))
                    .is_some()
                {
                    changes.updated += 1;
                } else {
                    changes.added += 1;
                }
                info!(
                    "Scheduled task {} ({}) with '{}'",
                    task.id, task.name, task.schedule
                );
            }
        }

        if !changes.is_empty() {
            self.inner.wake.notify_one();
        }
        Ok(changes)
    }

    /// Registers or replaces the trigger of `task`. A disabled task only has
    /// its existing trigger removed.
    pub fn add_task(&self, task: &BackupTask) -> Result<(), BackupError> {
        if !task.enabled {
            self.remove_task(task.id);
            return Ok(());
        }

        let schedule = parse_schedule(&task.schedule)?;
        let entry = ScheduleEntry::new(&task.schedule, schedule, Local::now());
        let next_fire = entry.next_fire;
        {
            let mut registry = self.inner.registry.lock().unwrap();
            registry.remove(&task.id);
            registry.insert(task.id, entry);
        }
        self.inner.wake.notify_one();

        info!(
            "Scheduled task {} ({}) with '{}', next fire {:?}",
            task.id, task.name, task.schedule, next_fire
        );
        Ok(())
    }

    pub fn remove_task(&self, task_id: i64) {
        let removed = self.inner.registry.lock().unwrap().remove(&task_id);
        if removed.is_some() {
            self.inner.wake.notify_one();
            info!("Unscheduled task {}", task_id);
        }
    }

    /// Runs the task once, right away, without touching its trigger.
    pub fn execute_now(&self, task_id: i64) -> JoinHandle<()> {
        info!("Manual run of task {} requested", task_id);
        let executor = self.inner.executor.clone();
        tokio::spawn(async move { executor.run_task(task_id).await })
    }

    pub fn next_fire_time(&self, task_id: i64) -> Option<DateTime<Local>> {
        let registry = self.inner.registry.lock().unwrap();
        registry
            .get(&task_id)
            .and_then(|entry| entry.schedule.upcoming(Local).next())
    }

    pub fn is_task_scheduled(&self, task_id: i64) -> bool {
        self.inner.registry.lock().unwrap().contains_key(&task_id)
    }

    pub fn scheduled_task_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.registry.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Expression registered for a task, if any.
    pub fn schedule_expression(&self, task_id: i64) -> Option<String> {
        self.inner
            .registry
            .lock()
            .unwrap()
            .get(&task_id)
            .map(|entry| entry.expression.clone())
    }

    #[cfg(test)]
    fn take_due(&self, now: DateTime<Local>) -> Vec<i64> {
        take_due(&self.inner, now)
    }
}

/// Ids of the entries due at `now`; each one is advanced to its next fire.
fn take_due(inner: &Inner, now: DateTime<Local>) -> Vec<i64> {
    let mut registry = inner.registry.lock().unwrap();
    let mut due = Vec::new();
    for (task_id, entry) in registry.iter_mut() {
        if matches!(entry.next_fire, Some(at) if at <= now) {
            due.push(*task_id);
            entry.next_fire = entry.schedule.after(&now).next();
        }
    }
    due.sort_unstable();
    due
}

fn time_until_next_fire(inner: &Inner) -> Duration {
    let registry = inner.registry.lock().unwrap();
    let now = Local::now();
    registry
        .values()
        .filter_map(|entry| entry.next_fire)
        .min()
        .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
        .map(|d| d.min(IDLE_CHECK_INTERVAL))
        .unwrap_or(IDLE_CHECK_INTERVAL)
}

async fn dispatch_loop(inner: Arc<Inner>, token: CancellationToken) {
    loop {
        let sleep_duration = time_until_next_fire(&inner);

        tokio::select! {
            _ = tokio::time::sleep(sleep_duration) => {
                for task_id in take_due(&inner, Local::now()) {
                    debug!("Trigger fired for task {}", task_id);
                    let executor = inner.executor.clone();
                    tokio::spawn(async move { executor.run_task(task_id).await });
                }
            }
            _ = inner.wake.notified() => {
                debug!("Scheduler registry changed");
            }
            _ = token.cancelled() => {
                break;
            }
        }
    }
    debug!("Scheduler dispatcher loop exited");
}

//! End-to-end tests for the scheduler driving real backups.

mod common;

use backup_orchestrator::backup_store::{BackupStatus, BackupStore};
use backup_orchestrator::error::BackupError;
use backup_orchestrator::scheduler::BackupScheduler;
use chrono::Local;
use common::{wait_for, TestEnv};
use std::collections::HashSet;
use std::time::Duration;

const EVERY_SECOND: &str = "* * * * * *";

fn scheduler(env: &TestEnv) -> BackupScheduler {
    BackupScheduler::new(env.store.clone(), env.engine())
}

#[tokio::test]
async fn test_every_second_task_produces_successful_records() {
    let env = TestEnv::new();
    let scheduler = scheduler(&env);
    scheduler.start().unwrap();
    let task = env.file_task("ticker", EVERY_SECOND, true);

    scheduler.add_task(&task).unwrap();
    let before = scheduler.next_fire_time(task.id).unwrap();
    assert!(before > Local::now() - chrono::Duration::seconds(1));
    assert!(before <= Local::now() + chrono::Duration::seconds(2));

    let store = env.store.clone();
    let succeeded = wait_for(Duration::from_secs(5), || {
        store
            .list_records_by_task(task.id, 10)
            .unwrap()
            .iter()
            .any(|r| r.status == BackupStatus::Success)
    })
    .await;
    assert!(succeeded, "no successful record within 5s");

    let after = scheduler.next_fire_time(task.id).unwrap();
    assert!(after > Local::now() - chrono::Duration::seconds(1));
    assert!(after <= Local::now() + chrono::Duration::seconds(2));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_readding_a_task_never_duplicates_fires() {
    let env = TestEnv::new();
    let scheduler = scheduler(&env);
    scheduler.start().unwrap();
    let task = env.file_task("ticker", EVERY_SECOND, true);

    scheduler.add_task(&task).unwrap();
    scheduler.add_task(&task).unwrap();
    scheduler.add_task(&task).unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.stop().await;
    // let in-flight runs finish writing
    tokio::time::sleep(Duration::from_millis(500)).await;

    let records = env.store.list_records_by_task(task.id, 100).unwrap();
    assert!(!records.is_empty());
    assert!(records.len() <= 3, "{} records in 2.5s", records.len());
    let seconds: HashSet<i64> = records.iter().map(|r| r.start_time.timestamp()).collect();
    assert_eq!(seconds.len(), records.len());
}

#[tokio::test]
async fn test_start_registers_enabled_tasks_only() {
    let env = TestEnv::new();
    let enabled = env.file_task("on", "0 0 4 * * *", true);
    let disabled = env.file_task("off", "0 0 4 * * *", false);
    let scheduler = scheduler(&env);

    assert_eq!(scheduler.start().unwrap(), 1);

    assert!(scheduler.is_task_scheduled(enabled.id));
    assert!(scheduler.next_fire_time(enabled.id).is_some());
    assert!(!scheduler.is_task_scheduled(disabled.id));
    assert!(scheduler.next_fire_time(disabled.id).is_none());
    scheduler.stop().await;
}

#[tokio::test]
async fn test_disabling_and_invalid_updates() {
    let env = TestEnv::new();
    let scheduler = scheduler(&env);
    scheduler.start().unwrap();
    let mut task = env.file_task("nightly", "0 0 4 * * *", true);
    scheduler.add_task(&task).unwrap();

    task.schedule = "not a schedule".into();
    let err = scheduler.add_task(&task).unwrap_err();
    assert!(matches!(err, BackupError::InvalidScheduleExpression { .. }));
    assert_eq!(
        scheduler.schedule_expression(task.id).as_deref(),
        Some("0 0 4 * * *")
    );

    task.enabled = false;
    scheduler.add_task(&task).unwrap();
    assert!(scheduler.next_fire_time(task.id).is_none());

    scheduler.remove_task(task.id);
    scheduler.remove_task(task.id);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_fire_for_deleted_task_is_a_noop() {
    let env = TestEnv::new();
    let scheduler = scheduler(&env);
    scheduler.start().unwrap();
    let task = env.file_task("doomed", EVERY_SECOND, true);
    scheduler.add_task(&task).unwrap();
    env.store.delete_task(task.id).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler.stop().await;

    assert!(env.store.list_records_by_task(task.id, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_execute_now_runs_out_of_band() {
    let env = TestEnv::new();
    let scheduler = scheduler(&env);
    let task = env.file_task("manual", "0 0 4 1 1 *", true);

    scheduler.execute_now(task.id).await.unwrap();

    let records = env.store.list_records_by_task(task.id, 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BackupStatus::Success);
    assert!(!scheduler.is_task_scheduled(task.id));
}

#[tokio::test]
async fn test_reload_picks_up_store_changes() {
    let env = TestEnv::new();
    let scheduler = scheduler(&env);
    let first = env.file_task("first", "0 0 4 * * *", true);
    scheduler.start().unwrap();

    let second = env.file_task("second", "0 0 5 * * *", true);
    let mut first_disabled = first.clone();
    first_disabled.enabled = false;
    env.store.update_task(&first_disabled).unwrap();

    assert_eq!(scheduler.reload().unwrap(), 1);
    assert_eq!(scheduler.scheduled_task_ids(), vec![second.id]);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_task_disabled_in_store_stops_firing() {
    let env = TestEnv::new();
    let scheduler = scheduler(&env);
    scheduler.start().unwrap();
    let mut task = env.file_task("ticker", EVERY_SECOND, true);
    scheduler.add_task(&task).unwrap();

    let store = env.store.clone();
    let fired = wait_for(Duration::from_secs(5), || {
        !store.list_records_by_task(task.id, 10).unwrap().is_empty()
    })
    .await;
    assert!(fired, "no record within 5s");

    // Another process disables the task; the scheduler is not told.
    task.enabled = false;
    env.store.update_task(&task).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let settled = env.store.list_records_by_task(task.id, 100).unwrap().len();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(
        env.store.list_records_by_task(task.id, 100).unwrap().len(),
        settled
    );
    assert!(scheduler.is_task_scheduled(task.id));

    let changes = scheduler.sync().unwrap();
    assert_eq!(changes.removed, 1);
    assert!(!scheduler.is_task_scheduled(task.id));
    scheduler.stop().await;
}

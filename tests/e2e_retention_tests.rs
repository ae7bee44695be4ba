//! End-to-end tests for the retention sweep.

mod common;

use backup_orchestrator::backup_store::{BackupStatus, BackupStore};
use backup_orchestrator::config::keys;
use backup_orchestrator::retention::{SweepTrigger, AUTO_CLEANED_MESSAGE};
use chrono::{Duration, Utc};
use common::{FakeHttpServer, NotifierEvent, TestEnv};
use std::path::Path;

fn configure_s3(env: &TestEnv, endpoint: &str) {
    env.set(keys::S3_ENDPOINT, endpoint);
    env.set(keys::S3_ACCESS_KEY, "ak");
    env.set(keys::S3_SECRET_KEY, "sk");
    env.set(keys::S3_BUCKET, "nightly");
}

/// Runs a real backup and backdates its record by `age_days`.
async fn aged_backup(env: &TestEnv, name: &str, age_days: i64) -> i64 {
    let task = env.file_task(name, "0 0 3 * * *", true);
    let mut record = env.engine().execute(&task).await.unwrap();
    record.start_time = Utc::now() - Duration::days(age_days);
    record.end_time = Some(record.start_time + Duration::seconds(1));
    env.store.update_record(&record).unwrap();
    record.id
}

#[tokio::test]
async fn test_old_local_backups_are_cleaned() {
    let env = TestEnv::new();
    env.set(keys::AUTO_CLEANUP_DAYS, "30");
    let old = aged_backup(&env, "old", 45).await;
    let recent = aged_backup(&env, "recent", 2).await;
    let old_path = env.store.get_record(old).unwrap().unwrap().file_path;

    let result = env.sweeper().sweep(SweepTrigger::Automatic).await;

    assert_eq!((result.success, result.failed, result.skipped), (1, 0, 0));
    assert!(!Path::new(&old_path).exists());
    let cleaned = env.store.get_record(old).unwrap().unwrap();
    assert_eq!(cleaned.status, BackupStatus::Cleaned);
    assert_eq!(cleaned.error_message, AUTO_CLEANED_MESSAGE);
    assert!(cleaned.file_path.is_empty());
    let kept = env.store.get_record(recent).unwrap().unwrap();
    assert_eq!(kept.status, BackupStatus::Success);
    assert!(Path::new(&kept.file_path).exists());

    assert!(matches!(
        &env.notifier.cleanups()[..],
        [NotifierEvent::Cleanup { success: 1, failed: 0, skipped: 0, is_auto: true, .. }]
    ));
}

#[tokio::test]
async fn test_sweep_twice_is_idempotent() {
    let env = TestEnv::new();
    env.set(keys::AUTO_CLEANUP_DAYS, "7");
    aged_backup(&env, "a", 10).await;
    aged_backup(&env, "b", 20).await;
    let sweeper = env.sweeper();

    let first = sweeper.sweep(SweepTrigger::Manual).await;
    assert_eq!(first.success, 2);

    let second = sweeper.sweep(SweepTrigger::Manual).await;
    assert_eq!((second.success, second.failed, second.skipped), (0, 0, 0));
}

#[tokio::test]
async fn test_zero_window_mutates_nothing() {
    let env = TestEnv::new();
    env.set(keys::AUTO_CLEANUP_DAYS, "0");
    let id = aged_backup(&env, "ancient", 1000).await;

    let result = env.sweeper().sweep(SweepTrigger::Manual).await;

    assert_eq!(result.total(), 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(
        env.store.get_record(id).unwrap().unwrap().status,
        BackupStatus::Success
    );
    assert!(matches!(
        &env.notifier.cleanups()[..],
        [NotifierEvent::Cleanup { is_auto: false, .. }]
    ));
}

#[tokio::test]
async fn test_already_missing_local_file_is_cleaned() {
    let env = TestEnv::new();
    env.set(keys::AUTO_CLEANUP_DAYS, "7");
    let id = aged_backup(&env, "vanished", 10).await;
    let path = env.store.get_record(id).unwrap().unwrap().file_path;
    std::fs::remove_file(&path).unwrap();

    let result = env.sweeper().sweep(SweepTrigger::Automatic).await;

    assert_eq!((result.success, result.failed), (1, 0));
    assert_eq!(
        env.store.get_record(id).unwrap().unwrap().status,
        BackupStatus::Cleaned
    );
}

#[tokio::test]
async fn test_s3_records_follow_their_stored_kind() {
    let server = FakeHttpServer::object_store().await;
    let env = TestEnv::new();
    env.set(keys::AUTO_CLEANUP_DAYS, "7");
    env.set(keys::STORAGE_TYPE, "s3");
    configure_s3(&env, &server.base_url);
    let id = aged_backup(&env, "remote", 10).await;
    let key = env.store.get_record(id).unwrap().unwrap().file_path;
    assert_eq!(server.object_paths(), vec![format!("/nightly/{}", key)]);

    // The default moved back to local, the S3 record is still cleaned remotely.
    env.set(keys::STORAGE_TYPE, "local");
    let result = env.sweeper().sweep(SweepTrigger::Automatic).await;

    assert_eq!((result.success, result.failed, result.skipped), (1, 0, 0));
    assert!(server.object_paths().is_empty());
    assert!(server
        .requests()
        .iter()
        .any(|r| r.method == "DELETE" && r.header("authorization").is_some()));
}

#[tokio::test]
async fn test_incomplete_s3_config_skips_and_server_errors_fail() {
    let server = FakeHttpServer::object_store().await;
    let env = TestEnv::new();
    env.set(keys::AUTO_CLEANUP_DAYS, "7");
    env.set(keys::STORAGE_TYPE, "s3");
    configure_s3(&env, &server.base_url);
    let first = aged_backup(&env, "one", 10).await;
    let second = aged_backup(&env, "two", 10).await;

    env.set(keys::S3_SECRET_KEY, "");
    let skipped = env.sweeper().sweep(SweepTrigger::Automatic).await;
    assert_eq!((skipped.success, skipped.failed, skipped.skipped), (0, 0, 2));
    assert!(skipped.errors.iter().all(|e| e.contains(keys::S3_SECRET_KEY)));

    env.set(keys::S3_SECRET_KEY, "sk");
    server.respond_with(&[500]);
    let mixed = env.sweeper().sweep(SweepTrigger::Automatic).await;
    assert_eq!((mixed.success, mixed.failed, mixed.skipped), (1, 1, 0));

    let statuses: Vec<BackupStatus> = [first, second]
        .iter()
        .map(|id| env.store.get_record(*id).unwrap().unwrap().status)
        .collect();
    assert!(statuses.contains(&BackupStatus::Cleaned));
    assert!(statuses.contains(&BackupStatus::Success));
}

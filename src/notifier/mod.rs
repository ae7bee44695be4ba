//! Best-effort notifications about backup and cleanup outcomes.
//!
//! Callers log notifier errors and carry on; a failed notification never
//! changes the outcome of a run or a sweep.

mod webhook;

pub use webhook::WebhookNotifier;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_backup_success(
        &self,
        task_name: &str,
        file_size: i64,
        file_path: &str,
        duration: Duration,
    ) -> Result<()>;

    async fn notify_backup_failure(&self, task_name: &str, message: &str) -> Result<()>;

    async fn notify_cleanup(
        &self,
        success: usize,
        failed: usize,
        skipped: usize,
        is_auto: bool,
        messages: &[String],
    ) -> Result<()>;
}

/// Drops every notification.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_backup_success(
        &self,
        _task_name: &str,
        _file_size: i64,
        _file_path: &str,
        _duration: Duration,
    ) -> Result<()> {
        Ok(())
    }

    async fn notify_backup_failure(&self, _task_name: &str, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn notify_cleanup(
        &self,
        _success: usize,
        _failed: usize,
        _skipped: usize,
        _is_auto: bool,
        _messages: &[String],
    ) -> Result<()> {
        Ok(())
    }
}

/// `1536` -> `1.50 KB`.
pub fn human_size(bytes: i64) -> String {
    if bytes <= 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.2} min", secs / 60.0)
    } else {
        format!("{:.2} s", secs)
    }
}

pub fn success_message(file_size: i64, file_path: &str, duration: Duration) -> String {
    let mut message = format!(
        "Backup finished, size: {}, duration: {}",
        human_size(file_size),
        human_duration(duration)
    );
    if !file_path.is_empty() {
        message.push_str(&format!(", path: {}", file_path));
    }
    message
}

pub fn cleanup_message(
    success: usize,
    failed: usize,
    skipped: usize,
    is_auto: bool,
    messages: &[String],
) -> String {
    let mut message = format!(
        "{} cleanup finished. success: {}, failed: {}, skipped: {}",
        if is_auto { "Automatic" } else { "Manual" },
        success,
        failed,
        skipped
    );
    if let Some(first) = messages.first() {
        message.push_str(&format!(" ({} errors, first: {})", messages.len(), first));
    }
    message
}

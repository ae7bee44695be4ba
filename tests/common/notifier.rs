use async_trait::async_trait;
use backup_orchestrator::notifier::Notifier;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    Success {
        task_name: String,
        file_size: i64,
        file_path: String,
    },
    Failure {
        task_name: String,
        message: String,
    },
    Cleanup {
        success: usize,
        failed: usize,
        skipped: usize,
        is_auto: bool,
        messages: Vec<String>,
    },
}

/// Notifier that keeps every event it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifierEvent>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotifierEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn cleanups(&self) -> Vec<NotifierEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, NotifierEvent::Cleanup { .. }))
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_backup_success(
        &self,
        task_name: &str,
        file_size: i64,
        file_path: &str,
        _duration: Duration,
    ) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(NotifierEvent::Success {
            task_name: task_name.to_string(),
            file_size,
            file_path: file_path.to_string(),
        });
        Ok(())
    }

    async fn notify_backup_failure(&self, task_name: &str, message: &str) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(NotifierEvent::Failure {
            task_name: task_name.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn notify_cleanup(
        &self,
        success: usize,
        failed: usize,
        skipped: usize,
        is_auto: bool,
        messages: &[String],
    ) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(NotifierEvent::Cleanup {
            success,
            failed,
            skipped,
            is_auto,
            messages: messages.to_vec(),
        });
        Ok(())
    }
}

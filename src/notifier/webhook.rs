use super::{cleanup_message, success_message, Notifier};
use crate::config::{RuntimeSettings, WebhookSettings};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub const EVENT_BACKUP_SUCCESS: &str = "backup_success";
pub const EVENT_BACKUP_FAILURE: &str = "backup_failure";
pub const EVENT_CLEANUP: &str = "cleanup_finished";
pub const EVENT_TEST: &str = "test";

struct WebhookEvent<'a> {
    event: &'a str,
    task_name: &'a str,
    message: &'a str,
    test_message: Option<&'a str>,
}

/// Posts templated notifications to a configured URL.
///
/// Settings are read on every call, so enabling the webhook or changing the
/// template takes effect immediately.
pub struct WebhookNotifier {
    settings: RuntimeSettings,
    client: reqwest::Client,
    retry_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(settings: RuntimeSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            settings,
            client,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sends a fixed test event. Unlike regular notifications this fails when
    /// the webhook is disabled.
    pub async fn send_test(&self) -> Result<()> {
        let webhook = self.settings.webhook();
        if !webhook.enabled {
            bail!("Webhook is not enabled");
        }
        let event = WebhookEvent {
            event: EVENT_TEST,
            task_name: "Test task",
            message: "This is a test message",
            test_message: Some("Webhook test message. Receiving it means the configuration works."),
        };
        self.send(&webhook, &event).await
    }

    async fn send_if_enabled(&self, event: &WebhookEvent<'_>) -> Result<()> {
        let webhook = self.settings.webhook();
        if !webhook.enabled {
            debug!("Webhook disabled, dropping {} notification", event.event);
            return Ok(());
        }
        self.send(&webhook, event).await
    }

    async fn send(&self, webhook: &WebhookSettings, event: &WebhookEvent<'_>) -> Result<()> {
        if webhook.url.trim().is_empty() {
            bail!("Webhook URL is not configured");
        }

        let raw_url = render(webhook.url.trim(), event, true);
        let url = Url::parse(&raw_url).with_context(|| format!("Invalid webhook URL {}", raw_url))?;
        let headers = parse_headers(&webhook.headers, event);
        let body = render(&webhook.body_template, event, false);
        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));

        let mut last_error = anyhow!("Webhook was not attempted");
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            let mut request = if body.is_empty() {
                self.client.get(url.clone())
            } else {
                let request = self.client.post(url.clone()).body(body.clone());
                if has_content_type {
                    request
                } else {
                    request.header("Content-Type", "application/json")
                }
            };
            for (name, value) in &headers {
                request = request.header(name.as_str(), value.as_str());
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!(
                        "Webhook {} delivered with status {}",
                        event.event,
                        response.status()
                    );
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last_error = anyhow!("Webhook returned status {}: {}", status, text);
                }
                Err(e) => {
                    last_error = anyhow::Error::new(e).context("Failed to send webhook");
                }
            }
            warn!(
                "Webhook attempt {}/{} failed: {:#}",
                attempt + 1,
                MAX_RETRIES + 1,
                last_error
            );
        }
        Err(last_error)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_backup_success(
        &self,
        task_name: &str,
        file_size: i64,
        file_path: &str,
        duration: Duration,
    ) -> Result<()> {
        let message = success_message(file_size, file_path, duration);
        self.send_if_enabled(&WebhookEvent {
            event: EVENT_BACKUP_SUCCESS,
            task_name,
            message: &message,
            test_message: None,
        })
        .await
    }

    async fn notify_backup_failure(&self, task_name: &str, message: &str) -> Result<()> {
        self.send_if_enabled(&WebhookEvent {
            event: EVENT_BACKUP_FAILURE,
            task_name,
            message,
            test_message: None,
        })
        .await
    }

    async fn notify_cleanup(
        &self,
        success: usize,
        failed: usize,
        skipped: usize,
        is_auto: bool,
        messages: &[String],
    ) -> Result<()> {
        let message = cleanup_message(success, failed, skipped, is_auto, messages);
        self.send_if_enabled(&WebhookEvent {
            event: EVENT_CLEANUP,
            task_name: "System cleanup",
            message: &message,
            test_message: None,
        })
        .await
    }
}

/// Control characters, quotes and backslashes become spaces.
fn sanitize(message: &str) -> String {
    message
        .chars()
        .map(|c| {
            if c.is_control() || c == '"' || c == '\'' || c == '\\' {
                ' '
            } else {
                c
            }
        })
        .collect()
}

fn render(template: &str, event: &WebhookEvent<'_>, for_url: bool) -> String {
    if template.is_empty() {
        return String::new();
    }
    let encode = |value: &str| -> String {
        if for_url {
            urlencoding::encode(value).into_owned()
        } else {
            value.to_string()
        }
    };

    let mut rendered = template
        .replace("${taskName}", &encode(event.task_name))
        .replace("${event}", &encode(event.event))
        .replace("${message}", &encode(&sanitize(event.message)));
    if let Some(test_message) = event.test_message {
        rendered = rendered.replace("${testMessage}", &encode(&sanitize(test_message)));
    }
    rendered
}

/// One `Name: value` per line; malformed lines are ignored.
fn parse_headers(raw: &str, event: &WebhookEvent<'_>) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let (name, value) = line.trim().split_once(':')?;
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() || value.is_empty() {
                return None;
            }
            Some((name.to_string(), render(value, event, false)))
        })
        .collect()
}

//! Runtime settings: a key/value lookup persisted next to the backup data.
//!
//! Unlike [`super::AppConfig`], these values are read on every use, so an edit made
//! through the admin CLI applies to the next backup run or sweep without a restart.

use crate::backup_store::SettingEntry;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub mod keys {
    pub const STORAGE_TYPE: &str = "storage.type";
    pub const STORAGE_LOCAL_PATH: &str = "storage.localPath";
    pub const S3_ENDPOINT: &str = "storage.s3Endpoint";
    pub const S3_REGION: &str = "storage.s3Region";
    pub const S3_ACCESS_KEY: &str = "storage.s3AccessKey";
    pub const S3_SECRET_KEY: &str = "storage.s3SecretKey";
    pub const S3_BUCKET: &str = "storage.s3Bucket";
    pub const AUTO_CLEANUP_DAYS: &str = "system.autoCleanupDays";
    pub const WEBHOOK_ENABLED: &str = "webhook.enabled";
    pub const WEBHOOK_URL: &str = "webhook.url";
    pub const WEBHOOK_HEADERS: &str = "webhook.headers";
    pub const WEBHOOK_BODY: &str = "webhook.body";
}

pub const DEFAULT_LOCAL_PATH: &str = "./backups";
pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_RETENTION_DAYS: i64 = 90;
pub const DEFAULT_WEBHOOK_BODY: &str =
    r#"{"event":"${event}","taskName":"${taskName}","message":"${message}"}"#;

/// (key, default value, description)
pub const DEFAULT_SETTINGS: &[(&str, &str, &str)] = &[
    (keys::STORAGE_TYPE, "local", "Storage backend for new artifacts: local or s3"),
    (keys::STORAGE_LOCAL_PATH, DEFAULT_LOCAL_PATH, "Base directory for local artifacts"),
    (keys::S3_ENDPOINT, "", "S3 endpoint URL, empty for AWS"),
    (keys::S3_REGION, DEFAULT_S3_REGION, "S3 region"),
    (keys::S3_ACCESS_KEY, "", "S3 access key"),
    (keys::S3_SECRET_KEY, "", "S3 secret key"),
    (keys::S3_BUCKET, "", "S3 bucket name"),
    (keys::AUTO_CLEANUP_DAYS, "90", "Retention window in days, 0 disables cleanup"),
    (keys::WEBHOOK_ENABLED, "false", "Send webhook notifications"),
    (keys::WEBHOOK_URL, "", "Webhook URL"),
    (keys::WEBHOOK_HEADERS, "", "Webhook headers, one 'Name: value' per line"),
    (keys::WEBHOOK_BODY, DEFAULT_WEBHOOK_BODY, "Webhook body template"),
];

pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    /// Inserts or updates a setting. `None` keeps an existing description.
    fn set_setting(&self, key: &str, value: &str, description: Option<&str>) -> Result<()>;
    fn list_settings(&self) -> Result<Vec<SettingEntry>>;
}

/// Object storage configuration as currently stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

impl S3Settings {
    /// Names of the settings that must be filled before objects can be addressed.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.access_key.is_empty() {
            missing.push(keys::S3_ACCESS_KEY);
        }
        if self.secret_key.is_empty() {
            missing.push(keys::S3_SECRET_KEY);
        }
        if self.bucket.is_empty() {
            missing.push(keys::S3_BUCKET);
        }
        missing
    }

    /// Endpoint to talk to, falling back to the AWS regional endpoint.
    pub fn effective_endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("https://s3.{}.amazonaws.com", self.region)
        } else {
            self.endpoint.trim_end_matches('/').to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub url: String,
    pub headers: String,
    pub body_template: String,
}

/// Outcome of reading the retention window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionWindow {
    Days(i64),
    Disabled,
    Invalid(String),
}

/// Typed, always-fresh view over a [`SettingsStore`].
#[derive(Clone)]
pub struct RuntimeSettings {
    store: Arc<dyn SettingsStore>,
}

impl RuntimeSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /// Writes every default that is not present yet. Returns how many were added.
    pub fn init_defaults(&self) -> Result<usize> {
        let mut added = 0;
        for (key, value, description) in DEFAULT_SETTINGS {
            if self.store.get_setting(key)?.is_none() {
                self.store.set_setting(key, value, Some(description))?;
                added += 1;
            }
        }
        if added > 0 {
            info!("Initialized {} default settings", added);
        }
        Ok(added)
    }

    /// Raw value; read errors are logged and reported as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.store.get_setting(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read setting {}: {:#}", key, e);
                None
            }
        }
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => default.to_string(),
        }
    }

    pub fn storage_type(&self) -> String {
        self.get_or(keys::STORAGE_TYPE, "local")
    }

    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(self.get_or(keys::STORAGE_LOCAL_PATH, DEFAULT_LOCAL_PATH))
    }

    pub fn s3(&self) -> S3Settings {
        S3Settings {
            endpoint: self.get_or(keys::S3_ENDPOINT, ""),
            region: self.get_or(keys::S3_REGION, DEFAULT_S3_REGION),
            access_key: self.get_or(keys::S3_ACCESS_KEY, ""),
            secret_key: self.get_or(keys::S3_SECRET_KEY, ""),
            bucket: self.get_or(keys::S3_BUCKET, ""),
        }
    }

    pub fn retention_window(&self) -> RetentionWindow {
        let raw = self.get_or(keys::AUTO_CLEANUP_DAYS, &DEFAULT_RETENTION_DAYS.to_string());
        match raw.parse::<i64>() {
            Ok(days) if days > 0 => RetentionWindow::Days(days),
            Ok(_) => RetentionWindow::Disabled,
            Err(e) => RetentionWindow::Invalid(format!(
                "Invalid {} value '{}': {}",
                keys::AUTO_CLEANUP_DAYS,
                raw,
                e
            )),
        }
    }

    pub fn webhook(&self) -> WebhookSettings {
        WebhookSettings {
            enabled: self.get_or(keys::WEBHOOK_ENABLED, "false") == "true",
            url: self.get_or(keys::WEBHOOK_URL, ""),
            headers: self.get(keys::WEBHOOK_HEADERS).unwrap_or_default(),
            // An explicitly empty body is meaningful (GET request), so no fallback here.
            body_template: self
                .get(keys::WEBHOOK_BODY)
                .unwrap_or_else(|| DEFAULT_WEBHOOK_BODY.to_string()),
        }
    }
}

/// Settings held in memory, for tools and tests that run without a database.
#[derive(Default)]
pub struct MemorySettingsStore {
    entries: RwLock<HashMap<String, SettingEntry>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: &[(&str, &str)]) -> Self {
        let store = Self::new();
        for (key, value) in values {
            // Writes to an in-memory map cannot fail.
            let _ = store.set_setting(key, value, None);
        }
        store
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    fn set_setting(&self, key: &str, value: &str, description: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(key.to_string()).or_insert_with(|| SettingEntry {
            key: key.to_string(),
            value: String::new(),
            description: String::new(),
            updated_at: Utc::now(),
        });
        entry.value = value.to_string();
        if let Some(description) = description {
            entry.description = description.to_string();
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    fn list_settings(&self) -> Result<Vec<SettingEntry>> {
        let entries = self.entries.read().unwrap();
        let mut all: Vec<SettingEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(values: &[(&str, &str)]) -> RuntimeSettings {
        RuntimeSettings::new(Arc::new(MemorySettingsStore::with_values(values)))
    }

    #[test]
    fn init_defaults_keeps_existing_values() {
        let runtime = settings(&[(keys::STORAGE_TYPE, "s3")]);

        let added = runtime.init_defaults().unwrap();

        assert_eq!(added, DEFAULT_SETTINGS.len() - 1);
        assert_eq!(runtime.storage_type(), "s3");
        assert_eq!(runtime.local_path(), PathBuf::from(DEFAULT_LOCAL_PATH));
        assert_eq!(runtime.init_defaults().unwrap(), 0);
    }

    #[test]
    fn retention_window_parsing() {
        assert_eq!(
            settings(&[(keys::AUTO_CLEANUP_DAYS, "7")]).retention_window(),
            RetentionWindow::Days(7)
        );
        assert_eq!(
            settings(&[(keys::AUTO_CLEANUP_DAYS, "0")]).retention_window(),
            RetentionWindow::Disabled
        );
        assert_eq!(
            settings(&[(keys::AUTO_CLEANUP_DAYS, "-3")]).retention_window(),
            RetentionWindow::Disabled
        );
        assert!(matches!(
            settings(&[(keys::AUTO_CLEANUP_DAYS, "weekly")]).retention_window(),
            RetentionWindow::Invalid(_)
        ));
        assert_eq!(
            settings(&[]).retention_window(),
            RetentionWindow::Days(DEFAULT_RETENTION_DAYS)
        );
    }

    #[test]
    fn s3_completeness() {
        let runtime = settings(&[
            (keys::S3_ACCESS_KEY, "AKIA"),
            (keys::S3_SECRET_KEY, "secret"),
        ]);
        let s3 = runtime.s3();
        assert_eq!(s3.missing_fields(), vec![keys::S3_BUCKET]);
        assert_eq!(s3.region, DEFAULT_S3_REGION);
        assert_eq!(s3.effective_endpoint(), "https://s3.us-east-1.amazonaws.com");

        let runtime = settings(&[
            (keys::S3_ACCESS_KEY, "AKIA"),
            (keys::S3_SECRET_KEY, "secret"),
            (keys::S3_BUCKET, "nightly"),
            (keys::S3_ENDPOINT, "http://minio:9000/"),
        ]);
        assert!(runtime.s3().missing_fields().is_empty());
        assert_eq!(runtime.s3().effective_endpoint(), "http://minio:9000");
    }

    #[test]
    fn webhook_body_can_be_emptied() {
        let runtime = settings(&[(keys::WEBHOOK_ENABLED, "true"), (keys::WEBHOOK_BODY, "")]);
        let webhook = runtime.webhook();
        assert!(webhook.enabled);
        assert_eq!(webhook.body_template, "");

        assert_eq!(settings(&[]).webhook().body_template, DEFAULT_WEBHOOK_BODY);
    }
}

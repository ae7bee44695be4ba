use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,

    // Feature configs
    pub backup: Option<BackupFileConfig>,
    pub scheduler: Option<SchedulerFileConfig>,

    /// Runtime setting overrides, written to the settings table at startup.
    /// Keys are the dotted setting names, e.g. `"storage.type" = "s3"`.
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackupFileConfig {
    pub work_dir: Option<String>,
    pub mysqldump_path: Option<String>,
    pub strategy_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerFileConfig {
    pub allow_overlapping_runs: Option<bool>,
    pub retention_schedule: Option<String>,
    pub schedule_sync_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

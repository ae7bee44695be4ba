mod file_config;
mod settings;

pub use file_config::{BackupFileConfig, FileConfig, SchedulerFileConfig};
pub use settings::*;

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "./backup.db";
pub const DEFAULT_MYSQLDUMP_PATH: &str = "mysqldump";
pub const DEFAULT_RETENTION_SCHEDULE: &str = "0 0 2 * * *";
pub const DEFAULT_SCHEDULE_SYNC_SECS: u64 = 30;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub mysqldump_path: Option<String>,
    pub strategy_timeout_secs: Option<u64>,
    pub no_overlapping_runs: bool,
    pub retention_schedule: Option<String>,
    pub schedule_sync_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub backup: BackupSettings,
    pub scheduler: SchedulerSettings,
    /// Runtime setting overrides to write at startup.
    pub settings_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub work_dir: PathBuf,
    pub mysqldump_path: String,
    pub strategy_timeout: Option<Duration>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            mysqldump_path: DEFAULT_MYSQLDUMP_PATH.to_string(),
            strategy_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub allow_overlapping_runs: bool,
    pub retention_schedule: String,
    /// How often the running scheduler picks up task edits made in the store.
    pub sync_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            allow_overlapping_runs: true,
            retention_schedule: DEFAULT_RETENTION_SCHEDULE.to_string(),
            sync_interval: Duration::from_secs(DEFAULT_SCHEDULE_SYNC_SECS),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        if db_path.is_dir() {
            bail!("db_path points to a directory: {:?}", db_path);
        }
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let backup_file = file.backup.unwrap_or_default();
        let defaults = BackupSettings::default();

        let work_dir = backup_file
            .work_dir
            .map(PathBuf::from)
            .or_else(|| cli.work_dir.clone())
            .unwrap_or(defaults.work_dir);
        if !work_dir.is_dir() {
            bail!("work_dir is not an existing directory: {:?}", work_dir);
        }

        let mysqldump_path = backup_file
            .mysqldump_path
            .or_else(|| cli.mysqldump_path.clone())
            .unwrap_or(defaults.mysqldump_path);

        let strategy_timeout = match backup_file
            .strategy_timeout_secs
            .or(cli.strategy_timeout_secs)
        {
            Some(0) => bail!("strategy_timeout_secs must be greater than zero"),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let scheduler_file = file.scheduler.unwrap_or_default();
        let allow_overlapping_runs = scheduler_file
            .allow_overlapping_runs
            .unwrap_or(!cli.no_overlapping_runs);

        let retention_schedule = scheduler_file
            .retention_schedule
            .or_else(|| cli.retention_schedule.clone())
            .unwrap_or_else(|| DEFAULT_RETENTION_SCHEDULE.to_string());
        if let Err(e) = crate::scheduler::parse_schedule(&retention_schedule) {
            bail!("Invalid retention_schedule: {}", e);
        }

        let sync_interval = match scheduler_file
            .schedule_sync_secs
            .or(cli.schedule_sync_secs)
            .unwrap_or(DEFAULT_SCHEDULE_SYNC_SECS)
        {
            0 => bail!("schedule_sync_secs must be greater than zero"),
            secs => Duration::from_secs(secs),
        };

        Ok(Self {
            db_path,
            backup: BackupSettings {
                work_dir,
                mysqldump_path,
                strategy_timeout,
            },
            scheduler: SchedulerSettings {
                allow_overlapping_runs,
                retention_schedule,
                sync_interval,
            },
            settings_overrides: file.settings,
        })
    }
}

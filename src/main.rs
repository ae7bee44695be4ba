use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backup_orchestrator::background_jobs::jobs::{RetentionSweepJob, ScheduleSyncJob};
use backup_orchestrator::background_jobs::JobRunner;
use backup_orchestrator::backup_store::SqliteBackupStore;
use backup_orchestrator::config::{AppConfig, CliConfig, FileConfig, RuntimeSettings, SettingsStore};
use backup_orchestrator::engine::{EngineSettings, ExecutionEngine};
use backup_orchestrator::notifier::WebhookNotifier;
use backup_orchestrator::reconcile::ReconciliationPass;
use backup_orchestrator::retention::RetentionSweeper;
use backup_orchestrator::scheduler::BackupScheduler;
use backup_orchestrator::storage::StorageDispatcher;
use backup_orchestrator::strategy::StrategySet;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database holding tasks, records and settings.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Directory for per-run temporary files.
    #[clap(long, value_parser = parse_path)]
    pub work_dir: Option<PathBuf>,

    /// mysqldump executable used for database backups.
    #[clap(long)]
    pub mysqldump_path: Option<String>,

    /// Abort a backup whose artifact is not ready after this many seconds.
    #[clap(long)]
    pub strategy_timeout_secs: Option<u64>,

    /// Reject a run of a task while a previous run of it is still going.
    #[clap(long)]
    pub no_overlapping_runs: bool,

    /// Cron expression (seconds first) for the retention sweep.
    #[clap(long)]
    pub retention_schedule: Option<String>,

    /// Seconds between checks of the task table for edits made while running.
    #[clap(long)]
    pub schedule_sync_secs: Option<u64>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            work_dir: self.work_dir.clone(),
            mysqldump_path: self.mysqldump_path.clone(),
            strategy_timeout_secs: self.strategy_timeout_secs,
            no_overlapping_runs: self.no_overlapping_runs,
            retention_schedule: self.retention_schedule.clone(),
            schedule_sync_secs: self.schedule_sync_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    info!(
        "Starting backup server {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening SQLite backup database at {:?}...", config.db_path);
    let store = Arc::new(SqliteBackupStore::new(&config.db_path)?);

    let settings = RuntimeSettings::new(store.clone());
    settings.init_defaults()?;
    for (key, value) in &config.settings_overrides {
        info!("Applying setting override {}", key);
        store.set_setting(key, value, None)?;
    }

    // Before the scheduler starts, so no live run can be touched.
    let stats = ReconciliationPass::new(store.clone()).run()?;
    if stats.failed > 0 {
        warn!("{} records could not be reconciled", stats.failed);
    }

    let dispatcher = Arc::new(StorageDispatcher::new(settings.clone())?);
    let notifier = Arc::new(WebhookNotifier::new(settings.clone())?);
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        dispatcher.clone(),
        StrategySet::standard(&config.backup.mysqldump_path),
        notifier.clone(),
        EngineSettings {
            strategy_timeout: config.backup.strategy_timeout,
            allow_overlapping_runs: config.scheduler.allow_overlapping_runs,
            work_dir: config.backup.work_dir.clone(),
        },
    ));

    let scheduler = BackupScheduler::new(store.clone(), engine);
    scheduler.start()?;

    let sweeper = Arc::new(RetentionSweeper::new(store.clone(), dispatcher, notifier));
    let mut job_runner = JobRunner::new();
    job_runner.register_job(Arc::new(RetentionSweepJob::new(
        sweeper,
        config.scheduler.retention_schedule.clone(),
    )));
    job_runner.register_job(Arc::new(ScheduleSyncJob::new(
        scheduler.clone(),
        config.scheduler.sync_interval,
    )));
    if let Err(e) = job_runner.start() {
        error!("Failed to start background jobs: {}", e);
        scheduler.stop().await;
        return Err(e.into());
    }

    info!("Backup server running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown requested");
    job_runner.stop().await;
    scheduler.stop().await;
    info!("Backup server stopped");
    Ok(())
}

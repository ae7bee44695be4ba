use super::notifier::RecordingNotifier;
use backup_orchestrator::backup_store::{BackupKind, BackupStore, BackupTask, NewBackupTask, SqliteBackupStore};
use backup_orchestrator::config::{keys, RuntimeSettings, SettingsStore};
use backup_orchestrator::engine::{EngineSettings, ExecutionEngine};
use backup_orchestrator::retention::RetentionSweeper;
use backup_orchestrator::storage::StorageDispatcher;
use backup_orchestrator::strategy::StrategySet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Isolated database, backup directory and source directory for one test.
pub struct TestEnv {
    pub store: Arc<SqliteBackupStore>,
    pub settings: RuntimeSettings,
    pub notifier: Arc<RecordingNotifier>,
    pub backups_dir: TempDir,
    pub source_dir: TempDir,
    _db_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        let db_dir = TempDir::new().expect("Failed to create db dir");
        let store = Arc::new(
            SqliteBackupStore::new(db_dir.path().join("backup.db"))
                .expect("Failed to open backup store"),
        );
        let settings = RuntimeSettings::new(store.clone());
        settings.init_defaults().expect("Failed to seed settings");

        let backups_dir = TempDir::new().expect("Failed to create backups dir");
        store
            .set_setting(
                keys::STORAGE_LOCAL_PATH,
                backups_dir.path().to_str().unwrap(),
                None,
            )
            .unwrap();

        let source_dir = TempDir::new().expect("Failed to create source dir");
        std::fs::write(source_dir.path().join("notes.txt"), b"remember the milk").unwrap();
        std::fs::create_dir_all(source_dir.path().join("nested")).unwrap();
        std::fs::write(source_dir.path().join("nested/data.csv"), b"a,b\n1,2\n").unwrap();

        Self {
            store,
            settings,
            notifier: Arc::new(RecordingNotifier::default()),
            backups_dir,
            source_dir,
            _db_dir: db_dir,
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.store.set_setting(key, value, None).unwrap();
    }

    pub fn dispatcher(&self) -> Arc<StorageDispatcher> {
        Arc::new(StorageDispatcher::new(self.settings.clone()).unwrap())
    }

    pub fn engine(&self) -> Arc<ExecutionEngine> {
        self.engine_with(EngineSettings::default())
    }

    pub fn engine_with(&self, settings: EngineSettings) -> Arc<ExecutionEngine> {
        Arc::new(ExecutionEngine::new(
            self.store.clone(),
            self.dispatcher(),
            StrategySet::standard("mysqldump"),
            self.notifier.clone(),
            settings,
        ))
    }

    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(self.store.clone(), self.dispatcher(), self.notifier.clone())
    }

    pub fn file_task(&self, name: &str, schedule: &str, enabled: bool) -> BackupTask {
        self.store
            .create_task(&NewBackupTask {
                name: name.to_string(),
                kind: BackupKind::File,
                source_info: file_source(self.source_dir.path()),
                schedule: schedule.to_string(),
                enabled,
            })
            .unwrap()
    }
}

pub fn file_source(path: &Path) -> String {
    serde_json::json!({ "paths": [path.to_string_lossy()] }).to_string()
}

/// Polls `condition` every 50ms until it holds or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

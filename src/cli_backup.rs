use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod cli_style;

use backup_orchestrator::backup_store::{BackupKind, BackupStore, NewBackupTask, SqliteBackupStore};
use backup_orchestrator::config::{
    AppConfig, CliConfig, FileConfig, RuntimeSettings, SettingsStore, DEFAULT_SCHEDULE_SYNC_SECS,
};
use backup_orchestrator::engine::{EngineSettings, ExecutionEngine};
use backup_orchestrator::notifier::{human_size, WebhookNotifier};
use backup_orchestrator::reconcile::ReconciliationPass;
use backup_orchestrator::retention::{RetentionSweeper, SweepTrigger};
use backup_orchestrator::scheduler::{parse_schedule, BackupScheduler};
use backup_orchestrator::storage::StorageDispatcher;
use backup_orchestrator::strategy::{SourceDescriptor, StrategySet};
use cli_style::{
    get_styles, print_command_echo, print_empty_list, print_error, print_goodbye,
    print_key_value, print_key_value_colored, print_section_footer, print_section_header,
    print_success, print_warning, print_welcome, status_color, TableBuilder, PROMPT,
};

use rustyline::{
    completion::Completer, highlight::Highlighter, history::FileHistory, validate::Validator,
    CompletionType, Config, Editor, Helper,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    /// Path to the SQLite backup database.
    #[clap(value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to the TOML configuration file used by the server.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

#[derive(Parser)]
#[command(styles=get_styles(),name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Creates a backup task. KIND is one of database, file, config.
    AddTask {
        name: String,
        kind: String,
        source: String,
        schedule: String,
        /// Create the task without scheduling it.
        #[clap(long)]
        disabled: bool,
    },

    /// Changes name, source info or schedule of a task.
    UpdateTask {
        id: i64,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        source: Option<String>,
        #[clap(long)]
        schedule: Option<String>,
    },

    /// Enables a task.
    Enable { id: i64 },

    /// Disables a task.
    Disable { id: i64 },

    /// Deletes a task, its records are kept.
    DeleteTask { id: i64 },

    /// Lists all tasks.
    Tasks,

    /// Shows a task and its latest records.
    ShowTask { id: i64 },

    /// Lists backup records, most recent first.
    Records {
        #[clap(long)]
        task: Option<i64>,
        #[clap(long, default_value_t = 20)]
        limit: usize,
        /// Print the records as JSON instead of a table.
        #[clap(long)]
        json: bool,
    },

    /// Runs a backup of the task now and waits for it.
    Run { id: i64 },

    /// Shows when the task fires next.
    NextFire { id: i64 },

    /// Deletes backups older than the retention window.
    Sweep,

    /// Fails records left running or pending by a crash. Offline only:
    /// refuses while a record started running within the last hour.
    Reconcile,

    /// Lists runtime settings.
    Settings,

    /// Changes a runtime setting.
    Set { key: String, value: String },

    /// Sends a test notification to the configured webhook.
    TestWebhook,

    /// Shows the path of the current backup db.
    Where,

    /// Close this program.
    Exit,
}

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

struct Shell {
    runtime: tokio::runtime::Runtime,
    store: Arc<SqliteBackupStore>,
    settings: RuntimeSettings,
    engine: Arc<ExecutionEngine>,
    scheduler: BackupScheduler,
    sweeper: RetentionSweeper,
    webhook: WebhookNotifier,
}

impl Shell {
    fn new(config: &AppConfig) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
        let store = Arc::new(SqliteBackupStore::new(&config.db_path)?);
        let settings = RuntimeSettings::new(store.clone());
        settings.init_defaults()?;

        let dispatcher = Arc::new(StorageDispatcher::new(settings.clone())?);
        let webhook = WebhookNotifier::new(settings.clone())?;
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
        // Never started: only used to compute fire times.
        let scheduler = BackupScheduler::new(store.clone(), engine.clone());
        let sweeper = RetentionSweeper::new(store.clone(), dispatcher, notifier);

        Ok(Self {
            runtime,
            store,
            settings,
            engine,
            scheduler,
            sweeper,
            webhook,
        })
    }

    fn task(&self, id: i64) -> Result<backup_orchestrator::backup_store::BackupTask> {
        self.store
            .get_task(id)?
            .ok_or_else(|| anyhow!("Task {} not found", id))
    }

    fn add_task(
        &self,
        name: String,
        kind: &str,
        source: String,
        schedule: String,
        disabled: bool,
    ) -> Result<()> {
        let kind = BackupKind::parse(kind)
            .ok_or_else(|| anyhow!("Invalid kind '{}'. Valid kinds are: database, file, config", kind))?;
        SourceDescriptor::parse(kind, &source).map_err(|e| anyhow!("Invalid source: {}", e))?;
        parse_schedule(&schedule)?;

        let task = self.store.create_task(&NewBackupTask {
            name,
            kind,
            source_info: source,
            schedule,
            enabled: !disabled,
        })?;
        print_success(&format!("Created task {} ({})", task.id, task.name));
        Ok(())
    }

    fn update_task(
        &self,
        id: i64,
        name: Option<String>,
        source: Option<String>,
        schedule: Option<String>,
    ) -> Result<()> {
        let mut task = self.task(id)?;
        if let Some(name) = name {
            task.name = name;
        }
        if let Some(source) = source {
            SourceDescriptor::parse(task.kind, &source)
                .map_err(|e| anyhow!("Invalid source: {}", e))?;
            task.source_info = source;
        }
        if let Some(schedule) = schedule {
            parse_schedule(&schedule)?;
            task.schedule = schedule;
        }
        self.store.update_task(&task)?;
        print_success(&format!("Updated task {}", id));
        print_server_sync_note();
        Ok(())
    }

    fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let mut task = self.task(id)?;
        task.enabled = enabled;
        self.store.update_task(&task)?;
        print_success(&format!(
            "Task {} {}",
            id,
            if enabled { "enabled" } else { "disabled" }
        ));
        print_server_sync_note();
        Ok(())
    }

    fn delete_task(&self, id: i64) -> Result<()> {
        if !self.store.delete_task(id)? {
            bail!("Task {} not found", id);
        }
        print_success(&format!("Deleted task {}", id));
        print_server_sync_note();
        Ok(())
    }

    fn list_tasks(&self) -> Result<()> {
        let tasks = self.store.list_tasks()?;
        print_section_header("Tasks");
        if tasks.is_empty() {
            print_empty_list("No tasks");
        } else {
            let mut table = TableBuilder::new(vec!["ID", "Name", "Kind", "Schedule", "Enabled"]);
            for task in tasks {
                table.add_row(vec![
                    task.id.to_string(),
                    task.name,
                    task.kind.to_string(),
                    task.schedule,
                    if task.enabled { "yes" } else { "no" }.to_string(),
                ]);
            }
            table.print();
        }
        print_section_footer();
        Ok(())
    }

    fn show_task(&self, id: i64) -> Result<()> {
        let task = self.task(id)?;
        print_section_header(&format!("Task {}", task.id));
        print_key_value("Name", &task.name);
        print_key_value("Kind", task.kind.as_str());
        print_key_value("Source", &task.source_info);
        print_key_value("Schedule", &task.schedule);
        print_key_value("Enabled", if task.enabled { "yes" } else { "no" });
        print_key_value("Created", &task.created_at.to_rfc3339());
        print_key_value("Updated", &task.updated_at.to_rfc3339());
        for record in self.store.list_records_by_task(id, 5)? {
            print_key_value_colored(
                &format!("Record {}", record.id),
                &format!("{} ({})", record.status, record.start_time.to_rfc3339()),
                status_color(record.status.as_str()),
            );
        }
        print_section_footer();
        Ok(())
    }

    fn list_records(&self, task: Option<i64>, limit: usize, json: bool) -> Result<()> {
        let (records, total) = match task {
            Some(task_id) => {
                let records = self.store.list_records_by_task(task_id, limit)?;
                let count = records.len();
                (records, count)
            }
            None => self.store.list_records(0, limit)?,
        };

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&records).context("Failed to encode records")?
            );
            return Ok(());
        }

        print_section_header(&format!("Records ({} of {})", records.len(), total));
        if records.is_empty() {
            print_empty_list("No records");
        } else {
            let mut table = TableBuilder::new(vec![
                "ID", "Task", "Status", "Started", "Duration", "Size", "Storage", "Detail",
            ]);
            for record in records {
                let duration = record
                    .duration()
                    .map(|d| format!("{}s", d.num_seconds()))
                    .unwrap_or_default();
                let detail = if record.error_message.is_empty() {
                    record.file_path.clone()
                } else {
                    record.error_message.clone()
                };
                table.add_row(vec![
                    record.id.to_string(),
                    record.task_id.to_string(),
                    record.status.to_string(),
                    record.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
                    duration,
                    human_size(record.file_size),
                    record.storage_type.clone(),
                    detail,
                ]);
            }
            table.print();
        }
        print_section_footer();
        Ok(())
    }

    fn run(&self, id: i64) -> Result<()> {
        match self.runtime.block_on(self.engine.execute_by_id(id)) {
            Ok(record) => {
                print_success(&format!(
                    "Record {}: {} stored at {}",
                    record.id,
                    human_size(record.file_size),
                    record.file_path
                ));
                Ok(())
            }
            Err(e) => match e.record {
                Some(record) => bail!("Record {} failed: {}", record.id, e.error),
                None => bail!("{}", e.error),
            },
        }
    }

    fn next_fire(&self, id: i64) -> Result<()> {
        let task = self.task(id)?;
        if !task.enabled {
            print_warning(&format!("Task {} is disabled", id));
            return Ok(());
        }
        self.scheduler.add_task(&task)?;
        let next = self.scheduler.next_fire_time(id);
        self.scheduler.remove_task(id);
        match next {
            Some(at) => print_key_value("Next fire", &at.to_rfc3339()),
            None => print_warning("Schedule has no upcoming occurrence"),
        }
        Ok(())
    }

    fn sweep(&self) -> Result<()> {
        let result = self.runtime.block_on(self.sweeper.sweep(SweepTrigger::Manual));
        print_section_header("Cleanup");
        print_key_value_colored("Cleaned", &result.success.to_string(), status_color("success"));
        print_key_value_colored("Failed", &result.failed.to_string(), status_color("failed"));
        print_key_value("Skipped", &result.skipped.to_string());
        for message in &result.errors {
            print_warning(message);
        }
        print_section_footer();
        Ok(())
    }

    fn reconcile(&self) -> Result<()> {
        let pass = ReconciliationPass::new(self.store.clone());
        let recent = pass.recent_running_records(Utc::now())?;
        if !recent.is_empty() {
            let ids: Vec<String> = recent.iter().map(|r| r.id.to_string()).collect();
            bail!(
                "Records {} started less than an hour ago and may belong to a running server. \
                 Stop the server before reconciling.",
                ids.join(", ")
            );
        }
        let stats = pass.run()?;
        print_success(&format!(
            "Reconciled {} records ({} updated, {} failed)",
            stats.processed(),
            stats.updated,
            stats.failed
        ));
        Ok(())
    }

    fn list_settings(&self) -> Result<()> {
        print_section_header("Settings");
        for entry in self.settings.store().list_settings()? {
            print_key_value(&entry.key, &entry.value);
        }
        print_section_footer();
        Ok(())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_setting(key, value, None)?;
        print_success(&format!("{} = {}", key, value));
        Ok(())
    }

    fn test_webhook(&self) -> Result<()> {
        self.runtime.block_on(self.webhook.send_test())?;
        print_success("Webhook test sent");
        Ok(())
    }
}

fn print_server_sync_note() {
    print_warning(&format!(
        "A running server applies task changes within its schedule sync interval ({}s by default)",
        DEFAULT_SCHEDULE_SYNC_SECS
    ));
}

fn execute_command(line: String, shell: &Shell, db_path: &str) -> CommandExecutionResult {
    if line.is_empty() {
        return CommandExecutionResult::Ok;
    }

    let args =
        shlex::split(&line).unwrap_or_else(|| line.split_whitespace().map(String::from).collect());

    let cli = InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

    let cli = match cli {
        Ok(cli) => cli,
        Err(e) => {
            if e.print().is_err() {
                println!("{}", e);
            }
            return CommandExecutionResult::Ok;
        }
    };

    print_command_echo(&line);
    let result = match cli.command {
        InnerCommand::AddTask {
            name,
            kind,
            source,
            schedule,
            disabled,
        } => shell.add_task(name, &kind, source, schedule, disabled),
        InnerCommand::UpdateTask {
            id,
            name,
            source,
            schedule,
        } => shell.update_task(id, name, source, schedule),
        InnerCommand::Enable { id } => shell.set_enabled(id, true),
        InnerCommand::Disable { id } => shell.set_enabled(id, false),
        InnerCommand::DeleteTask { id } => shell.delete_task(id),
        InnerCommand::Tasks => shell.list_tasks(),
        InnerCommand::ShowTask { id } => shell.show_task(id),
        InnerCommand::Records { task, limit, json } => shell.list_records(task, limit, json),
        InnerCommand::Run { id } => shell.run(id),
        InnerCommand::NextFire { id } => shell.next_fire(id),
        InnerCommand::Sweep => shell.sweep(),
        InnerCommand::Reconcile => shell.reconcile(),
        InnerCommand::Settings => shell.list_settings(),
        InnerCommand::Set { key, value } => shell.set(&key, &value),
        InnerCommand::TestWebhook => shell.test_webhook(),
        InnerCommand::Where => {
            println!("{}", db_path);
            Ok(())
        }
        InnerCommand::Exit => return CommandExecutionResult::Exit,
    };

    match result {
        Ok(()) => CommandExecutionResult::Ok,
        Err(e) => CommandExecutionResult::Error(format!("{:#}", e)),
    }
}

#[derive(rustyline_derive::Hinter)]
struct ShellHelper {
    commands_names: Vec<String>,
}

impl ShellHelper {
    pub fn new() -> Self {
        let commands_names: Vec<String> = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();

        ShellHelper { commands_names }
    }
}

impl Completer for ShellHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(' ') {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .cloned()
            .collect::<Vec<_>>();

        Ok((0, matches))
    }
}

impl Highlighter for ShellHelper {}
impl Validator for ShellHelper {}
impl Helper for ShellHelper {}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(
        &CliConfig {
            db_path: cli_args.db_path,
            ..Default::default()
        },
        file_config,
    )?;
    let db_path = config.db_path.display().to_string();
    let shell = Shell::new(&config)?;

    print_welcome(&db_path);

    let editor_config = Config::builder()
        .completion_type(CompletionType::List)
        .build();

    let mut rl = Editor::<ShellHelper, FileHistory>::with_config(editor_config)?;
    rl.set_helper(Some(ShellHelper::new()));

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim().to_string();
                let _ = rl.add_history_entry(&line);
                match execute_command(line, &shell, &db_path) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => break,
                    CommandExecutionResult::Error(err) => print_error(&err),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("CTRL-D: exiting.");
                break;
            }
            Err(e) => {
                print_error(&format!("{:?}", e));
                break;
            }
        }
    }
    print_goodbye();
    Ok(())
}

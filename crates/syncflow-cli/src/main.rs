mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use syncflow_core::app::{SyncService, SyncServiceBuilder, SyncSettings};
use syncflow_core::domain::{DateContext, FlowStatus, Params, Row, RunStatus, Schedule, TaskSelection};
use syncflow_core::impls::{JsonFileStorage, TushareClient, TushareConfig};
use syncflow_core::ports::{ApiError, DataApi, PageRequest};
use syncflow_core::sync::{CancelSignal, FlowCancel};

#[derive(Parser)]
#[command(name = "syncflow", version, about = "Incremental market data sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON). Falls back to $SYNCFLOW_CONFIG, then built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the synced tables
    #[arg(long, default_value = "data", global = true)]
    data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage task definitions
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
    /// Run one task by itself
    Run {
        task_id: String,
        #[command(flatten)]
        dates: DateArgs,
    },
    /// Run a set of tasks in dependency order
    Flow {
        /// Comma separated task ids (default: every enabled task)
        #[arg(long, value_delimiter = ',', conflicts_with = "schedule")]
        tasks: Vec<String>,
        /// Only enabled tasks with this schedule (daily, weekly, monthly, manual)
        #[arg(long)]
        schedule: Option<String>,
        #[command(flatten)]
        dates: DateArgs,
    },
    /// Show the checkpoint and last run of a task
    Status { task_id: String },
    /// Show recent runs of a task, newest first
    History {
        task_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TasksCommand {
    List,
    /// Import a JSON array of task configs
    Import { file: PathBuf },
    Delete { task_id: String },
}

#[derive(Args)]
struct DateArgs {
    /// Single date, YYYYMMDD
    #[arg(long, conflicts_with_all = ["start", "end"])]
    date: Option<String>,
    /// Range start, YYYYMMDD
    #[arg(long)]
    start: Option<String>,
    /// Range end, YYYYMMDD (defaults to --start)
    #[arg(long, requires = "start")]
    end: Option<String>,
}

impl DateArgs {
    fn context(&self) -> Result<DateContext> {
        Ok(DateContext::from_args(
            self.date.as_deref(),
            self.start.as_deref(),
            self.end.as_deref(),
        )?)
    }
}

/// Stands in for the data API when no token is configured.
struct NoDataApi;

#[async_trait]
impl DataApi for NoDataApi {
    async fn call(&self, endpoint: &str, _params: &Params, _page: Option<PageRequest>) -> Result<Vec<Row>, ApiError> {
        Err(ApiError::Rejected(format!("{endpoint}: TUSHARE_TOKEN is not set")))
    }
}

fn load_settings(path: Option<PathBuf>) -> Result<SyncSettings> {
    let path = path.or_else(|| std::env::var_os("SYNCFLOW_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => Ok(SyncSettings::load(&path)?),
        None => Ok(SyncSettings::default()),
    }
}

fn data_api(settings: &SyncSettings, required: bool) -> Result<Arc<dyn DataApi>> {
    let Ok(token) = std::env::var("TUSHARE_TOKEN") else {
        if required {
            bail!("TUSHARE_TOKEN is not set");
        }
        return Ok(Arc::new(NoDataApi));
    };
    let mut config = TushareConfig::new(token);
    if let Ok(url) = std::env::var("TUSHARE_URL") {
        config.url = url;
    }
    config.timeout = settings.api_timeout();
    Ok(Arc::new(TushareClient::new(config)?))
}

async fn build_service(cli: &Cli, needs_api: bool) -> Result<SyncService> {
    let settings = load_settings(cli.config.clone())?;
    let storage = JsonFileStorage::open(&cli.data_dir)
        .await
        .with_context(|| format!("opening data dir {}", cli.data_dir.display()))?;
    let api = data_api(&settings, needs_api)?;
    let service = SyncServiceBuilder::new()
        .storage(Arc::new(storage))
        .data_api(api)
        .settings(settings)
        .build()
        .await?;
    Ok(service)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel on Ctrl-C; in-flight pages finish first.
fn cancel_on_ctrl_c() -> CancelSignal {
    let (cancel, signal) = FlowCancel::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing in-flight work");
            cancel.cancel();
        }
    });
    signal
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let needs_api = matches!(cli.command, Commands::Run { .. } | Commands::Flow { .. });
    let service = build_service(&cli, needs_api).await?;

    match &cli.command {
        Commands::Tasks { command } => match command {
            TasksCommand::List => print_json(&service.list_tasks().await?),
            TasksCommand::Import { file } => {
                let count = service.import_tasks(file).await?;
                print_json(&serde_json::json!({ "imported": count }))
            }
            TasksCommand::Delete { task_id } => print_json(&service.delete_task(task_id).await?),
        },
        Commands::Run { task_id, dates } => {
            let log = service
                .run_task_with_cancel(task_id, dates.context()?, cancel_on_ctrl_c())
                .await?;
            print_json(&log)?;
            if log.status == RunStatus::Failed {
                bail!("task {task_id} failed");
            }
            Ok(())
        }
        Commands::Flow { tasks, schedule, dates } => {
            let selection = if !tasks.is_empty() {
                TaskSelection::Ids(tasks.clone())
            } else if let Some(s) = schedule {
                let schedule = Schedule::parse(s).with_context(|| format!("unknown schedule '{s}'"))?;
                TaskSelection::Schedule(schedule)
            } else {
                TaskSelection::All
            };
            let run = service
                .run_flow_with_cancel(selection, dates.context()?, cancel_on_ctrl_c())
                .await?;
            print_json(&run)?;
            match run.status {
                FlowStatus::Completed | FlowStatus::Empty => Ok(()),
                status => bail!("flow finished as {status:?}"),
            }
        }
        Commands::Status { task_id } => print_json(&service.get_task_status(task_id).await?),
        Commands::History { task_id, limit } => print_json(&service.get_run_history(task_id, *limit).await?),
    }
}

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use operations_queue::config::{AppConfig, CliConfig, FileConfig};
use operations_queue::dispatcher::{wait_for_signal, Dispatcher, ShutdownCoordinator};
use operations_queue::handlers::{CommandHandler, HandlerRegistry};
use operations_queue::job_queue::{AuthMethod, JobPayload, JobQueue, NewJob, OperationType};
use operations_queue::metrics;
use operations_queue::operation_store::{NewOperation, OperationStore};
use operations_queue::{JobQueueStore, SqliteJobQueueStore, SqliteOperationStore, StatusTracker};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(name = "operations-queue")]
#[command(about = "Durable background-job dispatcher for account operations")]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI.
    #[clap(long, env = "QUEUE_CONFIG", value_parser = parse_path, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding queue.db and operations.db.
    #[clap(long, env = "QUEUE_DB_DIR", value_parser = parse_path, global = true)]
    pub db_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, env = "QUEUE_METRICS_PORT", default_value_t = 9092, global = true)]
    pub metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pools until SIGINT or SIGTERM.
    Run,

    /// Enqueue one job, creating its operation record if needed.
    Enqueue {
        /// Operation type: unfollowNonFollowers, unfollowEveryone or detectUnfollowers.
        #[clap(long = "type")]
        operation_type: String,

        #[clap(long)]
        operation_id: String,

        #[clap(long)]
        user_id: String,

        /// session or api.
        #[clap(long)]
        auth_method: String,

        /// Handler configuration as JSON.
        #[clap(long, default_value = "{}")]
        config: String,

        /// Lower values run first.
        #[clap(long)]
        priority: Option<i32>,
    },

    /// Print job counts by status, or a single job, as JSON.
    Status {
        #[clap(long)]
        job_id: Option<i64>,
    },
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
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        metrics_port: cli_args.metrics_port,
    };
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    match cli_args.command {
        Command::Run => run(app_config).await,
        Command::Enqueue {
            operation_type,
            operation_id,
            user_id,
            auth_method,
            config,
            priority,
        } => {
            let operation_type = OperationType::from_str(&operation_type)
                .ok_or_else(|| anyhow!("Unknown operation type: {}", operation_type))?;
            let auth_method = AuthMethod::from_str(&auth_method)
                .ok_or_else(|| anyhow!("Unknown auth method: {}", auth_method))?;
            let config = serde_json::from_str(&config).context("--config is not valid JSON")?;
            if operation_id.trim().is_empty() {
                bail!("--operation-id must not be empty");
            }

            let mut job = NewJob::new(
                operation_type,
                JobPayload {
                    operation_id,
                    user_id,
                    auth_method,
                    config,
                },
            );
            if let Some(priority) = priority {
                job = job.with_priority(priority);
            }
            enqueue(&app_config, job)
        }
        Command::Status { job_id } => status(&app_config, job_id),
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!("Opening queue database at {:?}...", config.queue_db_path());
    let store = Arc::new(SqliteJobQueueStore::new(config.queue_db_path())?);
    info!(
        "Opening operations database at {:?}...",
        config.operations_db_path()
    );
    let operations = Arc::new(SqliteOperationStore::new(config.operations_db_path())?);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let mut registry = HandlerRegistry::new();
    for handler in &config.handlers {
        info!(
            "Registering {} ({}) handler: {}",
            handler.operation_type, handler.auth_method, handler.command.program
        );
        registry.register(
            handler.operation_type,
            handler.auth_method,
            Arc::new(CommandHandler::new(handler.command.clone())),
        );
    }
    if registry.is_empty() {
        bail!("No handlers configured, add [[handlers]] entries to the config file");
    }

    let tracker = StatusTracker::spawn(operations);
    let queue = JobQueue::new(store.clone(), config.queue.max_attempts);
    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::start(
        &queue,
        Arc::new(registry),
        tracker.clone(),
        &config.queue,
        &config.workers,
        shutdown.clone(),
    );

    if config.metrics_port > 0 {
        let metrics_shutdown = shutdown.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::run_metrics_server(port, metrics_shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    wait_for_signal().await?;

    let report = ShutdownCoordinator::new(config.queue.shutdown_grace)
        .shutdown(dispatcher, &tracker, store.as_ref())
        .await;
    if !report.drained {
        info!(
            "{} job(s) were interrupted and will be recovered on next start",
            report.abandoned_workers
        );
    }
    Ok(())
}

fn enqueue(config: &AppConfig, job: NewJob) -> Result<()> {
    let operations = SqliteOperationStore::new(config.operations_db_path())?;
    let created = operations.create_operation(&NewOperation {
        id: job.payload.operation_id.clone(),
        user_id: job.payload.user_id.clone(),
        operation_type: job.operation_type.as_str().to_string(),
    })?;
    if !created {
        info!(
            "Operation {} already exists, reusing it",
            job.payload.operation_id
        );
    }

    let store = Arc::new(SqliteJobQueueStore::new(config.queue_db_path())?);
    let queue = JobQueue::new(store, config.queue.max_attempts);
    let id = queue.enqueue(job)?;
    println!("{}", id);
    Ok(())
}

fn status(config: &AppConfig, job_id: Option<i64>) -> Result<()> {
    let store = SqliteJobQueueStore::new(config.queue_db_path())?;
    let output = match job_id {
        Some(id) => {
            let job = store
                .get_job(id)?
                .ok_or_else(|| anyhow!("Job {} not found", id))?;
            serde_json::to_string_pretty(&job)?
        }
        None => {
            let counts = store.count_by_status(None)?;
            serde_json::to_string_pretty(&counts)?
        }
    };
    println!("{}", output);
    Ok(())
}

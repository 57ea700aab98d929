//! cronlet - a CronJob reconciliation controller.
//!
//! Usage:
//!   cronlet run <manifests-dir>       Run the controller with CronJobs from the directory
//!   cronlet validate <manifests-dir>  Validate CronJob manifests without running
//!   cronlet next <manifests-dir>      Print upcoming firings for each CronJob

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use cronlet::api::{ApiConfig, create_api_state, start_server};
use cronlet::store::apply_cronjob;
use cronlet::{
    Controller, ControllerConfig, CronJob, Event, EventBus, EventHandler, InMemoryStore,
    ObjectStore, SqliteStore, StoreConfig, YamlLoader, load_cronjobs_from_directory,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// cronlet - a CronJob reconciliation controller
#[derive(Parser)]
#[command(name = "cronlet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller with CronJobs from a directory
    Run {
        /// Path to the directory containing CronJob manifests
        #[arg(value_name = "MANIFESTS_DIR")]
        manifests_dir: PathBuf,

        /// Controller configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum concurrent reconcile passes
        #[arg(short, long)]
        workers: Option<usize>,

        /// API server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not start the HTTP API
        #[arg(long)]
        no_api: bool,
    },

    /// Validate CronJob manifests without running
    Validate {
        /// Path to the directory containing CronJob manifests
        #[arg(value_name = "MANIFESTS_DIR")]
        manifests_dir: PathBuf,
    },

    /// Print upcoming firings for each CronJob
    Next {
        /// Path to the directory containing CronJob manifests
        #[arg(value_name = "MANIFESTS_DIR")]
        manifests_dir: PathBuf,

        /// Number of firings to print per CronJob
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

/// Event handler that logs controller decisions.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobCreated {
                cronjob,
                job,
                scheduled_at,
                ..
            } => {
                info!(cronjob = %cronjob, job = %job, scheduled_at = %scheduled_at, "event: job created");
            }
            Event::JobDeleted {
                cronjob,
                job,
                reason,
                ..
            } => {
                info!(cronjob = %cronjob, job = %job, reason = %reason, "event: job deleted");
            }
            Event::RunSkipped {
                cronjob,
                scheduled_at,
                reason,
                ..
            } => {
                info!(cronjob = %cronjob, scheduled_at = ?scheduled_at, reason = %reason, "event: run skipped");
            }
            Event::ScheduleRejected { cronjob, error, .. } => {
                error!(cronjob = %cronjob, error = %error, "event: schedule rejected");
            }
            Event::ReconcileFailed {
                cronjob,
                error,
                attempt,
                retry_in,
                ..
            } => {
                warn!(
                    cronjob = %cronjob,
                    error = %error,
                    attempt,
                    retry_in = ?retry_in,
                    "event: reconcile failed"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Run {
            manifests_dir,
            config,
            workers,
            port,
            no_api,
        } => {
            let mut config = match config {
                Some(path) => YamlLoader::load_controller_config(path)?,
                None => ControllerConfig::default(),
            };
            if let Some(workers) = workers {
                config.workers = workers.max(1);
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            if no_api {
                config.api.enabled = false;
            }
            run_controller(manifests_dir, config).await?;
        }
        Commands::Validate { manifests_dir } => {
            validate_manifests(manifests_dir)?;
        }
        Commands::Next {
            manifests_dir,
            count,
        } => {
            print_next_firings(manifests_dir, count)?;
        }
    }

    Ok(())
}

/// Run the controller with CronJobs from a directory.
async fn run_controller(
    manifests_dir: PathBuf,
    config: ControllerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading CronJobs from: {}", manifests_dir.display());
    let cronjobs = load_cronjobs_from_directory(&manifests_dir)?;

    if cronjobs.is_empty() {
        warn!("No CronJob manifests found in {}", manifests_dir.display());
    }

    match &config.store {
        StoreConfig::Memory => {
            info!("Using in-memory store");
            run_with_store(Arc::new(InMemoryStore::new()), &config, cronjobs).await
        }
        StoreConfig::Sqlite { path } => {
            info!("Using SQLite store at {}", path);
            let store = Arc::new(SqliteStore::new(path).await?);
            let result = run_with_store(Arc::clone(&store), &config, cronjobs).await;
            store.close().await;
            result
        }
    }
}

async fn run_with_store<S: ObjectStore + 'static>(
    store: Arc<S>,
    config: &ControllerConfig,
    cronjobs: Vec<CronJob>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Applying {} CronJob(s):", cronjobs.len());
    for cronjob in cronjobs {
        let applied = apply_cronjob(store.as_ref(), cronjob).await?;
        info!(
            "  - {} ({})",
            applied.key(),
            applied.spec.schedule.expression()
        );
    }

    // Create event bus with logging handler
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let controller = Controller::with_store(Arc::clone(&store))
        .with_event_bus(event_bus)
        .with_workers(config.workers)
        .with_pass_timeout(config.pass_timeout())
        .with_shutdown_timeout(config.shutdown_timeout())
        .with_backoff(config.backoff_policy());

    info!("Starting controller ({} worker(s))...", config.workers);
    info!("Press Ctrl+C to stop");

    let (handle, controller_task) = controller.start().await;

    let api_task = if config.api.enabled {
        let api_config = ApiConfig::new(config.api.host.clone(), config.api.port);
        let state = create_api_state(handle.clone(), Arc::clone(&store));
        Some(start_server(api_config, state).await?)
    } else {
        None
    };

    // Wait for Ctrl+C
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = controller_task => {
            info!("Controller stopped");
        }
    }

    if let Some(api_task) = api_task {
        api_task.abort();
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate CronJob manifests without running.
fn validate_manifests(manifests_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating CronJobs in: {}", manifests_dir.display());

    match load_cronjobs_from_directory(&manifests_dir) {
        Ok(cronjobs) => {
            info!("All {} CronJob(s) are valid:", cronjobs.len());
            for cronjob in &cronjobs {
                info!(
                    "  - {} ({}): OK",
                    cronjob.key(),
                    cronjob.spec.schedule.expression()
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print upcoming firings for each CronJob.
fn print_next_firings(
    manifests_dir: PathBuf,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let cronjobs = load_cronjobs_from_directory(&manifests_dir)?;

    if cronjobs.is_empty() {
        println!("No CronJobs found in {}", manifests_dir.display());
        return Ok(());
    }

    let now = Utc::now();
    for cronjob in &cronjobs {
        let schedule = cronjob.schedule()?;
        println!("{}", cronjob.key());
        println!(
            "  Schedule: {} ({})",
            schedule.expression(),
            schedule.timezone()
        );
        if cronjob.spec.suspend {
            println!("  Suspended");
        }
        for firing in schedule.upcoming(now, count)? {
            println!("    {}", firing.to_rfc3339());
        }
        println!();
    }

    Ok(())
}

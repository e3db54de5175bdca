//! tagsync-backfill - local dataset migration runner
//!
//! Loads the dataset from the Local Store, applies every pending migration
//! (including the metadata backfill against the external API) and exits.
//! A paused backfill is resumed by the next invocation.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tagsync_backfill::config::resolve_runtime_config;
use tagsync_backfill::db::{init_database_pool, SqliteStore, DATABASE_FILE};
use tagsync_backfill::services::HttpMetadataFetcher;
use tagsync_backfill::{LocalStore, MigrationOrchestrator, RequestCoordinator};
use tagsync_common::config::{load_toml_config, resolve_root_folder, LoggingConfig};
use tagsync_common::events::EventBus;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Apply pending migrations to the local tag dataset
#[derive(Debug, Parser)]
#[command(name = "tagsync-backfill", version, about)]
struct Cli {
    /// Folder holding the local database (overrides TAGSYNC_ROOT_FOLDER and TOML)
    #[arg(long, value_name = "PATH")]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: platform config dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Version stamp recorded in the migration state
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    app_version: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = load_toml_config(cli.config.as_deref())?;
    init_tracing(&toml_config.logging)?;

    info!("Starting tagsync-backfill");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder and open the Local Store
    let root_folder = resolve_root_folder(cli.root_folder.as_deref(), &toml_config);
    let db_path = root_folder.join(DATABASE_FILE);
    info!("Database: {}", db_path.display());

    let db_pool = init_database_pool(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::new(db_pool));
    info!("Database connection established");

    // Step 2: Runtime configuration and API client
    let runtime = resolve_runtime_config(&toml_config);
    let coordinator = RequestCoordinator::new("metadata-api", runtime.coordinator.clone());
    let fetcher = HttpMetadataFetcher::new(
        coordinator.clone(),
        runtime.api_base_url.clone(),
        runtime.api_token.clone(),
    )?;
    info!(base_url = %runtime.api_base_url, "Metadata API client initialized");

    // Step 3: Event bus with a logging subscriber
    let event_bus = EventBus::new(100);
    spawn_event_logger(&event_bus);

    // Step 4: Run migrations
    let orchestrator = MigrationOrchestrator::new(
        store,
        Arc::new(fetcher),
        event_bus,
        runtime.backfill,
        cli.app_version,
    );

    let mut dataset = orchestrator.load_dataset().await?;
    info!(records = dataset.len(), "Dataset loaded");

    let changed = orchestrator.run_migrations(&mut dataset).await?;

    let stats = coordinator.stats().await;
    info!(
        changed,
        records = dataset.len(),
        api_requests_last_minute = stats.requests_last_minute,
        api_failures_last_minute = stats.failures_last_minute,
        circuit_open = stats.circuit_open,
        "Migration run complete"
    );

    Ok(())
}

/// RUST_LOG wins; otherwise the TOML `[logging] level`
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("Invalid log level: {}", logging.level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

fn spawn_event_logger(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(event_type = event.event_type(), payload = %json, "Event"),
                    Err(e) => warn!(event_type = event.event_type(), error = %e, "Unserializable event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

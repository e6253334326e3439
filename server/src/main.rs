//! Momenty access server
//!
//! Serves access checks for the members' area, consumes purchase events from
//! the shop and sends welcome and expiry reminder emails.
//!
//! Usage:
//!   momenty-server --port 8080 --config access.toml --database access.db
//!
//! Without `--database` all state lives in memory and is lost on exit.

use std::{path::PathBuf, sync::Arc, time::Duration};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use momenty_access::{AccessConfig, AccessService, ConfigHandle, LogMailer};
use momenty_server::build_router;
use momenty_storage::{AccessStore, MemoryStore, SqliteStore};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "momenty-server")]
#[command(about = "Momenty access token and entitlement server")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Path to the TOML access configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database (in-memory if omitted)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Seconds between reminder sweeps, 0 to disable
    #[arg(long, default_value = "3600")]
    sweep_interval_secs: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Momenty access server starting...");
    let config = match &args.config {
        Some(path) => AccessConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            warn!("No --config given, using defaults (no product grants access)");
            AccessConfig::default()
        }
    };
    if config.allowed_products.is_empty() {
        warn!("allowed_products is empty, every purchase will be ignored");
    }

    let store: Arc<dyn AccessStore> = match &args.database {
        Some(path) => {
            info!("Opening database at {:?}", path);
            Arc::new(SqliteStore::open(path).context("Failed to open database")?)
        }
        None => {
            warn!("No --database given, state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let service = Arc::new(AccessService::new(
        store,
        ConfigHandle::new(config).context("Invalid configuration")?,
        Arc::new(LogMailer),
    ));

    if args.sweep_interval_secs > 0 {
        spawn_sweeper(Arc::clone(&service), Duration::from_secs(args.sweep_interval_secs));
    } else {
        info!("Periodic reminder sweep disabled");
    }

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", args.port))?;
    info!("HTTP API listening on port {}", args.port);

    axum::serve(listener, build_router(service))
        .await
        .context("HTTP server failed")
}

fn spawn_sweeper(service: Arc<AccessService>, every: Duration) {
    info!("Reminder sweep every {}s", every.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = service.run_sweep(Utc::now()).await {
                error!("Reminder sweep failed: {e}");
            }
        }
    });
}

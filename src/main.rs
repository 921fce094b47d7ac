//! access-engine server.
//!
//! Loads the TOML config, restores the snapshot, starts the payment monitor
//! and the price refresher, then serves HTTP until SIGINT/SIGTERM. On the way
//! out every background task is stopped before the snapshot is written.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use access_engine::clock::SystemClock;
use access_engine::config::loader::{load_config, parse_config};
use access_engine::config::schema::AdminConfig;
use access_engine::engine::{connect_ledger, Engine};
use access_engine::lifecycle::{wait_for_signal, Shutdown};
use access_engine::observability::{logging, metrics};
use access_engine::pricing::HttpRateSource;
use access_engine::storage::SnapshotStore;
use access_engine::HttpServer;

#[derive(Parser)]
#[command(name = "access-engine")]
#[command(about = "Content access and payment settlement engine", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => parse_config("")?,
    };

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init(level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "access-engine starting"
    );

    if config.admin.api_key == AdminConfig::default().api_key {
        tracing::warn!("Admin API key is the built-in placeholder; set admin.api_key");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let ledger = connect_ledger(&config.blockchain).await;
    let rate_source = Arc::new(HttpRateSource::new(&config.pricing)?);
    let (engine, monitor) = Engine::build(&config, Arc::new(SystemClock), ledger, rate_source)?;
    let engine = Arc::new(engine);

    let store = config.persistence.snapshot_path.as_ref().map(SnapshotStore::new);
    if let Some(store) = &store {
        if let Some(snapshot) = store.load()? {
            engine.restore(snapshot);
        }
    }

    let shutdown = Shutdown::new();
    let monitor_task = tokio::spawn(monitor.run(shutdown.subscribe()));
    let refresher_task = engine.prices.spawn_refresher(shutdown.subscribe());

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = HttpServer::new(engine.clone(), &config);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    server.run(listener, shutdown.clone()).await?;

    // The server can also stop on its own; make sure every task hears it.
    shutdown.trigger();
    for (name, task) in [("payment monitor", monitor_task), ("price refresher", refresher_task)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "Background task failed");
        }
    }

    if let Some(store) = &store {
        if let Err(e) = store.save(&engine.snapshot()) {
            tracing::error!(path = %store.path().display(), error = %e, "Failed to save snapshot");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

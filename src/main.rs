//! Stellar bridge daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌────────────────────────────────────────────────────┐
//!                        │                   STELLAR BRIDGE                    │
//!                        │                                                     │
//!   ledger events        │  ┌──────────┐   ┌───────────┐   ┌───────────────┐  │
//!   (NDJSON on stdin) ───┼─▶│  events  │──▶│  service  │──▶│    engine     │──┼──▶ horizon
//!                        │  │   feed   │   │ (workers) │   │ (submission)  │  │
//!                        │  └──────────┘   └───────────┘   └───────┬───────┘  │
//!                        │                                  linker │ builder  │
//!                        │                                         ▼          │
//!   lifecycle events     │  ┌──────────┐   ┌───────────┐   ┌───────────────┐  │
//!   (stdout, logs) ◀─────┼──│publisher │◀──│ reconcile │◀──│     store     │  │
//!                        │  └──────────┘   └───────────┘   └───────────────┘  │
//!                        │                                                     │
//!                        │  config (versioned, hot reload) · observability     │
//!                        │  resilience (timeouts, retries) · lifecycle         │
//!                        └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;

use stellar_bridge::builder::TransactionBuilder;
use stellar_bridge::config::loader::load_settings;
use stellar_bridge::config::watcher::{apply_reloads, SettingsWatcher};
use stellar_bridge::config::BridgeSettings;
use stellar_bridge::events::{BroadcastPublisher, EventPublisher, NdjsonFeed};
use stellar_bridge::lifecycle::signals::spawn_signal_handler;
use stellar_bridge::lifecycle::Bridge;
use stellar_bridge::linker::DerivedAccountProvisioner;
use stellar_bridge::network::{HorizonClient, NetworkClient, ScriptedNetwork};
use stellar_bridge::observability::logging::init_logging;
use stellar_bridge::observability::metrics::init_metrics;
use stellar_bridge::store::{BridgeStore, JsonFileStore, MemoryStore};

/// Time in-flight submissions get to finish after shutdown starts.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "stellar-bridge")]
#[command(about = "Mirror internal ledger payments onto a Stellar network", long_about = None)]
struct Cli {
    /// Settings file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use an in-memory network instead of horizon.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings(path)?,
        None => BridgeSettings::default(),
    };

    init_logging(&settings.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), dry_run = cli.dry_run, "stellar-bridge starting");

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store: Arc<dyn BridgeStore> = match &settings.store.path {
        Some(path) => Arc::new(JsonFileStore::open(path)?),
        None => {
            tracing::warn!("No store path configured, state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let publisher = Arc::new(BroadcastPublisher::new(256));
    let mut lifecycle = publisher.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(error = %e, "Failed to encode lifecycle event"),
            }
        }
    });
    let publisher: Arc<dyn EventPublisher> = publisher;

    let config = Bridge::open_config(&settings, store.clone(), publisher.clone())?;

    let network: Arc<dyn NetworkClient> = if cli.dry_run {
        Arc::new(ScriptedNetwork::with_default_sequence(0))
    } else {
        Arc::new(HorizonClient::new(config.clone(), &settings.network)?)
    };

    let bridge = Bridge::assemble(
        &settings,
        store,
        config.clone(),
        network,
        publisher,
        Arc::new(TransactionBuilder::from_env()),
        Arc::new(DerivedAccountProvisioner),
    );

    // The watcher must stay alive for reloads to arrive.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = SettingsWatcher::new(path);
            tokio::spawn(apply_reloads(config.clone(), updates));
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::error!(error = %e, "Settings watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel(settings.service.event_queue_capacity.max(1));
    let feed = NdjsonFeed::new(BufReader::new(tokio::io::stdin()));
    let feed_shutdown = bridge.shutdown.subscribe();
    tokio::spawn(async move {
        let stats = feed.run(events_tx, feed_shutdown).await;
        tracing::info!(forwarded = stats.forwarded, malformed = stats.malformed, "Ledger feed finished");
    });

    spawn_signal_handler(bridge.shutdown.clone());

    let handle = bridge.start(events_rx).await?;
    tracing::info!(
        verified = handle.recovery.verified,
        resumed = handle.recovery.resumed,
        "Bridge running"
    );

    if !handle.finish(DRAIN_DEADLINE).await {
        tracing::warn!("Shutdown deadline passed with work in flight");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

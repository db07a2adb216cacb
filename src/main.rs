//! pingtrail - host reachability monitor
//!
//! Pings a single host, keeps a debounced history of UP/DOWN intervals and
//! serves it as a web page.

mod config;
mod history;
mod monitor;
mod persist;
mod probe;
mod web;

use clap::Parser;
use config::Config;
use history::HistoryStore;
use monitor::Monitor;
use persist::Exporter;
use probe::Pinger;
use web::Server;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = Config::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(cfg.log_directive().parse()?))
        .init();

    let store = Arc::new(HistoryStore::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if let Some(input) = &cfg.input {
        if let Err(e) = persist::restore(&store, input) {
            tracing::error!("Couldn't restore history from {}: {}", input.display(), e);
        }
    }

    if let Some(output) = &cfg.output {
        let exporter = Exporter::new(store.clone(), output, cfg.export_cadence());
        if let Err(e) = exporter.start(shutdown_tx.subscribe()) {
            tracing::error!("Couldn't export history to {}: {}", output.display(), e);
        }
    }

    tracing::debug!("Starting ping monitor for {}", cfg.host);
    let pinger = Pinger::new(&cfg.host, cfg.pinger_config()).await?;

    let (sample_tx, sample_rx) = mpsc::channel(64);
    Monitor::new(store.clone(), cfg.monitor_config()).start(sample_rx, shutdown_tx.subscribe());

    let prober_stop = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let host = pinger.host().to_string();
        if let Err(e) = pinger.run(sample_tx, prober_stop).await {
            tracing::error!("Ping monitor for {} stopped: {}", host, e);
        }
    });

    let server = Server::new(cfg.port, cfg.host.clone(), store);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Couldn't listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
        let _ = shutdown_tx.send(());
    };

    server.start(shutdown).await?;

    Ok(())
}

//! uptrail - website uptime monitoring core
//!
//! Probes sites over HTTP, caches their latest status, and aggregates the
//! check history into uptime summaries and reports.

mod aggregate;
mod cache;
mod config;
mod db;
mod monitor;
mod probe;
mod ratelimit;
mod report;
mod scheduler;
mod web;

use cache::StatusCache;
use config::ServerConfig;
use db::Store;
use monitor::{Monitor, MonitorSettings};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting uptrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let monitor = Arc::new(Monitor::new(
        store,
        StatusCache::in_memory(),
        MonitorSettings::from(&cfg),
    )?);

    let scheduler = Scheduler::new(monitor.clone(), cfg.check_interval(), cfg.sweep_concurrency);
    let sweep = cfg.sweep_enabled.then(|| scheduler.start());
    if sweep.is_none() {
        tracing::info!("Scheduled sweeps disabled");
    }

    let server = Server::new(cfg, monitor);
    server.start(shutdown_signal()).await?;

    scheduler.stop();
    if let Some(handle) = sweep {
        let _ = handle.await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

//! Patchnet kernel - orchestration server for patch discovery
//!
//! Bootstraps the full stack: config, registered-agent registry with JSON
//! persistence, discovery/probe/inventory components behind the scan
//! aggregator, the install dispatcher, and the REST API.

mod aggregator;
mod agents;
mod config;
mod discovery;
mod dispatch;
mod health;
mod http;
mod inventory;
mod models;
mod probe;

use crate::aggregator::ScanAggregator;
use crate::agents::{AgentRegistry, SharedAgentRegistry};
use crate::config::load_config;
use crate::discovery::DiscoveryEngine;
use crate::dispatch::InstallDispatcher;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::inventory::InventoryScanner;
use crate::probe::ProbeClient;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cfg = load_config().await;

    if let Some(dir) = std::path::Path::new(&cfg.agents.data_file).parent() {
        std::fs::create_dir_all(dir)
            .unwrap_or_else(|e| error!("failed to create data dir {}: {e}", dir.display()));
    }

    let registry: SharedAgentRegistry = Arc::new(AgentRegistry::new(
        &cfg.agents.data_file,
        cfg.agents.allow_auto_register,
    ));
    if let Err(e) = registry.load().await {
        error!("failed to load agents: {e}");
    }
    AgentRegistry::spawn_stale_monitor(registry.clone(), cfg.agents.offline_after_minutes);

    let discovery = DiscoveryEngine::new(&cfg.discovery);
    let probe = ProbeClient::from_config(&cfg.probe).context("failed to build probe client")?;
    let inventory =
        InventoryScanner::from_config(&cfg.scanner).context("invalid scanner command")?;
    let aggregator = Arc::new(ScanAggregator::new(
        discovery,
        probe,
        inventory,
        cfg.probe.parallel_scans,
    ));
    let dispatcher = Arc::new(
        InstallDispatcher::from_config(registry.clone(), &cfg.install)
            .context("failed to build install dispatcher")?,
    );

    let app_state = AppState {
        agents: registry,
        aggregator,
        dispatcher,
        health: HealthTracker::new(),
    };

    let app = http::build_router(app_state);
    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("kernel listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await.context("http server failed")?;

    Ok(())
}

//! Patchnet Agent - Multi-OS scan/install agent
//!
//! Runs on every host that should be patch-manageable:
//! - Serves the scan/install HTTP surface the kernel probes for
//! - Registers itself with the kernel and heartbeats its status
//! - Enumerates and installs packages with the platform package manager

mod capabilities;
mod config;
mod ident;
mod installer;
mod reporter;
mod scanner;
mod server;

use crate::config::AgentConfig;
use crate::ident::SystemIdent;
use crate::installer::Installer;
use crate::reporter::{AgentStatus, StatusReporter};
use crate::scanner::PatchScanner;
use crate::server::AgentCtx;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cfg = AgentConfig::from_env();
    let ident = SystemIdent::collect(cfg.agent_id.clone());
    info!(
        "agent {} starting on {} ({} / {})",
        ident.agent_id, ident.hostname, ident.platform, ident.architecture
    );

    let reporter = if cfg.reporting_enabled() {
        let kernel_url = cfg.kernel_url.as_deref().unwrap_or_default();
        let caps = capabilities::detect(ident.platform).await;
        match StatusReporter::new(kernel_url, &cfg.api_key, &ident, caps) {
            Ok(reporter) => Some(reporter),
            Err(e) => {
                error!("kernel callbacks disabled: {e:#}");
                None
            }
        }
    } else {
        info!("no kernel URL/credential configured, running standalone");
        None
    };

    if let Some(reporter) = &reporter {
        // Initial announcement is best-effort; the kernel can still find us
        // by probing, and the re-registration timer retries anyway.
        if let Err(e) = reporter.register(&ident, cfg.port).await {
            warn!("initial registration failed: {e:#}");
        }
        if let Err(e) = reporter.send_status(AgentStatus::Online, "agent started").await {
            warn!("initial status push failed: {e:#}");
        }
    }

    let ctx = Arc::new(AgentCtx {
        scanner: PatchScanner::new(ident.platform, cfg.scan_timeout()),
        installer: Installer::new(ident.platform, cfg.install_timeout()),
        reporter,
        ident,
    });

    spawn_callback_loop(ctx.clone(), &cfg);

    let app = server::build_router(ctx);
    let bind = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("agent listening on http://{bind}");
    axum::serve(listener, app).await.context("http server failed")?;

    Ok(())
}

/// Heartbeat and periodic re-registration toward the kernel.
fn spawn_callback_loop(ctx: Arc<AgentCtx>, cfg: &AgentConfig) {
    if ctx.reporter.is_none() {
        return;
    }
    let heartbeat_secs = cfg.heartbeat_interval_secs;
    let port = cfg.port;

    tokio::spawn(async move {
        let Some(reporter) = ctx.reporter.as_ref() else { return };
        let mut heartbeat = interval(Duration::from_secs(heartbeat_secs));
        let mut re_register = interval(Duration::from_secs(heartbeat_secs * 10));
        // Both timers fire immediately once; the startup path already
        // announced us, so swallow the first ticks.
        heartbeat.tick().await;
        re_register.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = reporter.send_status(AgentStatus::Online, "agent is running").await {
                        warn!("heartbeat failed: {e:#}");
                    }
                }
                _ = re_register.tick() => {
                    if let Err(e) = reporter.register(&ctx.ident, port).await {
                        warn!("re-registration failed: {e:#}");
                    }
                }
            }
        }
    });
}

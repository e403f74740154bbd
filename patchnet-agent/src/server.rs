//! Agent HTTP surface
//!
//! The contract the kernel's probe client depends on:
//! - `GET /health`         liveness + identity summary
//! - `GET /system-info`    full machine descriptor
//! - `GET /scan-patches`   package enumeration (slow; scanner timeout applies)
//! - `POST /install-update` install one application by id or name

use crate::ident::SystemIdent;
use crate::installer::Installer;
use crate::reporter::{AgentStatus, StatusReporter};
use crate::scanner::PatchScanner;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use sysinfo::System;
use tracing::{error, info};

pub struct AgentCtx {
    pub ident: SystemIdent,
    pub scanner: PatchScanner,
    pub installer: Installer,
    pub reporter: Option<StatusReporter>,
}

pub type SharedCtx = Arc<AgentCtx>;

pub fn build_router(ctx: SharedCtx) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/system-info", get(system_info))
        .route("/scan-patches", get(scan_patches))
        .route("/install-update", post(install_update))
        .with_state(ctx)
}

async fn health(State(ctx): State<SharedCtx>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "platform": ctx.ident.platform,
        "hostname": ctx.ident.hostname,
        "timestamp": Utc::now(),
    }))
}

async fn system_info(State(ctx): State<SharedCtx>) -> Json<Value> {
    let sys = System::new_all();
    Json(json!({
        "hostname": ctx.ident.hostname,
        "platform": ctx.ident.platform,
        "osType": ctx.ident.os_type,
        "ipAddress": ctx.ident.ip_address,
        "macAddress": ctx.ident.mac_address,
        "architecture": ctx.ident.architecture,
        "memoryMb": sys.total_memory() / (1024 * 1024),
        "cpuCount": sys.cpus().len(),
        "uptimeSeconds": System::uptime(),
    }))
}

async fn scan_patches(State(ctx): State<SharedCtx>) -> Json<Value> {
    match ctx.scanner.scan().await {
        Ok(patches) => {
            info!("scan complete: {} applications", patches.len());
            Json(json!({
                "success": true,
                "system": ctx.ident.hostname,
                "patches": patches,
                "scannedAt": Utc::now(),
            }))
        }
        Err(e) => {
            error!("scan failed: {e:#}");
            Json(json!({
                "success": false,
                "error": format!("{e:#}"),
                "patches": [],
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallRequest {
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    app_name: Option<String>,
}

async fn install_update(
    State(ctx): State<SharedCtx>,
    Json(req): Json<InstallRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let Some(app) = req.app_id.or(req.app_name).filter(|a| !a.trim().is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "appId or appName is required".into()));
    };

    // Status pushes are best-effort: an unreachable kernel must not block
    // the install itself.
    if let Some(reporter) = &ctx.reporter {
        if let Err(e) = reporter
            .send_status(AgentStatus::Installing, &format!("installing {app}"))
            .await
        {
            error!("failed to report INSTALLING: {e:#}");
        }
    }

    let result = ctx.installer.install(&app).await;

    if let Some(reporter) = &ctx.reporter {
        let (status, message) = if result.success {
            (AgentStatus::Success, format!("successfully installed {app}"))
        } else {
            (AgentStatus::Failed, format!("failed to install {app}"))
        };
        if let Err(e) = reporter.send_status(status, &message).await {
            error!("failed to report install outcome: {e:#}");
        }
    }

    Ok(Json(json!({ "success": result.success, "result": result })))
}

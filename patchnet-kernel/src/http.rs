//! REST surface of the kernel
//!
//! - Dashboard/CLI routes are guarded by an `x-api-key` header middleware.
//! - Agent callback routes (`/api/agent/...`) authenticate per-agent with a
//!   bearer credential instead, since remote agents never hold the
//!   dashboard key.
//! - `/health` is always open for probes.

use crate::aggregator::ScanAggregator;
use crate::agents::{RegisterRequest, SharedAgentRegistry, StatusError, StatusRequest};
use crate::dispatch::{DispatchError, InstallDispatcher, InstallOutcome};
use crate::health::HealthTracker;
use crate::models::{AggregateReport, Platform};
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub agents: SharedAgentRegistry,
    pub aggregator: Arc<ScanAggregator>,
    pub dispatcher: Arc<InstallDispatcher>,
    pub health: HealthTracker,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentView {
    agent_id: String,
    base_url: String,
    platform: Platform,
    capabilities: Vec<String>,
    state: crate::agents::AgentState,
    last_seen: String,
    last_seen_seconds: i64,
    last_message: Option<String>,
}

fn to_view(agent: &crate::agents::RegisteredAgent) -> AgentView {
    let age = OffsetDateTime::now_utc() - agent.last_seen;
    AgentView {
        agent_id: agent.agent_id.clone(),
        base_url: agent.base_url.clone(),
        platform: agent.platform,
        capabilities: agent.capabilities.clone(),
        state: agent.state,
        last_seen: agent.last_seen.format(&Rfc3339).unwrap_or_default(),
        last_seen_seconds: age.whole_seconds().max(0),
        last_message: agent.last_message.clone(),
    }
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Probes stay open; agent callbacks carry their own per-agent bearer.
    if path.starts_with("/health") || path.starts_with("/api/agent/") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("PATCHNET_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("PATCHNET_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/scan", post(run_scan))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}", get(get_agent))
        .route("/api/agent/register", post(register_agent))
        .route("/api/agent/status", post(agent_status))
        .route("/api/install", post(install))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

async fn get_system_health(State(app): State<AppState>) -> Json<crate::health::KernelHealth> {
    Json(app.health.get_health(&app.agents).await)
}

// POST /api/scan - discover the subnet and scan every host
async fn run_scan(State(app): State<AppState>) -> Json<AggregateReport> {
    Json(app.aggregator.scan_all_systems().await)
}

// GET /api/agents
async fn list_agents(State(app): State<AppState>) -> Json<Vec<AgentView>> {
    let list = app.agents.list().await;
    Json(list.iter().map(to_view).collect())
}

// GET /api/agents/{id}
async fn get_agent(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentView>, StatusCode> {
    match app.agents.get(&id).await {
        Some(agent) => Ok(Json(to_view(&agent))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// POST /api/agent/register
async fn register_agent(
    State(app): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Json<serde_json::Value> {
    app.agents.register(req).await;
    Json(serde_json::json!({ "success": true }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// POST /api/agent/status (Authorization: Bearer <agent api key>)
async fn agent_status(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StatusRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(bearer) = bearer_token(&headers) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match app.agents.handle_status(req, bearer).await {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(StatusError::BadCredential) => Err(StatusCode::UNAUTHORIZED),
        Err(StatusError::UnknownAgent) => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallRequest {
    app_id: String,
    agent_id: String,
}

// POST /api/install
async fn install(
    State(app): State<AppState>,
    Json(req): Json<InstallRequest>,
) -> Result<Json<InstallOutcome>, (StatusCode, String)> {
    match app
        .dispatcher
        .install_remotely(&req.app_id, &req.agent_id)
        .await
    {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e @ DispatchError::AgentNotFound(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e @ DispatchError::MissingEndpoint(_)) => Err((StatusCode::CONFLICT, e.to_string())),
    }
}

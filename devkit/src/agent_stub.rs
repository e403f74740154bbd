//! Stub scan/install agent for kernel tests
//!
//! Serves the agent HTTP surface (`/health`, `/scan-patches`,
//! `/install-update`) on an ephemeral localhost port with configurable
//! behavior: unhealthy, failing scans, slow scans, failing installs.
//! Every request is counted so tests can assert probe short-circuiting.

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
struct Counts {
    health: AtomicUsize,
    scan: AtomicUsize,
    install: AtomicUsize,
}

struct StubConfig {
    healthy: bool,
    scan_success: bool,
    install_success: bool,
    patches: Vec<Value>,
    scan_delay: Option<Duration>,
}

struct StubState {
    cfg: StubConfig,
    counts: Arc<Counts>,
}

/// Builder for a stub agent. Defaults to a healthy agent with an empty
/// patch list and successful installs.
pub struct StubAgentBuilder {
    cfg: StubConfig,
}

impl StubAgentBuilder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            cfg: StubConfig {
                healthy: true,
                scan_success: true,
                install_success: true,
                patches: Vec::new(),
                scan_delay: None,
            },
        }
    }

    pub fn healthy(mut self, healthy: bool) -> Self {
        self.cfg.healthy = healthy;
        self
    }

    pub fn patches(mut self, patches: Vec<Value>) -> Self {
        self.cfg.patches = patches;
        self
    }

    pub fn scan_fails(mut self) -> Self {
        self.cfg.scan_success = false;
        self
    }

    pub fn install_fails(mut self) -> Self {
        self.cfg.install_success = false;
        self
    }

    /// Delay scan responses, e.g. to exercise client-side timeouts.
    pub fn scan_delay(mut self, delay: Duration) -> Self {
        self.cfg.scan_delay = Some(delay);
        self
    }

    /// Bind an ephemeral localhost port and serve until dropped.
    pub async fn spawn(self) -> Result<StubAgent> {
        let counts = Arc::new(Counts::default());
        let state = Arc::new(StubState {
            cfg: self.cfg,
            counts: counts.clone(),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/scan-patches", get(scan_patches))
            .route("/install-update", post(install_update))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(StubAgent {
            addr,
            port: addr.port(),
            counts,
        })
    }
}

/// Handle to a running stub agent.
pub struct StubAgent {
    pub addr: SocketAddr,
    pub port: u16,
    counts: Arc<Counts>,
}

impl StubAgent {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn health_requests(&self) -> usize {
        self.counts.health.load(Ordering::SeqCst)
    }

    pub fn scan_requests(&self) -> usize {
        self.counts.scan.load(Ordering::SeqCst)
    }

    pub fn install_requests(&self) -> usize {
        self.counts.install.load(Ordering::SeqCst)
    }
}

/// A localhost port with nothing listening on it (bound once, then
/// released). Useful for simulating connection-refused peers.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

async fn health(State(state): State<Arc<StubState>>) -> Response {
    state.counts.health.fetch_add(1, Ordering::SeqCst);
    if !state.cfg.healthy {
        return (StatusCode::SERVICE_UNAVAILABLE, "unhealthy").into_response();
    }
    Json(json!({
        "status": "ok",
        "platform": "linux",
        "hostname": "stub-agent",
        "timestamp": Utc::now(),
    }))
    .into_response()
}

async fn scan_patches(State(state): State<Arc<StubState>>) -> Json<Value> {
    state.counts.scan.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = state.cfg.scan_delay {
        tokio::time::sleep(delay).await;
    }
    if !state.cfg.scan_success {
        return Json(json!({ "success": false, "error": "simulated scan failure" }));
    }
    Json(json!({
        "success": true,
        "system": "stub-agent",
        "patches": state.cfg.patches,
        "scannedAt": Utc::now(),
    }))
}

async fn install_update(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Json<Value> {
    state.counts.install.fetch_add(1, Ordering::SeqCst);
    let app_id = body
        .get("appId")
        .or_else(|| body.get("appName"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    if !state.cfg.install_success {
        return Json(json!({
            "success": false,
            "result": {
                "success": false,
                "output": "",
                "method": "stub",
                "error": format!("simulated install failure for {app_id}"),
            },
        }));
    }
    Json(json!({
        "success": true,
        "result": {
            "success": true,
            "output": format!("installed {app_id}"),
            "method": "stub",
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_counts_requests() {
        let agent = StubAgentBuilder::new().spawn().await.unwrap();

        let body = mini_http::get(&format!("{}/health", agent.base_url())).await;
        assert!(body.contains("ok"));
        assert_eq!(agent.health_requests(), 1);
        assert_eq!(agent.scan_requests(), 0);
    }

    // Tiny HTTP GET so the devkit itself needs no HTTP client dependency.
    mod mini_http {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        pub async fn get(url: &str) -> String {
            let rest = url.strip_prefix("http://").unwrap();
            let (host, path) = rest.split_once('/').unwrap();
            let mut stream = tokio::net::TcpStream::connect(host).await.unwrap();
            let req = format!("GET /{path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
            stream.write_all(req.as_bytes()).await.unwrap();
            let mut buf = String::new();
            stream.read_to_string(&mut buf).await.unwrap();
            buf
        }
    }
}

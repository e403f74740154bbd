//! Agent probe and scan client
//!
//! Agents are deployed ad hoc on arbitrary hosts without service discovery,
//! so a fixed ordered set of candidate ports is probed with a cheap health
//! check before committing to the expensive scan call. Every network error
//! stays inside this module as a failed ScanResult; the aggregator's fan-out
//! is never interrupted by one bad host.

use crate::config::ProbeConf;
use crate::models::{HostDescriptor, PatchEntry, RawPatchEntry, ScanResult};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ScanPatchesResponse {
    success: bool,
    #[serde(default)]
    patches: Vec<RawPatchEntry>,
    #[serde(default)]
    error: Option<String>,
}

pub struct ProbeClient {
    ports: Vec<u16>,
    health_client: reqwest::Client,
    scan_client: reqwest::Client,
}

impl ProbeClient {
    pub fn from_config(cfg: &ProbeConf) -> Result<Self> {
        Self::new(
            cfg.ports.clone(),
            Duration::from_secs(cfg.health_timeout_secs),
            Duration::from_secs(cfg.scan_timeout_secs),
        )
    }

    pub fn new(ports: Vec<u16>, health_timeout: Duration, scan_timeout: Duration) -> Result<Self> {
        // Separate clients: health checks fail fast, package enumeration on
        // the agent side can legitimately take tens of seconds.
        let health_client = reqwest::Client::builder()
            .timeout(health_timeout)
            .build()
            .context("failed to build health-check client")?;
        let scan_client = reqwest::Client::builder()
            .timeout(scan_timeout)
            .build()
            .context("failed to build scan client")?;
        Ok(Self {
            ports,
            health_client,
            scan_client,
        })
    }

    /// Find an agent on the host and request its patch list.
    pub async fn probe_and_scan(&self, host: &HostDescriptor) -> ScanResult {
        let Some(port) = self.find_agent(&host.ip_address).await else {
            return ScanResult::failure(
                host.clone(),
                format!(
                    "no agent responded to a health check on ports {:?}",
                    self.ports
                ),
            );
        };

        match self.request_scan(&host.ip_address, port).await {
            Ok(patches) => ScanResult::success(host.clone(), patches, Some(port)),
            Err(e) => ScanResult::failure(
                host.clone(),
                format!("agent on port {port} failed to scan: {e:#}"),
            ),
        }
    }

    /// First candidate port whose `/health` answers with a success status.
    /// Remaining ports are not tried once one responds.
    async fn find_agent(&self, ip: &str) -> Option<u16> {
        for &port in &self.ports {
            let url = format!("http://{ip}:{port}/health");
            match self.health_client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("agent found at {ip}:{port}");
                    return Some(port);
                }
                Ok(resp) => debug!("{url} answered {}", resp.status()),
                Err(e) => debug!("{url} unreachable: {e}"),
            }
        }
        None
    }

    async fn request_scan(&self, ip: &str, port: u16) -> Result<Vec<PatchEntry>> {
        let url = format!("http://{ip}:{port}/scan-patches");
        let body: ScanPatchesResponse = self
            .scan_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("scan request to {url} failed"))?
            .error_for_status()
            .context("scan request rejected")?
            .json()
            .await
            .context("scan response was not valid JSON")?;

        if !body.success {
            return Err(anyhow!(
                "agent reported scan failure: {}",
                body.error.unwrap_or_else(|| "no detail".into())
            ));
        }

        Ok(body
            .patches
            .into_iter()
            .map(RawPatchEntry::normalize)
            .collect())
    }
}

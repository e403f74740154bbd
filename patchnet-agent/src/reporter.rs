//! Kernel callback client
//!
//! Registers this agent with the kernel and pushes status transitions
//! (ONLINE heartbeats, INSTALLING/SUCCESS/FAILED around installs). Every
//! push is authenticated with the agent's own credential; a kernel that is
//! down never disturbs the agent's HTTP surface.

use crate::ident::{Platform, SystemIdent};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Online,
    Offline,
    Installing,
    Success,
    Failed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload<'a> {
    agent_id: &'a str,
    status: AgentStatus,
    message: &'a str,
    timestamp: chrono::DateTime<Utc>,
    system: Platform,
    capabilities: &'a [String],
}

pub struct StatusReporter {
    client: reqwest::Client,
    kernel_url: String,
    api_key: String,
    agent_id: String,
    platform: Platform,
    capabilities: Vec<String>,
}

impl StatusReporter {
    pub fn new(
        kernel_url: &str,
        api_key: &str,
        ident: &SystemIdent,
        capabilities: Vec<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build kernel callback client")?;
        Ok(Self {
            client,
            kernel_url: kernel_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            agent_id: ident.agent_id.clone(),
            platform: ident.platform,
            capabilities,
        })
    }

    /// Announce this agent's callback URL and capabilities.
    pub async fn register(&self, ident: &SystemIdent, port: u16) -> Result<()> {
        let payload = json!({
            "agentId": self.agent_id,
            "url": format!("http://{}:{}", ident.ip_address, port),
            "apiKey": self.api_key,
            "system": self.platform,
            "capabilities": self.capabilities,
        });

        self.client
            .post(format!("{}/api/agent/register", self.kernel_url))
            .json(&payload)
            .send()
            .await
            .context("registration request failed")?
            .error_for_status()
            .context("kernel rejected registration")?;

        debug!("registered with kernel at {}", self.kernel_url);
        Ok(())
    }

    pub async fn send_status(&self, status: AgentStatus, message: &str) -> Result<()> {
        let payload = StatusPayload {
            agent_id: &self.agent_id,
            status,
            message,
            timestamp: Utc::now(),
            system: self.platform,
            capabilities: &self.capabilities,
        };

        self.client
            .post(format!("{}/api/agent/status", self.kernel_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("status push failed")?
            .error_for_status()
            .context("kernel rejected status push")?;

        debug!("status sent: {status:?} - {message}");
        Ok(())
    }
}

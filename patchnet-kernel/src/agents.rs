//! Registered-agent registry
//!
//! Install-capable agents register themselves (or are auto-registered from a
//! first status push) and report state transitions around installs. The
//! registry is an explicit service object owning the map plus JSON file
//! persistence, injected into the HTTP layer — not a module-level singleton —
//! so it can be swapped for a persistent store without touching call sites.

use crate::models::Platform;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    Online,
    Offline,
    Installing,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAgent {
    pub agent_id: String,
    /// Callback URL for install dispatch. Empty until the agent registers
    /// explicitly (a bare status push does not carry one).
    pub base_url: String,
    pub api_key: String,
    pub platform: Platform,
    pub capabilities: Vec<String>,
    pub state: AgentState,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
    pub last_message: Option<String>,
}

/// Explicit registration payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub agent_id: String,
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_platform")]
    pub system: Platform,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Status push from a running agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub agent_id: String,
    pub status: AgentState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub system: Option<Platform>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

fn default_platform() -> Platform {
    Platform::Unknown
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("unknown agent id")]
    UnknownAgent,
    #[error("credential does not match the registered agent")]
    BadCredential,
}

pub type AgentsMap = HashMap<String, RegisteredAgent>;

pub struct AgentRegistry {
    agents: Arc<RwLock<AgentsMap>>,
    data_file: String,
    allow_auto_register: bool,
}

pub type SharedAgentRegistry = Arc<AgentRegistry>;

impl AgentRegistry {
    pub fn new(data_file: &str, allow_auto_register: bool) -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            data_file: data_file.to_string(),
            allow_auto_register,
        }
    }

    /// Load agents from the JSON persistence file.
    pub async fn load(&self) -> anyhow::Result<()> {
        if !std::path::Path::new(&self.data_file).exists() {
            info!("no existing agents file, starting fresh");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.data_file).await?;
        let loaded: AgentsMap = serde_json::from_str(&content)?;

        let mut agents = self.agents.write().await;
        info!("loaded {} agents from {}", loaded.len(), self.data_file);
        *agents = loaded;
        Ok(())
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let agents = self.agents.read().await;
        let content = serde_json::to_string_pretty(&*agents)?;
        tokio::fs::write(&self.data_file, content).await?;
        Ok(())
    }

    /// Explicit registration: creates the entry or refreshes an existing one
    /// (keeping its original registration time).
    pub async fn register(&self, req: RegisterRequest) {
        let now = OffsetDateTime::now_utc();
        {
            let mut agents = self.agents.write().await;
            match agents.get_mut(&req.agent_id) {
                Some(agent) => {
                    agent.base_url = req.url;
                    agent.api_key = req.api_key;
                    agent.platform = req.system;
                    agent.capabilities = req.capabilities;
                    agent.state = AgentState::Online;
                    agent.last_seen = now;
                }
                None => {
                    agents.insert(
                        req.agent_id.clone(),
                        RegisteredAgent {
                            agent_id: req.agent_id.clone(),
                            base_url: req.url,
                            api_key: req.api_key,
                            platform: req.system,
                            capabilities: req.capabilities,
                            state: AgentState::Online,
                            last_seen: now,
                            registered_at: now,
                            last_message: None,
                        },
                    );
                }
            }
        }

        info!("registered agent {}", req.agent_id);
        if let Err(e) = self.save().await {
            error!("failed to persist agents after registration: {e}");
        }
    }

    /// Apply a status push. The bearer credential must match the stored key;
    /// an unknown id with a credential is auto-registered when allowed
    /// (idempotent — repeat pushes update the same entry).
    pub async fn handle_status(&self, req: StatusRequest, bearer: &str) -> Result<(), StatusError> {
        let now = OffsetDateTime::now_utc();
        {
            let mut agents = self.agents.write().await;
            match agents.get_mut(&req.agent_id) {
                Some(agent) => {
                    if agent.api_key != bearer {
                        return Err(StatusError::BadCredential);
                    }
                    agent.state = req.status;
                    agent.last_seen = now;
                    agent.last_message = req.message;
                    if let Some(system) = req.system {
                        agent.platform = system;
                    }
                    if let Some(capabilities) = req.capabilities {
                        agent.capabilities = capabilities;
                    }
                }
                None => {
                    if !self.allow_auto_register || bearer.is_empty() {
                        return Err(StatusError::UnknownAgent);
                    }
                    warn!("auto-registering unknown agent {}", req.agent_id);
                    agents.insert(
                        req.agent_id.clone(),
                        RegisteredAgent {
                            agent_id: req.agent_id.clone(),
                            base_url: String::new(),
                            api_key: bearer.to_string(),
                            platform: req.system.unwrap_or(Platform::Unknown),
                            capabilities: req.capabilities.unwrap_or_default(),
                            state: req.status,
                            last_seen: now,
                            registered_at: now,
                            last_message: req.message,
                        },
                    );
                }
            }
        }

        if let Err(e) = self.save().await {
            error!("failed to persist agents after status update: {e}");
        }
        Ok(())
    }

    pub async fn get(&self, agent_id: &str) -> Option<RegisteredAgent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn list(&self) -> Vec<RegisteredAgent> {
        let mut agents: Vec<RegisteredAgent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Dispatch-driven state transition (INSTALLING, SUCCESS, FAILED).
    pub async fn set_state(&self, agent_id: &str, state: AgentState, message: Option<String>) {
        {
            let mut agents = self.agents.write().await;
            if let Some(agent) = agents.get_mut(agent_id) {
                agent.state = state;
                agent.last_seen = OffsetDateTime::now_utc();
                if message.is_some() {
                    agent.last_message = message;
                }
            }
        }
        if let Err(e) = self.save().await {
            error!("failed to persist agents after state change: {e}");
        }
    }

    /// Periodically mark agents offline once they stop reporting.
    pub fn spawn_stale_monitor(registry: SharedAgentRegistry, offline_after_minutes: i64) {
        info!("starting agent stale monitor (timeout: {offline_after_minutes}min)");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;

                let threshold =
                    OffsetDateTime::now_utc() - time::Duration::minutes(offline_after_minutes);
                let mut stale = Vec::new();
                {
                    let agents = registry.agents.read().await;
                    for (id, agent) in agents.iter() {
                        if agent.state == AgentState::Online && agent.last_seen < threshold {
                            stale.push(id.clone());
                        }
                    }
                }

                for id in stale {
                    info!("marking agent {id} offline");
                    registry
                        .set_state(&id, AgentState::Offline, Some("stopped reporting".into()))
                        .await;
                }
            }
        });
    }
}

//! Remote install dispatcher
//!
//! Sends an install command to a previously registered agent and tracks the
//! agent's lifecycle around it: ONLINE → INSTALLING → SUCCESS | FAILED.
//! No automatic retry — retry policy belongs to the caller.

use crate::agents::{AgentState, SharedAgentRegistry};
use crate::config::InstallConf;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown agent: {0}")]
    AgentNotFound(String),
    #[error("agent {0} has no callback URL; it must register explicitly before installs")]
    MissingEndpoint(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    pub dispatch_id: String,
    pub agent_id: String,
    pub app_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstallUpdateResponse {
    success: bool,
    #[serde(default)]
    result: Option<InstallResultBody>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstallResultBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct InstallDispatcher {
    registry: SharedAgentRegistry,
    client: reqwest::Client,
}

impl InstallDispatcher {
    pub fn from_config(registry: SharedAgentRegistry, cfg: &InstallConf) -> Result<Self> {
        Self::new(registry, Duration::from_secs(cfg.timeout_secs))
    }

    pub fn new(registry: SharedAgentRegistry, timeout: Duration) -> Result<Self> {
        // Installs run a package manager on the far end; the timeout is in
        // minutes territory, not seconds.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build install client")?;
        Ok(Self { registry, client })
    }

    pub async fn install_remotely(
        &self,
        app_id: &str,
        agent_id: &str,
    ) -> Result<InstallOutcome, DispatchError> {
        let agent = self
            .registry
            .get(agent_id)
            .await
            .ok_or_else(|| DispatchError::AgentNotFound(agent_id.to_string()))?;
        if agent.base_url.is_empty() {
            return Err(DispatchError::MissingEndpoint(agent_id.to_string()));
        }

        let dispatch_id = Uuid::new_v4().to_string();
        info!("dispatch {dispatch_id}: installing {app_id} via agent {agent_id}");

        self.registry
            .set_state(
                agent_id,
                AgentState::Installing,
                Some(format!("installing {app_id}")),
            )
            .await;

        let url = format!("{}/install-update", agent.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "appId": app_id }))
            .send()
            .await;

        let outcome = match response {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<InstallUpdateResponse>().await {
                    Ok(body) => self.from_agent_response(&dispatch_id, agent_id, app_id, body),
                    Err(e) => self.failed(&dispatch_id, agent_id, app_id, format!("invalid agent response: {e}")),
                },
                Err(e) => self.failed(&dispatch_id, agent_id, app_id, format!("agent rejected install: {e}")),
            },
            Err(e) => self.failed(&dispatch_id, agent_id, app_id, format!("install request failed: {e}")),
        };

        let (state, message) = if outcome.success {
            (
                AgentState::Success,
                format!("successfully installed {app_id}"),
            )
        } else {
            let detail = outcome.error.clone().unwrap_or_else(|| "unknown error".into());
            warn!("dispatch {dispatch_id}: install of {app_id} failed: {detail}");
            (AgentState::Failed, format!("failed to install {app_id}: {detail}"))
        };
        self.registry.set_state(agent_id, state, Some(message)).await;

        Ok(outcome)
    }

    fn from_agent_response(
        &self,
        dispatch_id: &str,
        agent_id: &str,
        app_id: &str,
        body: InstallUpdateResponse,
    ) -> InstallOutcome {
        let result = body.result.unwrap_or(InstallResultBody {
            success: body.success,
            output: None,
            method: None,
            error: None,
        });
        let success = body.success && result.success;
        InstallOutcome {
            dispatch_id: dispatch_id.to_string(),
            agent_id: agent_id.to_string(),
            app_id: app_id.to_string(),
            success,
            method: result.method,
            output: result.output,
            error: if success {
                None
            } else {
                Some(
                    result
                        .error
                        .or(body.error)
                        .unwrap_or_else(|| "agent reported failure".into()),
                )
            },
        }
    }

    fn failed(
        &self,
        dispatch_id: &str,
        agent_id: &str,
        app_id: &str,
        error: String,
    ) -> InstallOutcome {
        InstallOutcome {
            dispatch_id: dispatch_id.to_string(),
            agent_id: agent_id.to_string(),
            app_id: app_id.to_string(),
            success: false,
            method: None,
            output: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRegistry, RegisterRequest};
    use crate::models::Platform;
    use devkit::agent_stub::StubAgentBuilder;
    use std::sync::Arc;

    async fn registry_with_agent(base_url: &str) -> SharedAgentRegistry {
        let path = std::env::temp_dir().join(format!("patchnet-dispatch-{}.json", Uuid::new_v4()));
        let registry = Arc::new(AgentRegistry::new(path.to_str().unwrap(), true));
        registry
            .register(RegisterRequest {
                agent_id: "agent-x".into(),
                url: base_url.into(),
                api_key: "secret".into(),
                system: Platform::Windows,
                capabilities: vec!["winget".into()],
            })
            .await;
        registry
    }

    #[tokio::test]
    async fn unknown_agent_is_agent_not_found() {
        let path = std::env::temp_dir().join(format!("patchnet-dispatch-{}.json", Uuid::new_v4()));
        let registry = Arc::new(AgentRegistry::new(path.to_str().unwrap(), true));
        let dispatcher =
            InstallDispatcher::new(registry, Duration::from_secs(2)).unwrap();

        let err = dispatcher.install_remotely("Git.Git", "ghost").await.unwrap_err();
        assert!(matches!(err, DispatchError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn successful_install_transitions_agent_to_success() {
        let agent = StubAgentBuilder::new().spawn().await.unwrap();
        let registry = registry_with_agent(&agent.base_url()).await;
        let dispatcher =
            InstallDispatcher::new(registry.clone(), Duration::from_secs(5)).unwrap();

        let outcome = dispatcher.install_remotely("Git.Git", "agent-x").await.unwrap();

        assert!(outcome.success);
        assert_eq!(agent.install_requests(), 1);
        assert_eq!(
            registry.get("agent-x").await.unwrap().state,
            AgentState::Success
        );
    }

    #[tokio::test]
    async fn failed_install_transitions_agent_to_failed() {
        let agent = StubAgentBuilder::new().install_fails().spawn().await.unwrap();
        let registry = registry_with_agent(&agent.base_url()).await;
        let dispatcher =
            InstallDispatcher::new(registry.clone(), Duration::from_secs(5)).unwrap();

        let outcome = dispatcher.install_remotely("Git.Git", "agent-x").await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(
            registry.get("agent-x").await.unwrap().state,
            AgentState::Failed
        );
    }

    #[tokio::test]
    async fn unreachable_agent_fails_without_error_escaping() {
        let registry = registry_with_agent("http://127.0.0.1:1/").await;
        let dispatcher =
            InstallDispatcher::new(registry.clone(), Duration::from_secs(2)).unwrap();

        let outcome = dispatcher.install_remotely("Git.Git", "agent-x").await.unwrap();

        assert!(!outcome.success);
        assert_eq!(
            registry.get("agent-x").await.unwrap().state,
            AgentState::Failed
        );
    }

    #[tokio::test]
    async fn agent_without_callback_url_is_not_dispatchable() {
        let path = std::env::temp_dir().join(format!("patchnet-dispatch-{}.json", Uuid::new_v4()));
        let registry = Arc::new(AgentRegistry::new(path.to_str().unwrap(), true));
        registry
            .handle_status(
                crate::agents::StatusRequest {
                    agent_id: "agent-y".into(),
                    status: AgentState::Online,
                    message: None,
                    system: None,
                    capabilities: None,
                },
                "secret",
            )
            .await
            .unwrap();

        let dispatcher = InstallDispatcher::new(registry, Duration::from_secs(2)).unwrap();
        let err = dispatcher.install_remotely("Git.Git", "agent-y").await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingEndpoint(_)));
    }
}

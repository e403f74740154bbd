use crate::agents::{AgentState, SharedAgentRegistry};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub agents_registered: u32,
    pub agents_online: u32,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub async fn get_health(&self, agents: &SharedAgentRegistry) -> KernelHealth {
        let list = agents.list().await;
        let online = list
            .iter()
            .filter(|a| a.state == AgentState::Online)
            .count();

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            agents_registered: list.len() as u32,
            agents_online: online as u32,
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string(format!("/proc/{}/status", std::process::id()));
        if let Ok(status) = status {
            let rss_kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn health_counts_registered_agents() {
        let path = std::env::temp_dir().join(format!("patchnet-health-{}.json", uuid::Uuid::new_v4()));
        let registry: SharedAgentRegistry =
            Arc::new(AgentRegistry::new(path.to_str().unwrap(), true));
        registry
            .handle_status(
                crate::agents::StatusRequest {
                    agent_id: "a1".into(),
                    status: AgentState::Online,
                    message: None,
                    system: None,
                    capabilities: None,
                },
                "k",
            )
            .await
            .unwrap();

        let health = HealthTracker::new().get_health(&registry).await;
        assert_eq!(health.agents_registered, 1);
        assert_eq!(health.agents_online, 1);
    }
}

//! Agent configuration from environment variables
//!
//! The agent is deployed ad hoc on arbitrary hosts, so configuration stays
//! minimal: everything has a default and the kernel can discover an
//! unconfigured agent by port probing alone. Registration/status callbacks
//! are only enabled when a kernel URL and credential are provided.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub kernel_url: Option<String>,
    pub agent_id: Option<String>,
    pub api_key: String,
    pub heartbeat_interval_secs: u64,
    pub scan_timeout_secs: u64,
    pub install_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            kernel_url: None,
            agent_id: None,
            api_key: String::new(),
            heartbeat_interval_secs: 30,
            scan_timeout_secs: 120,
            install_timeout_secs: 300,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PATCHNET_AGENT_PORT", defaults.port),
            kernel_url: std::env::var("PATCHNET_KERNEL_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            agent_id: std::env::var("PATCHNET_AGENT_ID")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            api_key: std::env::var("PATCHNET_AGENT_KEY").unwrap_or_default(),
            heartbeat_interval_secs: env_parse(
                "PATCHNET_HEARTBEAT_SECS",
                defaults.heartbeat_interval_secs,
            ),
            scan_timeout_secs: env_parse("PATCHNET_SCAN_TIMEOUT_SECS", defaults.scan_timeout_secs),
            install_timeout_secs: env_parse(
                "PATCHNET_INSTALL_TIMEOUT_SECS",
                defaults.install_timeout_secs,
            ),
        }
    }

    /// Callbacks need both a kernel endpoint and a credential.
    pub fn reporting_enabled(&self) -> bool {
        self.kernel_url.is_some() && !self.api_key.is_empty()
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub discovery: DiscoveryConf,
    pub probe: ProbeConf,
    pub scanner: ScannerConf,
    pub agents: AgentsConf,
    pub install: InstallConf,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            discovery: DiscoveryConf::default(),
            probe: ProbeConf::default(),
            scanner: ScannerConf::default(),
            agents: AgentsConf::default(),
            install: InstallConf::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DiscoveryConf {
    /// Ceiling for each discovery phase (ping, ARP read, one hostname lookup).
    pub phase_timeout_secs: u64,
}

impl Default for DiscoveryConf {
    fn default() -> Self {
        Self { phase_timeout_secs: 3 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConf {
    /// Candidate ports tried in order; agents are deployed ad hoc without
    /// central service discovery, so a fixed small set is probed.
    pub ports: Vec<u16>,
    pub health_timeout_secs: u64,
    pub scan_timeout_secs: u64,
    /// How many hosts are scanned concurrently by the aggregator.
    pub parallel_scans: usize,
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self {
            ports: vec![3001, 3002, 3003, 8080, 8081],
            health_timeout_secs: 3,
            scan_timeout_secs: 30,
            parallel_scans: 4,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConf {
    /// Helper command producing a JSON array of installed applications on
    /// stdout, e.g. "python3 scripts/latest_version.py".
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for ScannerConf {
    fn default() -> Self {
        let command = if cfg!(target_os = "windows") {
            "python scripts/latest_version.py"
        } else {
            "python3 scripts/latest_version.py"
        };
        Self { command: command.into(), timeout_secs: 30 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AgentsConf {
    pub data_file: String,
    /// Accept status pushes from unknown agent ids carrying a credential.
    /// Matches the historical agent scripts; disable for hardened setups.
    pub allow_auto_register: bool,
    pub offline_after_minutes: i64,
}

impl Default for AgentsConf {
    fn default() -> Self {
        Self {
            data_file: "./data/agents.json".into(),
            allow_auto_register: true,
            offline_after_minutes: 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InstallConf {
    pub timeout_secs: u64,
}

impl Default for InstallConf {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("PATCHNET_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return KernelConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("invalid config {path}: {e}, using defaults");
            KernelConfig::default()
        })
    } else {
        warn!("no {path}, using default config");
        KernelConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_missing_sections() {
        let cfg: KernelConfig = serde_yaml::from_str("probe:\n  ports: [4000]\n").unwrap();
        assert_eq!(cfg.probe.ports, vec![4000]);
        assert_eq!(cfg.probe.scan_timeout_secs, 30);
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
        assert!(cfg.agents.allow_auto_register);
    }
}

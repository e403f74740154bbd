use serde::{Deserialize, Serialize};

/// Version string used when a scanner could not determine one.
pub const UNKNOWN_VERSION: &str = "Unknown";

/// MAC placeholder for hosts whose hardware address could not be read.
pub const UNKNOWN_MAC: &str = "unknown";

/// Operating-system family of a host or agent.
///
/// Closed set on purpose: platform-specific behavior dispatches with an
/// exhaustive `match`, never with string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "WINDOWS")]
    Windows,
    #[serde(alias = "LINUX")]
    Linux,
    #[serde(alias = "MACOS", alias = "darwin", alias = "DARWIN")]
    Macos,
    #[serde(alias = "UNIX")]
    Unix,
    #[serde(other)]
    Unknown,
}

impl Platform {
    /// Platform of the machine this process runs on.
    pub fn local() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "linux" | "android" => Platform::Linux,
            "macos" => Platform::Macos,
            "freebsd" | "netbsd" | "openbsd" | "dragonfly" | "solaris" | "illumos" => {
                Platform::Unix
            }
            _ => Platform::Unknown,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Unix => "unix",
            Platform::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PatchStatus {
    Pending,
    Installed,
}

/// One machine observed during a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDescriptor {
    pub ip_address: String,
    pub mac_address: String,
    pub hostname: String,
    pub platform: Platform,
    pub is_local_host: bool,
}

impl HostDescriptor {
    /// Descriptor for a remote peer found on the subnet. Platform stays
    /// `Unknown` since no remote OS fingerprinting is attempted.
    pub fn peer(ip: impl Into<String>, mac: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            ip_address: ip.into(),
            mac_address: mac.into(),
            hostname: hostname.into(),
            platform: Platform::Unknown,
            is_local_host: false,
        }
    }
}

/// One application / update pair as reported by a scanner, before
/// normalization. Accepts both snake_case (helper script output) and
/// camelCase (agent API) field spellings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPatchEntry {
    pub name: String,
    #[serde(default, alias = "package_id", alias = "packageId")]
    pub id: Option<String>,
    #[serde(default, alias = "current_version")]
    pub current_version: Option<String>,
    #[serde(
        default,
        alias = "latest_version",
        alias = "available_version",
        alias = "availableVersion"
    )]
    pub latest_version: Option<String>,
    #[serde(default, alias = "update_available")]
    pub update_available: Option<bool>,
}

impl RawPatchEntry {
    pub fn normalize(self) -> PatchEntry {
        let current_version = non_empty(self.current_version)
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        let update_available = self.update_available.unwrap_or(false);
        // When no update is flagged the latest version is the current one by
        // convention, regardless of what the scanner claimed.
        let latest_version = if update_available {
            non_empty(self.latest_version).unwrap_or_else(|| current_version.clone())
        } else {
            current_version.clone()
        };
        let package_id = non_empty(self.id).unwrap_or_else(|| self.name.clone());

        let severity = if update_available && current_version != latest_version {
            Severity::Critical
        } else {
            Severity::None
        };
        let status = if update_available {
            PatchStatus::Pending
        } else {
            PatchStatus::Installed
        };

        PatchEntry {
            name: self.name,
            package_id,
            current_version,
            latest_version,
            update_available,
            severity,
            status,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Normalized patch record with derived classification fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEntry {
    pub name: String,
    pub package_id: String,
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
    pub severity: Severity,
    pub status: PatchStatus,
}

/// Outcome of scanning a single host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub host: HostDescriptor,
    pub succeeded: bool,
    pub patches: Vec<PatchEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_port: Option<u16>,
}

impl ScanResult {
    pub fn success(host: HostDescriptor, patches: Vec<PatchEntry>, agent_port: Option<u16>) -> Self {
        Self {
            host,
            succeeded: true,
            patches,
            failure_reason: None,
            agent_port,
        }
    }

    /// Failed scans never carry patches: the constructor enforces the
    /// `succeeded=false => patches empty, reason present` invariant.
    pub fn failure(host: HostDescriptor, reason: impl Into<String>) -> Self {
        Self {
            host,
            succeeded: false,
            patches: Vec::new(),
            failure_reason: Some(reason.into()),
            agent_port: None,
        }
    }
}

/// Combined result of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub overall_succeeded: bool,
    pub host_results: Vec<ScanResult>,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_pair_classifies_as_critical_pending() {
        let entry = RawPatchEntry {
            name: "App".into(),
            id: None,
            current_version: Some("1.0".into()),
            latest_version: Some("1.1".into()),
            update_available: Some(true),
        }
        .normalize();

        assert_eq!(entry.severity, Severity::Critical);
        assert_eq!(entry.status, PatchStatus::Pending);
        assert_eq!(entry.latest_version, "1.1");
    }

    #[test]
    fn up_to_date_pair_classifies_as_none_installed() {
        let entry = RawPatchEntry {
            name: "App".into(),
            id: None,
            current_version: Some("1.0".into()),
            latest_version: Some("1.0".into()),
            update_available: Some(false),
        }
        .normalize();

        assert_eq!(entry.severity, Severity::None);
        assert_eq!(entry.status, PatchStatus::Installed);
    }

    #[test]
    fn name_only_record_gets_sentinel_defaults() {
        let raw: RawPatchEntry = serde_json::from_str(r#"{"name":"X"}"#).unwrap();
        let entry = raw.normalize();

        assert_eq!(entry.name, "X");
        assert_eq!(entry.package_id, "X");
        assert_eq!(entry.current_version, UNKNOWN_VERSION);
        assert_eq!(entry.latest_version, entry.current_version);
        assert!(!entry.update_available);
        assert_eq!(entry.status, PatchStatus::Installed);
    }

    #[test]
    fn snake_and_camel_field_spellings_both_parse() {
        let snake: RawPatchEntry = serde_json::from_str(
            r#"{"name":"A","id":"a.id","current_version":"1.0","available_version":"2.0","update_available":true}"#,
        )
        .unwrap();
        let camel: RawPatchEntry = serde_json::from_str(
            r#"{"name":"A","packageId":"a.id","currentVersion":"1.0","latestVersion":"2.0","updateAvailable":true}"#,
        )
        .unwrap();

        let snake = snake.normalize();
        let camel = camel.normalize();
        assert_eq!(snake.package_id, camel.package_id);
        assert_eq!(snake.latest_version, camel.latest_version);
        assert!(snake.update_available && camel.update_available);
    }

    #[test]
    fn stale_latest_version_is_reset_when_no_update_flagged() {
        let entry = RawPatchEntry {
            name: "B".into(),
            id: None,
            current_version: Some("3.2".into()),
            latest_version: Some("9.9".into()),
            update_available: Some(false),
        }
        .normalize();

        assert_eq!(entry.latest_version, "3.2");
        assert_eq!(entry.severity, Severity::None);
    }

    #[test]
    fn failure_result_has_reason_and_no_patches() {
        let host = HostDescriptor::peer("10.0.0.9", UNKNOWN_MAC, "10.0.0.9");
        let result = ScanResult::failure(host, "connection refused");
        assert!(!result.succeeded);
        assert!(result.patches.is_empty());
        assert!(result.failure_reason.is_some());
        assert!(result.agent_port.is_none());
    }
}

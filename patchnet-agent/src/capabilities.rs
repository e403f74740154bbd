//! Install-method detection
//!
//! Probes which package managers are actually present so registration can
//! advertise honest capabilities. Manual installation is always available.

use crate::ident::Platform;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capability names advertised to the kernel on registration.
pub async fn detect(platform: Platform) -> Vec<String> {
    let mut capabilities = Vec::new();

    match platform {
        Platform::Windows => {
            if command_exists("winget").await {
                capabilities.push("winget".to_string());
            }
            if command_exists("choco").await {
                capabilities.push("chocolatey".to_string());
            }
        }
        Platform::Linux => {
            if command_exists("apt").await {
                capabilities.push("apt".to_string());
            }
            if command_exists("brew").await {
                capabilities.push("brew".to_string());
            }
        }
        Platform::Macos => {
            if command_exists("brew").await {
                capabilities.push("brew".to_string());
            }
        }
        Platform::Unix | Platform::Unknown => {}
    }

    capabilities.push("manual".to_string());
    debug!("detected capabilities: {capabilities:?}");
    capabilities
}

async fn command_exists(command: &str) -> bool {
    let spawned = Command::new(command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    match spawned {
        Ok(child) => matches!(
            timeout(PROBE_TIMEOUT, child.wait_with_output()).await,
            Ok(Ok(output)) if output.status.success()
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_is_always_advertised() {
        let caps = detect(Platform::Unknown).await;
        assert_eq!(caps, vec!["manual".to_string()]);
    }

    #[tokio::test]
    async fn missing_command_is_not_detected() {
        assert!(!command_exists("definitely-not-a-real-binary-xyz").await);
    }
}

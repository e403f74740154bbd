//! Package installation
//!
//! Executes an install/upgrade for one application id with the platform
//! package manager. The winget path walks a fallback chain (install by id,
//! upgrade by id, install by name) because an id that is already installed
//! fails the plain install, and some catalogs only match by name.

use crate::ident::Platform;
use crate::scanner::PackageManager;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub success: bool,
    pub output: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstallResult {
    fn failure(method: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            method: method.to_string(),
            error: Some(error.into()),
        }
    }
}

pub struct Installer {
    platform: Platform,
    timeout: Duration,
}

struct StepOutcome {
    success: bool,
    output: String,
}

impl Installer {
    pub fn new(platform: Platform, timeout: Duration) -> Self {
        Self { platform, timeout }
    }

    /// Install or upgrade one application. Errors are folded into the
    /// result; the caller decides how to report them.
    pub async fn install(&self, app_id: &str) -> InstallResult {
        info!("installing {app_id}");

        let Some(manager) = PackageManager::for_platform(self.platform) else {
            return InstallResult::failure(
                "none",
                format!("no supported package manager on platform {}", self.platform),
            );
        };

        match manager {
            PackageManager::Winget => self.winget_chain(app_id).await,
            PackageManager::Apt => self.apt_install(app_id).await,
            PackageManager::Brew => self.brew_chain(app_id).await,
        }
    }

    async fn winget_chain(&self, app_id: &str) -> InstallResult {
        let accept = ["--accept-source-agreements", "--accept-package-agreements"];

        let attempts: [(&str, Vec<&str>); 3] = [
            ("winget install --id", vec!["install", "--id", app_id]),
            ("winget upgrade --id", vec!["upgrade", "--id", app_id]),
            ("winget install --name", vec!["install", "--name", app_id]),
        ];

        let mut failures = Vec::new();
        for (label, mut args) in attempts {
            args.extend_from_slice(&accept);
            let step = self.run_step("winget", &args).await;
            if step.success {
                return InstallResult {
                    success: true,
                    output: step.output,
                    method: "winget".into(),
                    error: None,
                };
            }
            warn!("{label} failed for {app_id}");
            failures.push(format!("{label}: {}", step.output.trim()));
        }

        InstallResult::failure("winget", failures.join("; "))
    }

    async fn apt_install(&self, app_id: &str) -> InstallResult {
        // Refresh the index first; a stale index is non-fatal.
        let update = self.run_step("sudo", &["apt-get", "update"]).await;
        if !update.success {
            warn!("apt-get update failed, installing against the stale index");
        }

        let step = self
            .run_step("sudo", &["apt-get", "install", "-y", app_id])
            .await;
        if step.success {
            InstallResult {
                success: true,
                output: step.output,
                method: "apt".into(),
                error: None,
            }
        } else {
            InstallResult::failure("apt", step.output.trim().to_string())
        }
    }

    async fn brew_chain(&self, app_id: &str) -> InstallResult {
        let install = self.run_step("brew", &["install", app_id]).await;
        if install.success {
            return InstallResult {
                success: true,
                output: install.output,
                method: "brew".into(),
                error: None,
            };
        }

        // Already-installed formulas need an upgrade instead.
        let upgrade = self.run_step("brew", &["upgrade", app_id]).await;
        if upgrade.success {
            InstallResult {
                success: true,
                output: upgrade.output,
                method: "brew".into(),
                error: None,
            }
        } else {
            InstallResult::failure(
                "brew",
                format!(
                    "install: {}; upgrade: {}",
                    install.output.trim(),
                    upgrade.output.trim()
                ),
            )
        }
    }

    async fn run_step(&self, program: &str, args: &[&str]) -> StepOutcome {
        let child = match Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return StepOutcome {
                    success: false,
                    output: format!("failed to spawn {program}: {e}"),
                }
            }
        };

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return StepOutcome {
                    success: false,
                    output: format!("{program} did not complete: {e}"),
                }
            }
            Err(_) => {
                return StepOutcome {
                    success: false,
                    output: format!("{program} timed out after {:?}", self.timeout),
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout.into_owned()
        } else {
            format!("{stdout}\nSTDERR:\n{stderr}")
        };

        StepOutcome {
            success: output.status.success(),
            output: combined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_platform_reports_failure_without_running_anything() {
        let installer = Installer::new(Platform::Unknown, Duration::from_secs(5));
        let result = installer.install("Some.App").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no supported package manager"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_step_is_cut_off_at_the_deadline() {
        let installer = Installer::new(Platform::Linux, Duration::from_millis(200));
        let start = std::time::Instant::now();
        let step = installer.run_step("sleep", &["30"]).await;

        assert!(!step.success);
        assert!(step.output.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn step_captures_stderr_on_failure() {
        let installer = Installer::new(Platform::Linux, Duration::from_secs(5));
        let step = installer
            .run_step("sh", &["-c", "echo oops >&2; exit 3"])
            .await;

        assert!(!step.success);
        assert!(step.output.contains("oops"));
    }
}

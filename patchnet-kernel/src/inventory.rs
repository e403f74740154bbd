//! Local inventory scanner adapter
//!
//! Runs the configured helper command (a package-manager enumeration script)
//! and normalizes its JSON output into patch entries. Failures surface as
//! typed errors so the aggregator can record the local host as failed —
//! placeholder data is never substituted for a broken scanner.

use crate::config::ScannerConf;
use crate::models::{PatchEntry, RawPatchEntry};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scanner command is empty or unparseable: {0}")]
    BadCommand(String),
    #[error("failed to spawn scanner `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scanner timed out after {0:?}")]
    Timeout(Duration),
    #[error("scanner exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
    #[error("scanner produced invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct InventoryScanner {
    argv: Vec<String>,
    timeout: Duration,
}

impl InventoryScanner {
    pub fn from_config(cfg: &ScannerConf) -> Result<Self, ScanError> {
        Self::new(&cfg.command, Duration::from_secs(cfg.timeout_secs))
    }

    pub fn new(command: &str, timeout: Duration) -> Result<Self, ScanError> {
        let argv = shell_words::split(command)
            .map_err(|e| ScanError::BadCommand(e.to_string()))?;
        if argv.is_empty() {
            return Err(ScanError::BadCommand("empty command".into()));
        }
        Ok(Self { argv, timeout })
    }

    /// Enumerate installed applications on this machine.
    pub async fn scan_local(&self) -> Result<Vec<PatchEntry>, ScanError> {
        debug!("running inventory scanner: {:?}", self.argv);

        let child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must take the helper down with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScanError::Spawn {
                command: self.argv.join(" "),
                source,
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ScanError::Timeout(self.timeout))?
            .map_err(|source| ScanError::Spawn {
                command: self.argv.join(" "),
                source,
            })?;

        if !output.status.success() {
            return Err(ScanError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let raw: Vec<RawPatchEntry> = serde_json::from_str(stdout.trim())?;
        debug!("inventory scanner returned {} applications", raw.len());

        Ok(raw.into_iter().map(RawPatchEntry::normalize).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PatchStatus;

    fn scanner(command: &str, secs: u64) -> InventoryScanner {
        InventoryScanner::new(command, Duration::from_secs(secs)).unwrap()
    }

    #[tokio::test]
    async fn parses_and_normalizes_helper_output() {
        let scanner = scanner(
            r#"echo '[{"name":"Git","id":"Git.Git","current_version":"2.43.0","available_version":"2.45.0","update_available":true},{"name":"X"}]'"#,
            5,
        );
        let patches = scanner.scan_local().await.unwrap();

        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].package_id, "Git.Git");
        assert_eq!(patches[0].status, PatchStatus::Pending);
        assert_eq!(patches[1].latest_version, patches[1].current_version);
    }

    #[tokio::test]
    async fn malformed_output_is_a_parse_error() {
        let scanner = scanner("echo not-json", 5);
        let err = scanner.scan_local().await.unwrap_err();
        assert!(matches!(err, ScanError::Parse(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let scanner = scanner("false", 5);
        let err = scanner.scan_local().await.unwrap_err();
        assert!(matches!(err, ScanError::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_scanner_is_terminated_at_the_deadline() {
        let scanner =
            InventoryScanner::new("sleep 30", Duration::from_millis(200)).unwrap();
        let start = std::time::Instant::now();
        let err = scanner.scan_local().await.unwrap_err();

        assert!(matches!(err, ScanError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let scanner = scanner("definitely-not-a-real-binary-xyz", 5);
        let err = scanner.scan_local().await.unwrap_err();
        assert!(matches!(err, ScanError::Spawn { .. }));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = InventoryScanner::new("", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ScanError::BadCommand(_)));
    }
}

//! Package-manager enumeration
//!
//! Produces the patch list served on `/scan-patches`. One handler per
//! platform family: winget on Windows (fixed-width table output, installed
//! list merged with the upgrade list), apt on Linux, brew on macOS. Every
//! subprocess runs under a timeout and is killed when it expires.

use crate::ident::Platform;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const UNKNOWN_VERSION: &str = "Unknown";

/// One application as reported over the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRecord {
    pub name: String,
    pub id: String,
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Winget,
    Apt,
    Brew,
}

impl PackageManager {
    pub fn for_platform(platform: Platform) -> Option<Self> {
        match platform {
            Platform::Windows => Some(PackageManager::Winget),
            Platform::Linux => Some(PackageManager::Apt),
            Platform::Macos => Some(PackageManager::Brew),
            Platform::Unix | Platform::Unknown => None,
        }
    }
}

pub struct PatchScanner {
    platform: Platform,
    timeout: Duration,
}

impl PatchScanner {
    pub fn new(platform: Platform, timeout: Duration) -> Self {
        Self { platform, timeout }
    }

    pub async fn scan(&self) -> Result<Vec<PatchRecord>> {
        let Some(manager) = PackageManager::for_platform(self.platform) else {
            bail!("no supported package manager on platform {}", self.platform);
        };

        match manager {
            PackageManager::Winget => self.scan_winget().await,
            PackageManager::Apt => self.scan_apt().await,
            PackageManager::Brew => self.scan_brew().await,
        }
    }

    async fn scan_winget(&self) -> Result<Vec<PatchRecord>> {
        let installed = self
            .run("winget", &["list"])
            .await
            .context("winget list failed")?;
        let installed = parse_winget_table(&installed);
        debug!("winget list: {} applications", installed.len());

        // Upgrade info is best-effort: without it every application simply
        // reports as up to date.
        let upgrades = match self.run("winget", &["upgrade"]).await {
            Ok(output) => parse_winget_table(&output),
            Err(e) => {
                warn!("winget upgrade failed, reporting without update info: {e}");
                Vec::new()
            }
        };

        Ok(merge_with_upgrades(installed, upgrades))
    }

    async fn scan_apt(&self) -> Result<Vec<PatchRecord>> {
        let output = self
            .run("apt", &["list", "--upgradable"])
            .await
            .context("apt list --upgradable failed")?;
        Ok(parse_apt_upgradable(&output))
    }

    async fn scan_brew(&self) -> Result<Vec<PatchRecord>> {
        let output = self
            .run("brew", &["outdated", "--verbose"])
            .await
            .context("brew outdated failed")?;
        Ok(parse_brew_outdated(&output))
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{program} timed out after {:?}", self.timeout))?
            .with_context(|| format!("{program} did not complete"))?;

        if !output.status.success() {
            bail!(
                "{program} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WingetRow {
    pub name: String,
    pub id: String,
    pub version: String,
    pub available: Option<String>,
}

struct HeaderCols {
    name: usize,
    id: usize,
    version: usize,
    available: Option<usize>,
    source: Option<usize>,
    data_start: usize,
}

fn locate_columns(lines: &[&str]) -> Option<HeaderCols> {
    for (i, line) in lines.iter().enumerate() {
        if line.contains("Name") && line.contains("Id") && line.contains("Version") {
            return Some(HeaderCols {
                name: line.find("Name")?,
                id: line.find("Id")?,
                version: line.find("Version")?,
                available: line.find("Available"),
                source: line.find("Source"),
                // The header is followed by a separator line.
                data_start: i + 2,
            });
        }
    }
    None
}

/// Parse winget's fixed-width table (`winget list` or `winget upgrade`).
/// Column positions come from the header line; rows are sliced by character
/// index since truncated names can contain multi-byte characters.
pub(crate) fn parse_winget_table(output: &str) -> Vec<WingetRow> {
    let lines: Vec<&str> = output.lines().collect();
    let Some(cols) = locate_columns(&lines) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for line in lines.iter().skip(cols.data_start) {
        if line.trim().is_empty() || line.starts_with('-') {
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        // Continuation lines (wrapped names) start with whitespace.
        if chars.len() <= cols.name || chars[cols.name] == ' ' {
            continue;
        }

        let name = clean_text(&slice_col(&chars, cols.name, Some(cols.id)));
        let id = clean_text(&slice_col(&chars, cols.id, Some(cols.version)));
        let version_end = cols.available.or(cols.source);
        let version = clean_version(&slice_col(&chars, cols.version, version_end));
        let available = cols
            .available
            .map(|start| clean_version(&slice_col(&chars, start, cols.source)))
            .filter(|v| !v.is_empty());

        if name.len() > 1 && !version.is_empty() {
            rows.push(WingetRow {
                name,
                id,
                version,
                available,
            });
        }
    }
    rows
}

fn slice_col(chars: &[char], start: usize, end: Option<usize>) -> String {
    if start >= chars.len() {
        return String::new();
    }
    let end = end.unwrap_or(chars.len()).min(chars.len());
    if end <= start {
        return String::new();
    }
    chars[start..end].iter().collect()
}

/// Drop non-ASCII artifacts from truncated console output and collapse runs
/// of whitespace.
fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pick the token that actually looks like a version from a possibly messy
/// column slice.
fn clean_version(raw: &str) -> String {
    let cleaned = raw.replace('¦', "");
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    let Some(first) = parts.first() else {
        return String::new();
    };
    parts
        .iter()
        .find(|p| p.contains('.') || p.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(first)
        .to_string()
}

/// Join the installed list with the upgrade list by package id.
pub(crate) fn merge_with_upgrades(
    installed: Vec<WingetRow>,
    upgrades: Vec<WingetRow>,
) -> Vec<PatchRecord> {
    let lookup: HashMap<String, WingetRow> = upgrades
        .into_iter()
        .filter(|r| !r.id.is_empty())
        .map(|r| (r.id.clone(), r))
        .collect();

    installed
        .into_iter()
        .map(|row| match lookup.get(&row.id).and_then(|u| u.available.clone()) {
            Some(latest) => {
                let update_available = row.version != latest
                    && latest != UNKNOWN_VERSION
                    && row.version != UNKNOWN_VERSION;
                PatchRecord {
                    name: row.name,
                    id: row.id,
                    current_version: row.version,
                    latest_version: latest,
                    update_available,
                }
            }
            None => PatchRecord {
                name: row.name,
                id: row.id,
                current_version: row.version.clone(),
                latest_version: row.version,
                update_available: false,
            },
        })
        .collect()
}

/// Parse `apt list --upgradable` output, e.g.
/// `firefox/jammy-updates 121.0+build1 amd64 [upgradable from: 120.0+build2]`.
pub(crate) fn parse_apt_upgradable(output: &str) -> Vec<PatchRecord> {
    output
        .lines()
        .filter(|line| line.contains("upgradable from:"))
        .filter_map(|line| {
            let (name, rest) = line.split_once('/')?;
            let latest = rest.split_whitespace().nth(1)?;
            let current = line
                .rsplit_once("from: ")?
                .1
                .trim_end_matches(']')
                .trim();
            Some(PatchRecord {
                name: name.trim().to_string(),
                id: name.trim().to_string(),
                current_version: current.to_string(),
                latest_version: latest.to_string(),
                update_available: current != latest,
            })
        })
        .collect()
}

/// Parse `brew outdated --verbose` output, e.g.
/// `python@3.11 (3.11.6) < 3.11.7`.
pub(crate) fn parse_brew_outdated(output: &str) -> Vec<PatchRecord> {
    output
        .lines()
        .filter_map(|line| {
            let (left, latest) = line.split_once(" < ")?;
            let (name, versions) = left.split_once(" (")?;
            let current = versions.trim_end_matches(')').split(',').last()?.trim();
            Some(PatchRecord {
                name: name.trim().to_string(),
                id: name.trim().to_string(),
                current_version: current.to_string(),
                latest_version: latest.trim().to_string(),
                update_available: true,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn winget_line(name: &str, id: &str, version: &str, rest: &str) -> String {
        format!("{name:<24}{id:<20}{version:<14}{rest}\n")
    }

    fn winget_list_fixture() -> String {
        let mut out = String::new();
        out.push_str(&winget_line("Name", "Id", "Version", "Source"));
        out.push_str(&"-".repeat(70));
        out.push('\n');
        out.push_str(&winget_line("Git", "Git.Git", "2.43.0", "winget"));
        out.push_str(&winget_line("Mozilla Firefox", "Mozilla.Firefox", "120.0", "winget"));
        out.push_str(&winget_line("7-Zip", "7zip.7zip", "23.01", "winget"));
        out
    }

    fn winget_upgrade_fixture() -> String {
        let mut out = String::new();
        out.push_str(&winget_line("Name", "Id", "Version", "Available     Source"));
        out.push_str(&"-".repeat(80));
        out.push('\n');
        out.push_str(&winget_line("Git", "Git.Git", "2.43.0", "2.45.1        winget"));
        out.push_str(&winget_line(
            "Mozilla Firefox",
            "Mozilla.Firefox",
            "120.0",
            "121.0         winget",
        ));
        out
    }

    #[test]
    fn winget_list_parses_fixed_width_rows() {
        let rows = parse_winget_table(&winget_list_fixture());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "Git");
        assert_eq!(rows[0].id, "Git.Git");
        assert_eq!(rows[0].version, "2.43.0");
        assert!(rows[0].available.is_none());
        assert_eq!(rows[1].name, "Mozilla Firefox");
    }

    #[test]
    fn winget_upgrade_parses_available_column() {
        let rows = parse_winget_table(&winget_upgrade_fixture());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].available.as_deref(), Some("2.45.1"));
        assert_eq!(rows[1].available.as_deref(), Some("121.0"));
    }

    #[test]
    fn winget_continuation_lines_are_skipped() {
        let mut out = winget_list_fixture();
        out.push_str("   wrapped continuation text\n");
        let rows = parse_winget_table(&out);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn winget_without_header_yields_nothing() {
        assert!(parse_winget_table("garbage\nmore garbage\n").is_empty());
    }

    #[test]
    fn merge_flags_only_real_upgrades() {
        let merged = merge_with_upgrades(
            parse_winget_table(&winget_list_fixture()),
            parse_winget_table(&winget_upgrade_fixture()),
        );

        assert_eq!(merged.len(), 3);
        let git = merged.iter().find(|p| p.id == "Git.Git").unwrap();
        assert!(git.update_available);
        assert_eq!(git.latest_version, "2.45.1");

        let zip = merged.iter().find(|p| p.id == "7zip.7zip").unwrap();
        assert!(!zip.update_available);
        assert_eq!(zip.latest_version, zip.current_version);
    }

    #[test]
    fn merge_ignores_unknown_versions() {
        let installed = vec![WingetRow {
            name: "App".into(),
            id: "App.App".into(),
            version: UNKNOWN_VERSION.into(),
            available: None,
        }];
        let upgrades = vec![WingetRow {
            name: "App".into(),
            id: "App.App".into(),
            version: UNKNOWN_VERSION.into(),
            available: Some("2.0".into()),
        }];

        let merged = merge_with_upgrades(installed, upgrades);
        assert!(!merged[0].update_available);
    }

    #[test]
    fn apt_upgradable_lines_parse() {
        let output = "\
Listing... Done
firefox/jammy-updates 121.0+build1-0ubuntu1 amd64 [upgradable from: 120.0+build2-0ubuntu1]
curl/jammy-security 7.81.0-1ubuntu1.15 amd64 [upgradable from: 7.81.0-1ubuntu1.14]
";
        let records = parse_apt_upgradable(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "firefox");
        assert_eq!(records[0].current_version, "120.0+build2-0ubuntu1");
        assert_eq!(records[0].latest_version, "121.0+build1-0ubuntu1");
        assert!(records[0].update_available);
    }

    #[test]
    fn brew_outdated_lines_parse() {
        let output = "\
python@3.11 (3.11.6) < 3.11.7
node (20.9.0, 21.1.0) < 21.2.0
";
        let records = parse_brew_outdated(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "python@3.11");
        assert_eq!(records[0].current_version, "3.11.6");
        assert_eq!(records[0].latest_version, "3.11.7");
        assert_eq!(records[1].current_version, "21.1.0");
        assert_eq!(records[1].latest_version, "21.2.0");
    }

    #[test]
    fn version_cleanup_picks_the_plausible_token() {
        assert_eq!(clean_version("  2.43.0  "), "2.43.0");
        assert_eq!(clean_version("¦ 1.2.3"), "1.2.3");
        assert_eq!(clean_version("build 42"), "42");
        assert_eq!(clean_version("weird"), "weird");
        assert_eq!(clean_version(""), "");
    }

    #[tokio::test]
    async fn unsupported_platform_is_an_error() {
        let scanner = PatchScanner::new(Platform::Unknown, Duration::from_secs(5));
        let err = scanner.scan().await.unwrap_err();
        assert!(err.to_string().contains("no supported package manager"));
    }
}

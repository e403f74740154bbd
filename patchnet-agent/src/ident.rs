//! System identity for the agent
//!
//! Determines who this agent is on the network:
//! - Primary interface selection with priority (Ethernet > WiFi > other)
//! - IPv4 + MAC of the primary interface
//! - Hostname, platform, architecture
//! - Agent id derived from the MAC address (separators stripped)

use if_addrs::{get_if_addrs, IfAddr};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

pub const UNKNOWN_MAC: &str = "unknown";

/// Operating-system family, dispatched exhaustively wherever behavior
/// differs per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
    Unix,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceKind {
    Ethernet,
    Wireless,
    Virtual,
    Other,
}

impl InterfaceKind {
    /// Lower rank wins when picking the primary interface.
    fn rank(self) -> u8 {
        match self {
            InterfaceKind::Ethernet => 0,
            InterfaceKind::Wireless => 1,
            InterfaceKind::Other => 2,
            InterfaceKind::Virtual => 3,
        }
    }
}

fn classify_interface(name: &str) -> InterfaceKind {
    let name = name.to_lowercase();
    if name.starts_with("br")
        || name.starts_with("docker")
        || name.starts_with("veth")
        || name.starts_with("vir")
    {
        return InterfaceKind::Virtual;
    }
    if name.starts_with("wlan")
        || name.starts_with("wlp")
        || name.starts_with("wlo")
        || name.contains("wifi")
    {
        return InterfaceKind::Wireless;
    }
    if name.starts_with("eth") || name.starts_with("en") {
        return InterfaceKind::Ethernet;
    }
    InterfaceKind::Other
}

/// Complete identity of the machine this agent runs on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemIdent {
    pub agent_id: String,
    pub hostname: String,
    pub platform: Platform,
    pub os_type: String,
    pub architecture: String,
    pub ip_address: String,
    pub mac_address: String,
}

impl SystemIdent {
    /// Best-effort collection; never fails. A machine with no usable
    /// interface still gets an identity from its hostname.
    pub fn collect(agent_id_override: Option<String>) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();

        let (ip_address, mac_address) = match primary_interface() {
            Some((ip, mac)) => (ip.to_string(), mac),
            None => {
                warn!("no usable network interface found, falling back to loopback identity");
                (Ipv4Addr::LOCALHOST.to_string(), UNKNOWN_MAC.to_string())
            }
        };

        let agent_id = agent_id_override.unwrap_or_else(|| {
            if mac_address == UNKNOWN_MAC {
                format!("{hostname}-agent")
            } else {
                mac_address.replace(':', "")
            }
        });

        Self {
            agent_id,
            hostname,
            platform: Platform::current(),
            os_type: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            ip_address,
            mac_address,
        }
    }
}

/// IPv4 and MAC of the highest-priority non-loopback interface.
fn primary_interface() -> Option<(Ipv4Addr, String)> {
    let interfaces = get_if_addrs().ok()?;

    let mut candidates: Vec<(u8, Ipv4Addr, String)> = Vec::new();
    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        let IfAddr::V4(ref v4) = iface.addr else { continue };
        let Some(mac) = interface_mac(&iface.name) else {
            debug!("no MAC for interface {}", iface.name);
            continue;
        };
        candidates.push((classify_interface(&iface.name).rank(), v4.ip, mac));
    }

    // Stable sort keeps enumeration order within the same rank.
    candidates.sort_by_key(|(rank, _, _)| *rank);
    candidates
        .into_iter()
        .next()
        .map(|(_, ip, mac)| (ip, mac))
}

fn interface_mac(name: &str) -> Option<String> {
    let mac = mac_address::mac_address_by_name(name).ok().flatten()?;
    let b = mac.bytes();
    Some(format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_classification() {
        assert_eq!(classify_interface("eth0"), InterfaceKind::Ethernet);
        assert_eq!(classify_interface("enp3s0"), InterfaceKind::Ethernet);
        assert_eq!(classify_interface("wlan0"), InterfaceKind::Wireless);
        assert_eq!(classify_interface("wlp2s0"), InterfaceKind::Wireless);
        assert_eq!(classify_interface("docker0"), InterfaceKind::Virtual);
        assert_eq!(classify_interface("tun0"), InterfaceKind::Other);
    }

    #[test]
    fn ethernet_outranks_wireless_and_virtual() {
        assert!(InterfaceKind::Ethernet.rank() < InterfaceKind::Wireless.rank());
        assert!(InterfaceKind::Wireless.rank() < InterfaceKind::Virtual.rank());
    }

    #[test]
    fn identity_always_materializes() {
        let ident = SystemIdent::collect(None);
        assert!(!ident.agent_id.is_empty());
        assert!(!ident.hostname.is_empty());
        assert!(!ident.ip_address.is_empty());
    }

    #[test]
    fn agent_id_override_wins() {
        let ident = SystemIdent::collect(Some("agent-007".into()));
        assert_eq!(ident.agent_id, "agent-007");
    }

    #[test]
    fn agent_id_is_mac_without_separators() {
        let mac = "a1:b2:c3:d4:e5:f6";
        assert_eq!(mac.replace(':', ""), "a1b2c3d4e5f6");
    }
}

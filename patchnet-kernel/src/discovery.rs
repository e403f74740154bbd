//! Network discovery for the local subnet
//!
//! Produces the candidate host list for one orchestration run:
//! - Local IPv4 detection with loopback fallback
//! - Broadcast ping to warm the OS address-resolution cache
//! - ARP table parsing (Windows and Unix layouts)
//! - Best-effort reverse hostname resolution
//! - The local machine is always appended, even on a silent network

use crate::config::DiscoveryConf;
use crate::models::{HostDescriptor, Platform, UNKNOWN_MAC};
use futures::future::join_all;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct DiscoveryEngine {
    phase_timeout: Duration,
    resolver: Option<TokioAsyncResolver>,
}

impl DiscoveryEngine {
    pub fn new(cfg: &DiscoveryConf) -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("system resolver unavailable, hostnames will fall back to IPs: {e}");
                None
            }
        };
        Self {
            phase_timeout: Duration::from_secs(cfg.phase_timeout_secs),
            resolver,
        }
    }

    /// Discover hosts on the local /24. Never fails: every phase degrades to
    /// "nothing found" and the local descriptor is always present.
    pub async fn discover(&self) -> Vec<HostDescriptor> {
        let local_ip = local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST);
        let mut hosts = Vec::new();

        if !local_ip.is_loopback() {
            let prefix = subnet_prefix(local_ip);
            debug!("sweeping subnet {prefix}.0/24 from {local_ip}");

            // Non-fatal: the ping only encourages the ARP cache to fill.
            if timeout(self.phase_timeout, ping(&format!("{prefix}.255")))
                .await
                .is_err()
            {
                debug!("broadcast ping timed out");
            }

            let table = match timeout(self.phase_timeout, read_arp_table()).await {
                Ok(Some(table)) => table,
                Ok(None) | Err(_) => String::new(),
            };

            let peers: Vec<(Ipv4Addr, String)> = parse_arp_table(&table)
                .into_iter()
                .filter(|(ip, _)| *ip != local_ip && in_subnet(*ip, &prefix))
                .collect();

            let lookups = peers
                .iter()
                .map(|(ip, _)| self.resolve_hostname(*ip))
                .collect::<Vec<_>>();
            let names = join_all(lookups).await;

            for ((ip, mac), name) in peers.into_iter().zip(names) {
                let hostname = name.unwrap_or_else(|| ip.to_string());
                hosts.push(HostDescriptor::peer(ip.to_string(), mac, hostname));
            }
        }

        hosts.push(local_descriptor(local_ip));
        hosts
    }

    async fn resolve_hostname(&self, ip: Ipv4Addr) -> Option<String> {
        let resolver = self.resolver.as_ref()?;
        match timeout(self.phase_timeout, resolver.reverse_lookup(ip.into())).await {
            Ok(Ok(lookup)) => lookup
                .iter()
                .next()
                .map(|ptr| ptr.to_string().trim_end_matches('.').to_string()),
            Ok(Err(e)) => {
                debug!("reverse lookup for {ip} failed: {e}");
                None
            }
            Err(_) => {
                debug!("reverse lookup for {ip} timed out");
                None
            }
        }
    }
}

/// Local non-loopback IPv4, found by the routing table via a connected UDP
/// socket (no packet is sent).
fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_loopback() => Some(*addr.ip()),
        _ => None,
    }
}

pub(crate) fn subnet_prefix(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    format!("{a}.{b}.{c}")
}

fn in_subnet(ip: Ipv4Addr, prefix: &str) -> bool {
    subnet_prefix(ip) == prefix
}

async fn ping(addr: &str) {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("ping");
        c.args(["-n", "1", "-w", "1000", addr]);
        c
    } else {
        let mut c = Command::new("ping");
        c.args(["-c", "1", "-W", "1", addr]);
        c
    };
    match cmd.kill_on_drop(true).output().await {
        Ok(out) => debug!("broadcast ping exit: {:?}", out.status.code()),
        Err(e) => debug!("broadcast ping unavailable: {e}"),
    }
}

async fn read_arp_table() -> Option<String> {
    let out = Command::new("arp")
        .arg("-a")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| debug!("arp unavailable: {e}"))
        .ok()?;
    if !out.status.success() {
        debug!("arp -a exit: {:?}", out.status.code());
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Parse `arp -a` output into (IP, MAC) pairs, order preserved.
///
/// Handles both layouts:
///   Windows: `  10.0.0.2           aa-bb-cc-dd-ee-ff     dynamic`
///   Unix:    `? (10.0.0.2) at aa:bb:cc:dd:ee:ff [ether] on eth0`
/// Network/broadcast boundary addresses and multicast mappings are skipped.
pub(crate) fn parse_arp_table(output: &str) -> Vec<(Ipv4Addr, String)> {
    let mut seen = HashSet::new();
    let mut peers = Vec::new();

    for line in output.lines() {
        let mut ip = None;
        let mut mac = None;
        for token in line.split_whitespace() {
            if ip.is_none() {
                if let Ok(parsed) = token.trim_matches(|c| c == '(' || c == ')').parse::<Ipv4Addr>()
                {
                    ip = Some(parsed);
                    continue;
                }
            }
            if mac.is_none() && looks_like_mac(token) {
                mac = Some(token.to_lowercase().replace('-', ":"));
            }
        }
        let (Some(ip), Some(mac)) = (ip, mac) else { continue };
        let last_octet = ip.octets()[3];
        if last_octet == 0 || last_octet == 255 || ip.is_multicast() {
            continue;
        }
        if seen.insert(ip) {
            peers.push((ip, mac));
        }
    }
    peers
}

fn looks_like_mac(token: &str) -> bool {
    let octets: Vec<&str> = token.split(|c| c == ':' || c == '-').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

fn local_descriptor(local_ip: Ipv4Addr) -> HostDescriptor {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    HostDescriptor {
        ip_address: local_ip.to_string(),
        mac_address: local_mac(local_ip),
        hostname,
        platform: Platform::local(),
        is_local_host: true,
    }
}

/// MAC of the interface carrying the local IP, falling back to the primary
/// adapter, then to the unknown sentinel.
fn local_mac(local_ip: Ipv4Addr) -> String {
    let if_name = if_addrs::get_if_addrs().ok().and_then(|interfaces| {
        interfaces
            .into_iter()
            .find(|iface| match &iface.addr {
                if_addrs::IfAddr::V4(v4) => v4.ip == local_ip,
                _ => false,
            })
            .map(|iface| iface.name)
    });

    let mac = match if_name {
        Some(name) => mac_address::mac_address_by_name(&name).ok().flatten(),
        None => None,
    }
    .or_else(|| mac_address::get_mac_address().ok().flatten());

    match mac {
        Some(mac) => {
            let b = mac.bytes();
            format!(
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            )
        }
        None => UNKNOWN_MAC.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConf;

    const WINDOWS_ARP: &str = "\
Interface: 192.168.1.23 --- 0x5
  Internet Address      Physical Address      Type
  192.168.1.1           a4-2b-b0-11-22-33     dynamic
  192.168.1.50          08-00-27-aa-bb-cc     dynamic
  192.168.1.255         ff-ff-ff-ff-ff-ff     static
  224.0.0.22            01-00-5e-00-00-16     static
  239.255.255.250       01-00-5e-7f-ff-fa     static
";

    const UNIX_ARP: &str = "\
? (192.168.1.1) at a4:2b:b0:11:22:33 [ether] on eth0
gateway (192.168.1.254) at 00:11:22:33:44:55 [ether] on eth0
? (192.168.1.77) at <incomplete> on eth0
";

    #[test]
    fn parses_windows_layout_and_skips_boundary_and_multicast() {
        let peers = parse_arp_table(WINDOWS_ARP);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].0, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(peers[0].1, "a4:2b:b0:11:22:33");
        assert_eq!(peers[1].0, Ipv4Addr::new(192, 168, 1, 50));
    }

    #[test]
    fn parses_unix_layout_and_skips_incomplete_entries() {
        let peers = parse_arp_table(UNIX_ARP);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].1, "a4:2b:b0:11:22:33");
        assert_eq!(peers[1].0, Ipv4Addr::new(192, 168, 1, 254));
    }

    #[test]
    fn duplicate_ips_keep_first_entry() {
        let table = "\
? (10.0.0.5) at aa:aa:aa:aa:aa:aa [ether] on eth0
? (10.0.0.5) at bb:bb:bb:bb:bb:bb [ether] on eth1
";
        let peers = parse_arp_table(table);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].1, "aa:aa:aa:aa:aa:aa");
    }

    #[test]
    fn subnet_prefix_is_first_three_octets() {
        assert_eq!(subnet_prefix(Ipv4Addr::new(10, 1, 2, 3)), "10.1.2");
    }

    #[tokio::test]
    async fn discover_always_includes_exactly_one_local_host() {
        // Even when ping/arp are unavailable on the test machine (the
        // failures are swallowed), the local descriptor must be present.
        let engine = DiscoveryEngine::new(&DiscoveryConf { phase_timeout_secs: 2 });
        let hosts = engine.discover().await;

        assert!(!hosts.is_empty());
        assert_eq!(hosts.iter().filter(|h| h.is_local_host).count(), 1);
        assert!(hosts.last().unwrap().is_local_host);
        let local = hosts.last().unwrap();
        assert!(!local.hostname.is_empty());
        assert!(!local.ip_address.is_empty());
    }
}

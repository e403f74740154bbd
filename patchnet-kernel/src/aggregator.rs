//! Scan orchestration
//!
//! Fans one discovery run out to per-host scans: the local host through the
//! inventory scanner, every other host through the agent probe client.
//! Hosts are isolated from each other — a dead peer produces a failed entry
//! in the report, never an aborted batch.

use crate::discovery::DiscoveryEngine;
use crate::inventory::InventoryScanner;
use crate::models::{AggregateReport, HostDescriptor, ScanResult};
use crate::probe::ProbeClient;
use futures::stream::{self, StreamExt};
use tracing::info;

pub struct ScanAggregator {
    discovery: DiscoveryEngine,
    probe: ProbeClient,
    inventory: InventoryScanner,
    parallel_scans: usize,
}

impl ScanAggregator {
    pub fn new(
        discovery: DiscoveryEngine,
        probe: ProbeClient,
        inventory: InventoryScanner,
        parallel_scans: usize,
    ) -> Self {
        Self {
            discovery,
            probe,
            inventory,
            parallel_scans: parallel_scans.max(1),
        }
    }

    /// Discover the subnet and scan every host found.
    pub async fn scan_all_systems(&self) -> AggregateReport {
        let hosts = self.discovery.discover().await;
        if hosts.is_empty() {
            return AggregateReport {
                overall_succeeded: false,
                host_results: Vec::new(),
                summary: "no systems discovered on the local subnet".into(),
            };
        }

        let total = hosts.len();
        info!("discovered {total} hosts, scanning");
        let host_results = self.scan_hosts(hosts).await;

        let scanned = host_results.iter().filter(|r| r.succeeded).count();
        let patches: usize = host_results.iter().map(|r| r.patches.len()).sum();
        info!("scan complete: {scanned}/{total} hosts, {patches} applications");

        AggregateReport {
            overall_succeeded: true,
            host_results,
            summary: format!("successfully scanned {scanned} of {total} discovered hosts"),
        }
    }

    /// Scan hosts with bounded concurrency. `buffered` keeps results in
    /// discovery order regardless of completion order.
    pub(crate) async fn scan_hosts(&self, hosts: Vec<HostDescriptor>) -> Vec<ScanResult> {
        stream::iter(hosts)
            .map(|host| self.scan_host(host))
            .buffered(self.parallel_scans)
            .collect()
            .await
    }

    async fn scan_host(&self, host: HostDescriptor) -> ScanResult {
        if host.is_local_host {
            match self.inventory.scan_local().await {
                Ok(patches) => ScanResult::success(host, patches, None),
                Err(e) => ScanResult::failure(host, format!("local inventory scan failed: {e}")),
            }
        } else {
            self.probe.probe_and_scan(&host).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConf;
    use devkit::agent_stub::{free_port, StubAgentBuilder};
    use serde_json::json;
    use std::time::Duration;

    fn local_host() -> HostDescriptor {
        HostDescriptor {
            ip_address: "192.168.1.23".into(),
            mac_address: "aa:bb:cc:dd:ee:01".into(),
            hostname: "orchestrator".into(),
            platform: crate::models::Platform::local(),
            is_local_host: true,
        }
    }

    fn aggregator(scanner_cmd: &str) -> ScanAggregator {
        ScanAggregator::new(
            DiscoveryEngine::new(&DiscoveryConf { phase_timeout_secs: 1 }),
            ProbeClient::new(
                vec![0], // overridden per test via stub-port descriptors below
                Duration::from_millis(500),
                Duration::from_secs(2),
            )
            .unwrap(),
            InventoryScanner::new(scanner_cmd, Duration::from_secs(5)).unwrap(),
            4,
        )
    }

    fn aggregator_with_ports(scanner_cmd: &str, ports: Vec<u16>) -> ScanAggregator {
        ScanAggregator::new(
            DiscoveryEngine::new(&DiscoveryConf { phase_timeout_secs: 1 }),
            ProbeClient::new(ports, Duration::from_millis(500), Duration::from_secs(2)).unwrap(),
            InventoryScanner::new(scanner_cmd, Duration::from_secs(5)).unwrap(),
            4,
        )
    }

    #[tokio::test]
    async fn one_dead_host_does_not_abort_the_batch() {
        let agent = StubAgentBuilder::new()
            .patches(vec![json!({"name": "Firefox", "currentVersion": "120", "latestVersion": "121", "updateAvailable": true})])
            .spawn()
            .await
            .unwrap();

        let hosts = vec![
            HostDescriptor::peer("127.0.0.1", "aa:bb:cc:dd:ee:02", "peer-a"),
            HostDescriptor::peer("127.0.0.1", "aa:bb:cc:dd:ee:03", "peer-b"),
            local_host(),
        ];

        let agg = aggregator_with_ports(
            "definitely-not-a-real-binary-xyz",
            vec![agent.port],
        );
        let results = agg.scan_hosts(hosts).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].succeeded);
        assert!(results[1].succeeded);
        // Local scanner is broken: recorded as a failure, not an abort.
        assert!(!results[2].succeeded);
        assert!(results[2]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("local inventory scan failed"));
    }

    #[tokio::test]
    async fn unreachable_peer_is_isolated_and_order_is_preserved() {
        let agg = aggregator_with_ports(
            r#"echo '[{"name":"X"}]'"#,
            vec![free_port()],
        );
        let hosts = vec![
            HostDescriptor::peer("127.0.0.1", "aa:bb:cc:dd:ee:04", "peer-dead"),
            local_host(),
        ];
        let results = agg.scan_hosts(hosts).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].host.hostname, "peer-dead");
        assert!(!results[0].succeeded);
        assert!(results[1].host.is_local_host);
        assert!(results[1].succeeded);
        assert_eq!(results[1].patches.len(), 1);
    }

    #[tokio::test]
    async fn full_run_reports_overall_success_with_local_host() {
        let agg = aggregator(r#"echo '[]'"#);
        let report = agg.scan_all_systems().await;

        // Discovery always yields at least the local host.
        assert!(report.overall_succeeded);
        assert!(!report.host_results.is_empty());
        assert_eq!(
            report
                .host_results
                .iter()
                .filter(|r| r.host.is_local_host)
                .count(),
            1
        );
        assert!(report.summary.contains("discovered hosts"));
    }
}

//! Network discovery of model-serving nodes.
//!
//! Every host in an IPv4 CIDR block is probed on every configured port
//! with `GET /v1/models`. A 200 with a non-empty model list registers a
//! node `discovered_<host>_<port>` serving the first listed model.
//!
//! Probes run concurrently under a semaphore, but results are registered
//! in a fixed order (hosts ascending, ports in configured order) so node
//! IDs and benchmark order do not depend on which probe finishes first.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use hivegrid_core::config::DiscoveryConfig;
use hivegrid_core::{Node, NodeId};

use crate::client::NodeClient;
use crate::error::DiscoveryError;
use crate::registry::NodeRegistry;

/// Capability assigned to every discovered node.
pub const DISCOVERED_CAPABILITY: &str = "general";

/// Periodic subnet scanner feeding the registry.
pub struct Discovery {
    registry: NodeRegistry,
    client: NodeClient,
    config: DiscoveryConfig,
}

/// A host:port that answered the models probe.
#[derive(Debug, Clone, PartialEq)]
struct Found {
    host: Ipv4Addr,
    port: u16,
    model: String,
}

impl Discovery {
    pub fn new(registry: NodeRegistry, client: NodeClient, config: DiscoveryConfig) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    /// ID given to a node discovered at `host:port`.
    pub fn node_id(host: &str, port: u16) -> NodeId {
        format!("discovered_{host}_{port}")
    }

    /// Scan the configured range once.
    ///
    /// Returns the IDs of newly registered nodes. Unreachable hosts are
    /// skipped; only an unusable scan range fails the whole scan.
    pub async fn scan(&self) -> Result<Vec<NodeId>, DiscoveryError> {
        let hosts = expand_cidr(&self.config.scan_range)?;
        debug!(
            range = %self.config.scan_range,
            hosts = hosts.len(),
            ports = ?self.config.ports,
            "discovery scan starting"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_probes.max(1)));
        let mut probes = JoinSet::new();
        let mut order = 0usize;
        for host in &hosts {
            for &port in &self.config.ports {
                let sem = semaphore.clone();
                let client = self.client.clone();
                let timeout = self.config.timeout;
                let host = *host;
                let slot = order;
                order += 1;
                probes.spawn(async move {
                    let _permit = sem.acquire_owned().await.ok()?;
                    let address = format!("{host}:{port}");
                    match client.list_models(&address, timeout).await {
                        Ok(models) => match models.into_iter().next() {
                            Some(model) => Some((slot, Found { host, port, model })),
                            None => {
                                debug!(%address, "endpoint lists no models");
                                None
                            }
                        },
                        Err(e) => {
                            debug!(%address, error = %e, "probe failed");
                            None
                        }
                    }
                });
            }
        }

        let mut found = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(hit)) => found.push(hit),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }
        found.sort_by_key(|(slot, _)| *slot);

        let mut registered = Vec::new();
        for (_, hit) in found {
            let host = hit.host.to_string();
            let id = Self::node_id(&host, hit.port);
            if self.registry.contains(&id).await {
                continue;
            }

            let mut node = Node::new(id.clone(), host.clone(), hit.port);
            node.name = format!("Discovered-{host}");
            node.model = hit.model;
            node.capabilities = vec![DISCOVERED_CAPABILITY.to_string()];
            node.max_concurrent = 1;
            node.priority_weight = 1;

            if self.registry.register(node.clone()).await {
                info!(node_id = %id, model = %node.model, "discovered new node");
                if self.config.benchmark_on_discovery {
                    self.benchmark(&node).await;
                }
                registered.push(id);
            }
        }

        debug!(new_nodes = registered.len(), "discovery scan complete");
        Ok(registered)
    }

    /// Seed a node's response time with one minimal completion.
    async fn benchmark(&self, node: &Node) {
        match self.client.benchmark(node, self.config.timeout).await {
            Ok(elapsed) => {
                let secs = elapsed.as_secs_f64();
                self.registry.set_response_time(&node.id, secs).await;
                info!(node_id = %node.id, response_time = secs, "node benchmarked");
            }
            Err(e) => warn!(node_id = %node.id, error = %e, "benchmark failed"),
        }
    }

    /// Scan on a fixed period until shutdown.
    ///
    /// The first scan runs immediately. After a failed scan the next one
    /// comes after `retry_after` instead of the normal interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            range = %self.config.scan_range,
            interval = ?self.config.interval,
            "discovery loop started"
        );

        loop {
            let wait = match self.scan().await {
                Ok(_) => self.config.interval,
                Err(e) => {
                    error!(error = %e, "discovery scan failed");
                    self.config.retry_after
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    debug!("discovery loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Expand an IPv4 CIDR block into its usable host addresses, ascending.
///
/// Network and broadcast addresses are excluded, except for /31 and /32
/// blocks where every address is a host. A bare address is treated as /32.
pub fn expand_cidr(range: &str) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
    let invalid = |reason: &str| DiscoveryError::InvalidRange {
        range: range.to_string(),
        reason: reason.to_string(),
    };

    let (addr, prefix) = match range.trim().split_once('/') {
        Some((addr, prefix)) => (addr, prefix),
        None => (range.trim(), "32"),
    };
    let base: Ipv4Addr = addr.parse().map_err(|_| invalid("not an IPv4 address"))?;
    let prefix: u32 = match prefix.parse() {
        Ok(p) if p <= 32 => p,
        _ => return Err(invalid("prefix length must be 0-32")),
    };
    if prefix < 16 {
        return Err(invalid("ranges larger than /16 are not scanned"));
    }

    let host_bits = 32 - prefix;
    let size = 1u64 << host_bits;
    let network = u64::from(u32::from(base)) & !(size - 1);

    let hosts: Vec<Ipv4Addr> = if prefix >= 31 {
        (0..size).map(|i| Ipv4Addr::from((network + i) as u32)).collect()
    } else {
        (1..size - 1).map(|i| Ipv4Addr::from((network + i) as u32)).collect()
    };
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_slash_24() {
        let hosts = expand_cidr("192.168.1.0/24").unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
    }

    #[test]
    fn expand_normalizes_host_bits() {
        let hosts = expand_cidr("10.0.0.77/30").unwrap();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 0, 0, 77), Ipv4Addr::new(10, 0, 0, 78)]);
    }

    #[test]
    fn expand_single_host() {
        assert_eq!(expand_cidr("127.0.0.1/32").unwrap(), vec![Ipv4Addr::LOCALHOST]);
        assert_eq!(expand_cidr("127.0.0.1").unwrap(), vec![Ipv4Addr::LOCALHOST]);
    }

    #[test]
    fn expand_point_to_point() {
        let hosts = expand_cidr("10.0.0.0/31").unwrap();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[test]
    fn expand_rejects_garbage() {
        assert!(expand_cidr("invalid").is_err());
        assert!(expand_cidr("10.0.0.0/40").is_err());
        assert!(expand_cidr("10.0.0.0/8").is_err());
        assert!(expand_cidr("fe80::/64").is_err());
    }

    #[test]
    fn discovered_node_id_format() {
        assert_eq!(Discovery::node_id("10.0.0.5", 1234), "discovered_10.0.0.5_1234");
    }

    #[tokio::test]
    async fn scan_of_dead_range_registers_nothing() {
        let registry = NodeRegistry::new();
        let config = DiscoveryConfig {
            enabled: true,
            scan_range: "127.0.0.1/32".into(),
            ports: vec![1],
            timeout: std::time::Duration::from_millis(500),
            ..DiscoveryConfig::default()
        };
        let discovery = Discovery::new(registry.clone(), NodeClient::default(), config);

        let found = discovery.scan().await.unwrap();
        assert!(found.is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn scan_with_bad_range_is_an_error() {
        let config = DiscoveryConfig {
            scan_range: "not-a-range".into(),
            ..DiscoveryConfig::default()
        };
        let discovery = Discovery::new(NodeRegistry::new(), NodeClient::default(), config);
        assert!(discovery.scan().await.is_err());
    }
}

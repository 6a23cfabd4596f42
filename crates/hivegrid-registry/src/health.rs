//! Node health polling.
//!
//! Periodically fetches `GET /health` from every registered node and
//! stores the body on the node. When a node does not answer, a fallback
//! payload is stored instead:
//!
//! ```json
//! {"status": "online" | "offline", "active_jobs": 0, "load": 0.0}
//! ```
//!
//! where the status is `online` while the node was seen within the
//! offline window. Polling never feeds into selection scoring.

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info};

use hivegrid_core::config::HealthPollConfig;
use hivegrid_core::{Node, Payload, STATUS_OFFLINE, STATUS_ONLINE, epoch_secs};

use crate::client::NodeClient;
use crate::registry::NodeRegistry;

/// Background poller for node health endpoints.
pub struct HealthPoller {
    registry: NodeRegistry,
    client: NodeClient,
    config: HealthPollConfig,
}

impl HealthPoller {
    pub fn new(registry: NodeRegistry, client: NodeClient, config: HealthPollConfig) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    /// Poll every node once. Returns how many answered.
    pub async fn poll_once(&self) -> usize {
        let nodes = self.registry.snapshot().await;
        let mut reachable = 0;

        for node in nodes {
            match self.client.health(&node.address(), self.config.timeout).await {
                Ok(metrics) => {
                    reachable += 1;
                    self.registry.update_health(&node.id, metrics, true).await;
                }
                Err(e) => {
                    debug!(node_id = %node.id, error = %e, "health check failed");
                    let fallback = fallback_metrics(&node, self.config.offline_after.as_secs_f64(), epoch_secs());
                    self.registry.update_health(&node.id, fallback, false).await;
                }
            }
        }

        reachable
    }

    /// Poll on a fixed interval until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, "health poll loop started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reachable = self.poll_once().await;
                    debug!(reachable, "health poll complete");
                }
                _ = shutdown.changed() => {
                    debug!("health poll loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Metrics stored for a node whose health endpoint did not answer.
pub fn fallback_metrics(node: &Node, offline_after_secs: f64, now: f64) -> Payload {
    let status = if now - node.last_seen < offline_after_secs {
        STATUS_ONLINE
    } else {
        STATUS_OFFLINE
    };

    let mut metrics = Payload::new();
    metrics.insert("status".to_string(), json!(status));
    metrics.insert("active_jobs".to_string(), json!(node.active_jobs));
    metrics.insert("load".to_string(), json!(node.load()));
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fallback_reports_online_within_window() {
        let mut node = Node::new("a", "127.0.0.1", 1234);
        node.max_concurrent = 4;
        node.active_jobs = 1;
        node.last_seen = 1000.0;

        let m = fallback_metrics(&node, 30.0, 1010.0);
        assert_eq!(m["status"], "online");
        assert_eq!(m["active_jobs"], 1);
        assert_eq!(m["load"], 0.25);

        let m = fallback_metrics(&node, 30.0, 1030.0);
        assert_eq!(m["status"], "offline");
    }

    #[tokio::test]
    async fn unreachable_node_gets_fallback_metrics() {
        let mut node = Node::new("dead", "127.0.0.1", 1);
        node.last_seen = 0.0;
        let registry = NodeRegistry::from_nodes(vec![node]);
        let config = HealthPollConfig {
            timeout: Duration::from_millis(500),
            ..HealthPollConfig::default()
        };
        let poller = HealthPoller::new(registry.clone(), NodeClient::default(), config);

        assert_eq!(poller.poll_once().await, 0);
        let stored = registry.get("dead").await.unwrap();
        assert_eq!(stored.metrics["status"], "offline");
        assert_eq!(stored.last_seen, 0.0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let poller = HealthPoller::new(NodeRegistry::new(), NodeClient::default(), HealthPollConfig::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poll loop should stop")
            .unwrap();
    }
}

//! The node registry.
//!
//! Holds every known node, keyed by ID in ascending order. Nodes are never
//! removed, only disabled. Runtime counters are mutated under the
//! registry-wide write lock, and [`NodeRegistry::acquire`] selects and
//! reserves a slot in one critical section so two dispatches can never
//! oversubscribe a node.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use hivegrid_core::{Node, NodeId, Payload, epoch_secs};
use hivegrid_placement::{NodeScore, ScoringWeights, rank_nodes, select_node};

/// Shared, cloneable handle to the node set.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<BTreeMap<NodeId, Node>>>,
    weights: ScoringWeights,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with configured nodes.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let map = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        Self {
            nodes: Arc::new(RwLock::new(map)),
            weights: ScoringWeights::default(),
        }
    }

    /// Builder method: override the scoring weights.
    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Add a node unless one with the same ID exists.
    ///
    /// Returns `true` if the node was added.
    pub async fn register(&self, node: Node) -> bool {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            debug!(node_id = %node.id, "node already registered, skipping");
            return false;
        }
        info!(node_id = %node.id, address = %node.address(), model = %node.model, "node registered");
        nodes.insert(node.id.clone(), node);
        true
    }

    /// Insert or overwrite a node by ID.
    pub async fn upsert(&self, node: Node) {
        let mut nodes = self.nodes.write().await;
        nodes.insert(node.id.clone(), node);
    }

    pub async fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().await.contains_key(node_id)
    }

    /// Copy of every node, ascending by ID.
    pub async fn snapshot(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Number of enabled nodes.
    pub async fn enabled_count(&self) -> usize {
        self.nodes.read().await.values().filter(|n| n.enabled).count()
    }

    /// Enabled, non-saturated nodes.
    ///
    /// Nodes whose capabilities intersect `requirements` come first; each
    /// group stays in ascending ID order.
    pub async fn list_available(&self, requirements: &[String]) -> Vec<Node> {
        let nodes = self.nodes.read().await;
        let (mut matching, rest): (Vec<Node>, Vec<Node>) = nodes
            .values()
            .filter(|n| n.is_available())
            .cloned()
            .partition(|n| n.matches_any(requirements));
        matching.extend(rest);
        matching
    }

    /// Eligible nodes with their scores, best first.
    pub async fn rank(&self, requirements: &[String]) -> Vec<NodeScore> {
        let nodes = self.nodes.read().await;
        rank_nodes(nodes.values(), requirements, &self.weights)
    }

    /// Select the best node for `requirements` and reserve one slot on it.
    ///
    /// Returns a copy of the node as of the reservation, or `None` when no
    /// node is eligible.
    pub async fn acquire(&self, requirements: &[String]) -> Option<Node> {
        let mut nodes = self.nodes.write().await;
        let node_id = select_node(nodes.values(), requirements, &self.weights)?.id.clone();
        let node = nodes.get_mut(&node_id)?;
        node.active_jobs += 1;
        debug!(%node_id, active_jobs = node.active_jobs, "node slot reserved");
        Some(node.clone())
    }

    /// Give back a slot taken by [`acquire`](Self::acquire). Floors at zero.
    pub async fn release(&self, node_id: &str) {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(node_id) {
            Some(node) => node.active_jobs = node.active_jobs.saturating_sub(1),
            None => warn!(%node_id, "release for unknown node"),
        }
    }

    /// Fold one finished job into the node's statistics.
    ///
    /// `response_time` (seconds) is smoothed in only for successes.
    pub async fn record_outcome(&self, node_id: &str, success: bool, response_time: f64) {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(node_id) else {
            warn!(%node_id, "outcome for unknown node");
            return;
        };

        node.total_jobs += 1;
        if success {
            node.avg_response_time = if node.avg_response_time == 0.0 {
                response_time
            } else {
                (node.avg_response_time + response_time) / 2.0
            };
        } else {
            node.failed_jobs += 1;
        }
        node.success_rate = (node.total_jobs - node.failed_jobs) as f64 / node.total_jobs as f64;
    }

    /// Seed the response-time statistic (used by the discovery benchmark).
    pub async fn set_response_time(&self, node_id: &str, seconds: f64) {
        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.avg_response_time = seconds;
        }
    }

    /// Store a health payload. `last_seen` advances only when `reachable`.
    pub async fn update_health(&self, node_id: &str, metrics: Payload, reachable: bool) {
        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.metrics = metrics;
            if reachable {
                node.last_seen = epoch_secs();
            }
        }
    }

    /// Enable or disable a node. Returns `false` for unknown IDs.
    pub async fn set_enabled(&self, node_id: &str, enabled: bool) -> bool {
        match self.nodes.write().await.get_mut(node_id) {
            Some(node) => {
                node.enabled = enabled;
                info!(%node_id, enabled, "node enablement changed");
                true
            }
            None => false,
        }
    }
}

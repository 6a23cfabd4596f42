//! Node scoring for job placement.
//!
//! Each eligible node gets a weighted sum of:
//! - **Capability**: a flat bonus when any job requirement tag is among
//!   the node's capabilities
//! - **Load**: idle nodes favored, `(1 - active/max) * weight`
//! - **Reliability**: `success_rate * weight`
//! - **Latency**: `max(0, weight - avg_response_time)`
//! - **Priority**: the operator-assigned `priority_weight`, unscaled
//!
//! Disabled and saturated nodes are never eligible.

use std::cmp::Ordering;

use hivegrid_core::Node;
use serde::Serialize;

/// Weights for the scoring components.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringWeights {
    /// Bonus when requirements intersect capabilities.
    pub capability: f64,
    pub load: f64,
    pub reliability: f64,
    /// Response-time budget in seconds; faster nodes keep more of it.
    pub latency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            capability: 10.0,
            load: 5.0,
            reliability: 3.0,
            latency: 5.0,
        }
    }
}

/// Individual score components for debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub capability: f64,
    pub load: f64,
    pub reliability: f64,
    pub latency: f64,
    pub priority: f64,
}

/// Scored placement result for a single node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeScore {
    pub node_id: String,
    /// Total composite score (higher = better).
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Score a single node for a job with the given requirement tags.
///
/// Returns `None` when the node is disabled or saturated.
pub fn score_node(node: &Node, requirements: &[String], weights: &ScoringWeights) -> Option<NodeScore> {
    if !node.is_available() {
        return None;
    }

    let capability = if node.matches_any(requirements) {
        weights.capability
    } else {
        0.0
    };
    let load = (1.0 - node.load()) * weights.load;
    let reliability = node.success_rate * weights.reliability;
    let latency = (weights.latency - node.avg_response_time).max(0.0);
    let priority = f64::from(node.priority_weight);

    Some(NodeScore {
        node_id: node.id.clone(),
        score: capability + load + reliability + latency + priority,
        breakdown: ScoreBreakdown {
            capability,
            load,
            reliability,
            latency,
            priority,
        },
    })
}

/// Score all nodes and return the eligible ones, best first.
///
/// Equal scores are ordered by ascending node ID.
pub fn rank_nodes<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    requirements: &[String],
    weights: &ScoringWeights,
) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = nodes
        .into_iter()
        .filter_map(|n| score_node(n, requirements, weights))
        .collect();

    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    scores
}

/// Pick the highest-scoring eligible node.
///
/// The first maximum in iteration order wins, so callers iterating in
/// ascending ID order get the lowest-ID node on ties. Returns `None` iff
/// no node is eligible.
pub fn select_node<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    requirements: &[String],
    weights: &ScoringWeights,
) -> Option<&'a Node> {
    let mut best: Option<(&'a Node, f64)> = None;
    for node in nodes {
        let Some(scored) = score_node(node, requirements, weights) else {
            continue;
        };
        match best {
            Some((_, top)) if scored.score <= top => {}
            _ => best = Some((node, scored.score)),
        }
    }
    best.map(|(node, _)| node)
}

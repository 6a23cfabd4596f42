//! Node samples derived from the registry's view of a node.

use serde_json::Value;

use hivegrid_core::{Node, NodeMetrics, Payload, STATUS_OFFLINE, STATUS_ONLINE};

/// Build a `NodeMetrics` sample from a node's counters and its last
/// fetched health payload. Health fields the node doesn't report are zero.
///
/// A node is `online` when it is enabled and was seen within
/// `offline_after_secs` of `now`.
pub fn node_sample(node: &Node, now: f64, offline_after_secs: f64) -> NodeMetrics {
    let online = node.enabled && now - node.last_seen < offline_after_secs;
    let metric = |key: &str| number(&node.metrics, key);

    NodeMetrics {
        node_id: node.id.clone(),
        timestamp: now,
        response_time: node.avg_response_time,
        tokens_per_second: metric("tokens_per_second"),
        active_jobs: node.active_jobs,
        queue_size: metric("queue_size") as u32,
        memory_usage_mb: metric("memory_usage_mb"),
        cpu_percent: metric("cpu_percent"),
        gpu_utilization: metric("gpu_utilization"),
        gpu_memory_used: metric("gpu_memory_used"),
        gpu_memory_total: metric("gpu_memory_total"),
        model_name: node.model.clone(),
        status: if online { STATUS_ONLINE } else { STATUS_OFFLINE }.to_string(),
    }
}

fn number(payload: &Payload, key: &str) -> f64 {
    payload.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

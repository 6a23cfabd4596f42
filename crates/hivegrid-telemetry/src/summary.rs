//! Cluster summary and efficiency figures derived from the histories.

use std::collections::BTreeMap;

use serde::Serialize;

use hivegrid_core::{NodeId, NodeMetrics, STATUS_ONLINE, SystemMetrics};

use crate::history::MetricsHistory;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub timestamp: f64,
    pub system: SystemSummary,
    pub network: NetworkThroughput,
    pub gpus: Vec<GpuSummary>,
    pub nodes: BTreeMap<NodeId, NodeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSummary {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_usage_percent: f64,
    pub process_count: usize,
    pub load_average: Vec<f64>,
}

/// MB/s between the two most recent samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkThroughput {
    pub sent_mbps: f64,
    pub recv_mbps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuSummary {
    pub name: String,
    pub utilization: f64,
    pub memory_percent: f64,
    pub temperature: f64,
}

/// Latest recorded sample for one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub status: String,
    pub active_jobs: u32,
    pub queue_size: u32,
    pub response_time: f64,
    pub tokens_per_second: f64,
    pub cpu_percent: f64,
    pub gpu_utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterEfficiency {
    pub average_utilization: f64,
    pub average_response_time: f64,
    pub total_throughput: f64,
    pub efficiency_score: f64,
}

impl ClusterSummary {
    /// `None` until at least one system sample exists.
    pub fn build(
        system: &MetricsHistory<SystemMetrics>,
        nodes: &BTreeMap<NodeId, MetricsHistory<NodeMetrics>>,
    ) -> Option<Self> {
        let current = system.latest()?;

        let network = system
            .last_two()
            .map(|(prev, latest)| throughput(prev, latest))
            .unwrap_or_default();

        let gpus = current
            .gpu_metrics
            .iter()
            .map(|g| GpuSummary {
                name: g.name.clone(),
                utilization: g.utilization,
                memory_percent: g.memory_percent,
                temperature: g.temperature,
            })
            .collect();

        let nodes = nodes
            .iter()
            .filter_map(|(id, history)| {
                let latest = history.latest()?;
                Some((
                    id.clone(),
                    NodeSummary {
                        status: latest.status.clone(),
                        active_jobs: latest.active_jobs,
                        queue_size: latest.queue_size,
                        response_time: latest.response_time,
                        tokens_per_second: latest.tokens_per_second,
                        cpu_percent: latest.cpu_percent,
                        gpu_utilization: latest.gpu_utilization,
                    },
                ))
            })
            .collect();

        Some(Self {
            timestamp: current.timestamp,
            system: SystemSummary {
                cpu_percent: current.cpu_percent,
                memory_percent: current.memory_percent,
                disk_usage_percent: current.disk_usage_percent,
                process_count: current.process_count,
                load_average: current.load_average.clone(),
            },
            network,
            gpus,
            nodes,
        })
    }
}

impl ClusterEfficiency {
    /// Aggregate over nodes whose latest sample reports `online`.
    /// `None` when no node has an online sample.
    pub fn compute(nodes: &BTreeMap<NodeId, MetricsHistory<NodeMetrics>>) -> Option<Self> {
        let mut online = 0usize;
        let mut utilization = 0.0;
        let mut response_time = 0.0;
        let mut throughput = 0.0;

        for latest in nodes.values().filter_map(MetricsHistory::latest) {
            if latest.status != STATUS_ONLINE {
                continue;
            }
            utilization += if latest.gpu_utilization > 0.0 {
                latest.gpu_utilization
            } else {
                latest.cpu_percent
            };
            response_time += latest.response_time;
            throughput += latest.tokens_per_second;
            online += 1;
        }

        if online == 0 {
            return None;
        }

        let n = online as f64;
        Some(Self {
            average_utilization: utilization / n,
            average_response_time: response_time / n,
            total_throughput: throughput,
            efficiency_score: throughput / f64::max(response_time, 1.0) * 100.0,
        })
    }
}

fn throughput(prev: &SystemMetrics, latest: &SystemMetrics) -> NetworkThroughput {
    let elapsed = latest.timestamp - prev.timestamp;
    if elapsed <= 0.0 {
        return NetworkThroughput::default();
    }
    // Counters can reset when interfaces come and go; clamp to zero.
    let sent = latest.network_bytes_sent.saturating_sub(prev.network_bytes_sent) as f64;
    let recv = latest.network_bytes_recv.saturating_sub(prev.network_bytes_recv) as f64;
    NetworkThroughput {
        sent_mbps: sent / elapsed / BYTES_PER_MB,
        recv_mbps: recv / elapsed / BYTES_PER_MB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivegrid_core::{GpuMetrics, STATUS_OFFLINE};

    fn system(ts: f64, sent: u64, recv: u64) -> SystemMetrics {
        SystemMetrics {
            timestamp: ts,
            cpu_percent: 12.5,
            memory_percent: 40.0,
            disk_usage_percent: 55.0,
            network_bytes_sent: sent,
            network_bytes_recv: recv,
            process_count: 321,
            load_average: vec![0.5, 0.4, 0.3],
            gpu_metrics: vec![GpuMetrics {
                index: 0,
                name: "RTX 4090".into(),
                memory_used: 8.0,
                memory_total: 24.0,
                memory_free: 16.0,
                memory_percent: 33.3,
                utilization: 71.0,
                temperature: 64.0,
                power_draw: 220.0,
            }],
        }
    }

    fn node(id: &str, status: &str, rt: f64, tps: f64, cpu: f64, gpu: f64) -> NodeMetrics {
        NodeMetrics {
            node_id: id.into(),
            timestamp: 100.0,
            response_time: rt,
            tokens_per_second: tps,
            active_jobs: 1,
            queue_size: 2,
            memory_usage_mb: 512.0,
            cpu_percent: cpu,
            gpu_utilization: gpu,
            gpu_memory_used: 0.0,
            gpu_memory_total: 0.0,
            model_name: "m1".into(),
            status: status.into(),
        }
    }

    fn histories(samples: Vec<NodeMetrics>) -> BTreeMap<NodeId, MetricsHistory<NodeMetrics>> {
        let mut map: BTreeMap<NodeId, MetricsHistory<NodeMetrics>> = BTreeMap::new();
        for s in samples {
            map.entry(s.node_id.clone())
                .or_insert_with(|| MetricsHistory::new(10))
                .push(s);
        }
        map
    }

    #[test]
    fn summary_requires_a_sample() {
        let empty = MetricsHistory::new(10);
        assert!(ClusterSummary::build(&empty, &BTreeMap::new()).is_none());
    }

    #[test]
    fn single_sample_has_zero_throughput() {
        let mut h = MetricsHistory::new(10);
        h.push(system(10.0, 1_000, 2_000));
        let s = ClusterSummary::build(&h, &BTreeMap::new()).unwrap();
        assert_eq!(s.network, NetworkThroughput::default());
        assert_eq!(s.system.process_count, 321);
        assert_eq!(s.gpus[0].utilization, 71.0);
    }

    #[test]
    fn throughput_from_last_two_samples() {
        let mut h = MetricsHistory::new(10);
        h.push(system(0.0, 0, 0));
        h.push(system(10.0, 0, 0));
        h.push(system(12.0, 4 * 1024 * 1024, 2 * 1024 * 1024));
        let s = ClusterSummary::build(&h, &BTreeMap::new()).unwrap();
        assert_eq!(s.network.sent_mbps, 2.0);
        assert_eq!(s.network.recv_mbps, 1.0);
        assert_eq!(s.timestamp, 12.0);
    }

    #[test]
    fn zero_elapsed_time_has_zero_throughput() {
        let mut h = MetricsHistory::new(10);
        h.push(system(5.0, 0, 0));
        h.push(system(5.0, 1 << 20, 1 << 20));
        let s = ClusterSummary::build(&h, &BTreeMap::new()).unwrap();
        assert_eq!(s.network, NetworkThroughput::default());
    }

    #[test]
    fn summary_lists_latest_node_sample() {
        let mut h = MetricsHistory::new(10);
        h.push(system(1.0, 0, 0));
        let mut older = node("a", STATUS_ONLINE, 9.0, 1.0, 1.0, 0.0);
        older.timestamp = 50.0;
        let nodes = histories(vec![older, node("a", STATUS_OFFLINE, 2.0, 30.0, 5.0, 0.0)]);
        let s = ClusterSummary::build(&h, &nodes).unwrap();
        assert_eq!(s.nodes["a"].status, STATUS_OFFLINE);
        assert_eq!(s.nodes["a"].tokens_per_second, 30.0);
    }

    #[test]
    fn efficiency_over_online_nodes() {
        let nodes = histories(vec![
            node("a", STATUS_ONLINE, 2.0, 40.0, 30.0, 80.0),
            node("b", STATUS_ONLINE, 4.0, 20.0, 50.0, 0.0),
            node("c", STATUS_OFFLINE, 100.0, 999.0, 99.0, 99.0),
        ]);
        let e = ClusterEfficiency::compute(&nodes).unwrap();
        assert_eq!(e.average_utilization, 65.0);
        assert_eq!(e.average_response_time, 3.0);
        assert_eq!(e.total_throughput, 60.0);
        assert_eq!(e.efficiency_score, 1000.0);
    }

    #[test]
    fn efficiency_clamps_small_response_time() {
        let nodes = histories(vec![node("a", STATUS_ONLINE, 0.25, 10.0, 0.0, 0.0)]);
        assert_eq!(ClusterEfficiency::compute(&nodes).unwrap().efficiency_score, 1000.0);
    }

    #[test]
    fn efficiency_empty_without_online_nodes() {
        assert!(ClusterEfficiency::compute(&BTreeMap::new()).is_none());
        let nodes = histories(vec![node("a", STATUS_OFFLINE, 1.0, 1.0, 1.0, 1.0)]);
        assert!(ClusterEfficiency::compute(&nodes).is_none());
    }
}

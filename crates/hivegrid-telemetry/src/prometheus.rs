//! Prometheus text exposition format.
//!
//! Renders the current cluster summary for scraping by a Prometheus
//! server or compatible agent.

use crate::summary::{ClusterEfficiency, ClusterSummary};

/// Render the cluster summary (and efficiency, when known) as gauges.
///
/// Host gauges are unlabelled, accelerator gauges carry a `gpu` label
/// and per-node gauges a `node` label.
pub fn render_prometheus(
    summary: Option<&ClusterSummary>,
    efficiency: Option<&ClusterEfficiency>,
) -> String {
    let mut out = String::new();

    if let Some(s) = summary {
        gauge(&mut out, "hivegrid_cpu_percent", "Host CPU usage percent.", s.system.cpu_percent);
        gauge(&mut out, "hivegrid_memory_percent", "Host memory usage percent.", s.system.memory_percent);
        gauge(
            &mut out,
            "hivegrid_disk_usage_percent",
            "Root filesystem usage percent.",
            s.system.disk_usage_percent,
        );
        gauge(
            &mut out,
            "hivegrid_process_count",
            "Number of host processes.",
            s.system.process_count as f64,
        );
        gauge(&mut out, "hivegrid_network_sent_mbps", "Outbound network throughput in MB/s.", s.network.sent_mbps);
        gauge(&mut out, "hivegrid_network_recv_mbps", "Inbound network throughput in MB/s.", s.network.recv_mbps);
    }

    out.push_str("# HELP hivegrid_gpu_utilization_percent Accelerator utilization percent.\n");
    out.push_str("# TYPE hivegrid_gpu_utilization_percent gauge\n");
    for g in summary.iter().flat_map(|s| &s.gpus) {
        out.push_str(&format!(
            "hivegrid_gpu_utilization_percent{{gpu=\"{}\"}} {:.2}\n",
            escape(&g.name),
            g.utilization
        ));
    }

    out.push_str("# HELP hivegrid_gpu_memory_percent Accelerator memory usage percent.\n");
    out.push_str("# TYPE hivegrid_gpu_memory_percent gauge\n");
    for g in summary.iter().flat_map(|s| &s.gpus) {
        out.push_str(&format!(
            "hivegrid_gpu_memory_percent{{gpu=\"{}\"}} {:.2}\n",
            escape(&g.name),
            g.memory_percent
        ));
    }

    out.push_str("# HELP hivegrid_node_response_time_seconds Latest node response time.\n");
    out.push_str("# TYPE hivegrid_node_response_time_seconds gauge\n");
    for (id, n) in summary.iter().flat_map(|s| &s.nodes) {
        out.push_str(&format!(
            "hivegrid_node_response_time_seconds{{node=\"{}\"}} {:.4}\n",
            escape(id),
            n.response_time
        ));
    }

    out.push_str("# HELP hivegrid_node_tokens_per_second Latest node throughput.\n");
    out.push_str("# TYPE hivegrid_node_tokens_per_second gauge\n");
    for (id, n) in summary.iter().flat_map(|s| &s.nodes) {
        out.push_str(&format!(
            "hivegrid_node_tokens_per_second{{node=\"{}\"}} {:.2}\n",
            escape(id),
            n.tokens_per_second
        ));
    }

    out.push_str("# HELP hivegrid_node_active_jobs Jobs running on the node.\n");
    out.push_str("# TYPE hivegrid_node_active_jobs gauge\n");
    for (id, n) in summary.iter().flat_map(|s| &s.nodes) {
        out.push_str(&format!(
            "hivegrid_node_active_jobs{{node=\"{}\"}} {}\n",
            escape(id),
            n.active_jobs
        ));
    }

    if let Some(e) = efficiency {
        gauge(
            &mut out,
            "hivegrid_efficiency_score",
            "Total throughput over total response time, times 100.",
            e.efficiency_score,
        );
    }

    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value:.2}\n"));
}

fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

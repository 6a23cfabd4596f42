//! Threshold alerts over a single system sample.

use serde::Serialize;

use hivegrid_core::SystemMetrics;
use hivegrid_core::config::AlertThresholds;

/// One threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Compare `metrics` against every threshold. A value must be strictly
/// above its threshold to alert; nothing is deduplicated across samples.
pub fn evaluate(metrics: &SystemMetrics, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if metrics.cpu_percent > thresholds.cpu_percent {
        alerts.push(Alert {
            metric: "cpu_percent".into(),
            value: metrics.cpu_percent,
            threshold: thresholds.cpu_percent,
            message: format!("High CPU usage: {:.1}%", metrics.cpu_percent),
        });
    }

    if metrics.memory_percent > thresholds.memory_percent {
        alerts.push(Alert {
            metric: "memory_percent".into(),
            value: metrics.memory_percent,
            threshold: thresholds.memory_percent,
            message: format!("High memory usage: {:.1}%", metrics.memory_percent),
        });
    }

    for gpu in &metrics.gpu_metrics {
        if gpu.memory_percent > thresholds.gpu_memory_percent {
            alerts.push(Alert {
                metric: format!("gpu{}_memory_percent", gpu.index),
                value: gpu.memory_percent,
                threshold: thresholds.gpu_memory_percent,
                message: format!(
                    "High GPU memory usage on {}: {:.1}%",
                    gpu.name, gpu.memory_percent
                ),
            });
        }
    }

    alerts
}

//! Metrics export to JSON or a flattened CSV table.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use hivegrid_core::{NodeId, NodeMetrics, SystemMetrics};

use crate::error::TelemetryError;

pub const CSV_HEADER: &str = "Type,Timestamp,Metric,Value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    /// `.csv` paths export as CSV, anything else as JSON.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

impl FromStr for ExportFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(TelemetryError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Everything captured in one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    pub export_timestamp: f64,
    pub hours: f64,
    pub system_metrics: Vec<SystemMetrics>,
    pub node_metrics: BTreeMap<NodeId, Vec<NodeMetrics>>,
}

impl MetricsExport {
    pub fn render(&self, format: ExportFormat) -> Result<String, TelemetryError> {
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ExportFormat::Csv => Ok(self.to_csv()),
        }
    }

    /// One row per metric per sample. System rows carry cpu, memory and
    /// disk percentages; node rows are typed `node:<id>`.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(CSV_HEADER);
        out.push('\n');

        for m in &self.system_metrics {
            for (metric, value) in [
                ("cpu_percent", m.cpu_percent),
                ("memory_percent", m.memory_percent),
                ("disk_usage_percent", m.disk_usage_percent),
            ] {
                let _ = writeln!(out, "system,{},{metric},{value}", m.timestamp);
            }
        }

        for (node_id, samples) in &self.node_metrics {
            for m in samples {
                for (metric, value) in [
                    ("response_time", m.response_time),
                    ("tokens_per_second", m.tokens_per_second),
                    ("cpu_percent", m.cpu_percent),
                    ("gpu_utilization", m.gpu_utilization),
                ] {
                    let _ = writeln!(out, "node:{node_id},{},{metric},{value}", m.timestamp);
                }
            }
        }

        out
    }
}

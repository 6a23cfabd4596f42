//! hivegrid-telemetry: host and node observability for a hivegrid cluster.
//!
//! Samples host CPU, memory, disk, network, process and accelerator
//! metrics on a fixed interval, keeps bounded time-ordered histories,
//! raises threshold alerts, and derives cluster summaries.
//!
//! # Architecture
//!
//! ```text
//! TelemetryCollector
//!   ├── run loop ── MetricsSource::sample() ── HostSampler (sysinfo + nvidia-smi)
//!   │                 ├── MetricsHistory<SystemMetrics>   (ring buffer + retention)
//!   │                 └── alerts::evaluate() → warn!(alert = ...)
//!   ├── record_node_metrics() → MetricsHistory<NodeMetrics> per node
//!   │                 └── node_sample() builds one from a registry Node
//!   ├── get_cluster_summary() / calculate_cluster_efficiency()
//!   └── export_metrics() → JSON | CSV
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod alerts;
pub mod collector;
pub mod error;
pub mod export;
pub mod history;
pub mod node_sample;
pub mod prometheus;
pub mod sampler;
pub mod summary;

pub use alerts::{Alert, evaluate};
pub use collector::TelemetryCollector;
pub use error::{TelemetryError, TelemetryResult};
pub use export::{ExportFormat, MetricsExport};
pub use history::{MetricsHistory, Timestamped};
pub use node_sample::node_sample;
pub use prometheus::render_prometheus;
pub use sampler::{HostSampler, MetricsSource, parse_nvidia_smi};
pub use summary::{ClusterEfficiency, ClusterSummary, GpuSummary, NetworkThroughput, NodeSummary, SystemSummary};

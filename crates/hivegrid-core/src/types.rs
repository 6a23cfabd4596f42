//! Domain types for hivegrid.
//!
//! These types describe jobs flowing through the dispatcher, the compute
//! nodes that execute them, and the telemetry records sampled alongside.
//! All types are serializable to/from JSON for status reporting and
//! metrics export.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Unique identifier for a job.
pub type JobId = String;

/// Unique identifier for a compute node.
pub type NodeId = String;

/// Opaque key/value map carried by jobs (payloads and results).
pub type Payload = serde_json::Map<String, Value>;

/// Node status string reported by telemetry for reachable nodes.
pub const STATUS_ONLINE: &str = "online";

/// Node status string reported by telemetry for unreachable nodes.
pub const STATUS_OFFLINE: &str = "offline";

// ── Job ───────────────────────────────────────────────────────────

/// The kind of work a job asks a node to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Chat,
    Refactor,
    Lint,
    Codegen,
    DocQuery,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Chat,
        JobKind::Refactor,
        JobKind::Lint,
        JobKind::Codegen,
        JobKind::DocQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Chat => "chat",
            JobKind::Refactor => "refactor",
            JobKind::Lint => "lint",
            JobKind::Codegen => "codegen",
            JobKind::DocQuery => "doc_query",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a job kind string does not name a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job kind: {0}")]
pub struct UnknownJobKind(pub String);

impl FromStr for JobKind {
    type Err = UnknownJobKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(JobKind::Chat),
            "refactor" => Ok(JobKind::Refactor),
            "lint" => Ok(JobKind::Lint),
            "codegen" => Ok(JobKind::Codegen),
            "doc_query" | "doc-query" => Ok(JobKind::DocQuery),
            _ => Err(UnknownJobKind(s.to_string())),
        }
    }
}

/// Dispatch preference class. Lower sorts first: urgent < normal < bulk.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Urgent = 1,
    #[default]
    Normal = 2,
    Bulk = 3,
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Urgent => write!(f, "urgent"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::Bulk => write!(f, "bulk"),
        }
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(JobPriority::Urgent),
            "normal" => Ok(JobPriority::Normal),
            "bulk" => Ok(JobPriority::Bulk),
            other => Err(format!("unknown job priority: {other}")),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Retrying => write!(f, "retrying"),
        }
    }
}

/// A single unit of requested work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub priority: JobPriority,
    /// Kind-specific inputs (messages, file_path, description, ...).
    pub payload: Payload,
    /// Unix timestamp (fractional seconds) of submission.
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub status: JobStatus,
    pub assigned_node: Option<NodeId>,
    pub result: Option<Payload>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Job {
    /// Default bound on external resubmissions.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(id: JobId, kind: JobKind, priority: JobPriority, payload: Payload) -> Self {
        Self {
            id,
            kind,
            priority,
            payload,
            created_at: crate::time::epoch_secs(),
            started_at: None,
            completed_at: None,
            status: JobStatus::Queued,
            assigned_node: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Builder method: set the resubmission bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Capability tags the job declares under `payload.requirements`.
    pub fn requirements(&self) -> Vec<String> {
        self.payload
            .get("requirements")
            .and_then(Value::as_array)
            .map(|reqs| {
                reqs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A string payload field, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Whether a FAILED job may still be resubmitted.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A remote model-serving endpoint and its runtime statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Model served by the endpoint.
    pub model: String,
    /// Accelerator descriptor (free-form, e.g. "RTX 4090").
    pub gpu: String,
    /// Job kinds / domains the node is suited for.
    pub capabilities: Vec<String>,
    pub max_concurrent: u32,
    /// Operator-assigned preference, added to the selection score as-is.
    pub priority_weight: u32,
    pub enabled: bool,

    // Runtime statistics.
    pub active_jobs: u32,
    /// Finished jobs, successful or not.
    pub total_jobs: u64,
    pub failed_jobs: u64,
    /// Fraction of finished jobs that succeeded, in [0, 1].
    pub success_rate: f64,
    /// Smoothed response time in seconds (0 = never measured).
    pub avg_response_time: f64,
    /// Unix timestamp of the last successful health response.
    pub last_seen: f64,
    /// Last-fetched health payload.
    pub metrics: Payload,
}

impl Node {
    /// Create an enabled node with fresh statistics.
    pub fn new(id: impl Into<NodeId>, host: impl Into<String>, port: u16) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            host: host.into(),
            port,
            model: "unknown".to_string(),
            gpu: "unknown".to_string(),
            capabilities: Vec::new(),
            max_concurrent: 1,
            priority_weight: 1,
            enabled: true,
            active_jobs: 0,
            total_jobs: 0,
            failed_jobs: 0,
            success_rate: 1.0,
            avg_response_time: 0.0,
            last_seen: crate::time::epoch_secs(),
            metrics: Payload::new(),
        }
    }

    /// `host:port` address of the node's HTTP endpoint.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the node is running as many jobs as it allows.
    pub fn is_saturated(&self) -> bool {
        self.active_jobs >= self.max_concurrent
    }

    /// Enabled and not saturated.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.is_saturated()
    }

    /// Fraction of concurrency slots in use.
    pub fn load(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 0.0;
        }
        self.active_jobs as f64 / self.max_concurrent as f64
    }

    /// Whether any of `tags` is among the node's capabilities.
    pub fn matches_any(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.capabilities.contains(t))
    }
}

// ── Telemetry ─────────────────────────────────────────────────────

/// One accelerator reading. Memory figures are in MiB.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuMetrics {
    pub index: u32,
    pub name: String,
    pub memory_used: f64,
    pub memory_total: f64,
    pub memory_free: f64,
    pub memory_percent: f64,
    pub utilization: f64,
    pub temperature: f64,
    /// Watts.
    pub power_draw: f64,
}

/// Host resource sample taken once per telemetry tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_usage_percent: f64,
    /// Cumulative counters; consumers derive throughput from deltas.
    pub network_bytes_sent: u64,
    pub network_bytes_recv: u64,
    pub process_count: usize,
    /// 1/5/15 minute load averages; empty where unsupported.
    pub load_average: Vec<f64>,
    pub gpu_metrics: Vec<GpuMetrics>,
}

/// Per-node performance sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMetrics {
    pub node_id: NodeId,
    pub timestamp: f64,
    /// Seconds.
    pub response_time: f64,
    pub tokens_per_second: f64,
    pub active_jobs: u32,
    pub queue_size: u32,
    pub memory_usage_mb: f64,
    pub cpu_percent: f64,
    pub gpu_utilization: f64,
    pub gpu_memory_used: f64,
    pub gpu_memory_total: f64,
    pub model_name: String,
    pub status: String,
}

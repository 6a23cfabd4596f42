//! hivegrid.toml configuration parser.
//!
//! Every section has defaults, so an empty file is a valid (node-less)
//! configuration. Durations are written as human strings (`"500ms"`,
//! `"5s"`, `"5m"`, `"1h"`) or as a bare integer number of seconds.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Job, Node};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster: ClusterSettings,
    pub monitoring: MonitoringConfig,
    pub prompts: PromptConfig,
    /// Statically configured nodes, keyed by node ID.
    pub nodes: BTreeMap<String, NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Bearer token attached to every node request when set.
    pub api_key: Option<String>,
    /// Default `max_retries` for submitted jobs.
    pub retry_attempts: u32,
    /// Size of the bounded worker pool.
    pub workers: usize,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// Pause after requeueing a job no node could take.
    #[serde(with = "duration_str")]
    pub requeue_backoff: Duration,
    pub api_port: u16,
    pub health: HealthPollConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            retry_attempts: Job::DEFAULT_MAX_RETRIES,
            workers: 10,
            request_timeout: Duration::from_secs(60),
            requeue_backoff: Duration::from_secs(1),
            api_port: 8470,
            health: HealthPollConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPollConfig {
    #[serde(with = "duration_str")]
    pub interval: Duration,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// A node not seen for this long is reported offline.
    #[serde(with = "duration_str")]
    pub offline_after: Duration,
}

impl Default for HealthPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            offline_after: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// IPv4 CIDR block to scan, e.g. `192.168.1.0/24`.
    pub scan_range: String,
    pub ports: Vec<u16>,
    /// Per-probe timeout.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Period between scans.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Backoff after a scan fails as a whole.
    #[serde(with = "duration_str")]
    pub retry_after: Duration,
    pub max_concurrent_probes: usize,
    pub benchmark_on_discovery: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_range: "192.168.1.0/24".to_string(),
            ports: vec![1234],
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(300),
            retry_after: Duration::from_secs(60),
            max_concurrent_probes: 64,
            benchmark_on_discovery: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Sampling period.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Ring-buffer capacity per history.
    pub history_capacity: usize,
    pub retention_hours: f64,
    pub enable_gpu: bool,
    pub enable_bandwidth: bool,
    pub alert_thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            history_capacity: 1000,
            retention_hours: 24.0,
            enable_gpu: true,
            enable_bandwidth: true,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub gpu_memory_percent: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 85.0,
            gpu_memory_percent: 90.0,
        }
    }
}

/// Prompt toggle overrides, by toggle name (`enforce_typing = false`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    pub toggles: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    #[serde(default = "default_gpu")]
    pub gpu: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_one")]
    pub max_concurrent: u32,
    #[serde(default = "default_one")]
    pub priority_weight: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_gpu() -> String {
    "unknown".to_string()
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl NodeConfig {
    /// Build a runtime node with fresh statistics.
    pub fn to_node(&self, id: &str) -> Node {
        let mut node = Node::new(id, self.host.clone(), self.port);
        node.name = self.name.clone();
        node.model = self.model.clone();
        node.gpu = self.gpu.clone();
        node.capabilities = self.capabilities.clone();
        node.max_concurrent = self.max_concurrent;
        node.priority_weight = self.priority_weight;
        node.enabled = self.enabled;
        node
    }
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ClusterConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Runtime nodes for every configured entry, ascending by ID.
    pub fn configured_nodes(&self) -> Vec<Node> {
        self.nodes
            .iter()
            .map(|(id, cfg)| cfg.to_node(id))
            .collect()
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration in the shortest form `parse_duration` reads back.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{ms}ms")
    } else if ms % 3_600_000 == 0 && ms > 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else {
        format!("{}s", ms / 1000)
    }
}

/// Serde adapter for human-readable durations.
mod duration_str {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration such as \"5s\", \"500ms\", \"5m\" or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                super::parse_duration(v)
                    .ok_or_else(|| E::custom(format!("invalid duration: {v:?}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration cannot be negative"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

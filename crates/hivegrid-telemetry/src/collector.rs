//! Telemetry collector: periodic host sampling and per-node histories.
//!
//! The sampling loop owns the writes to the system history. Node samples
//! arrive from outside through `record_node_metrics`. Readers always get
//! cloned snapshots.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use hivegrid_core::config::MonitoringConfig;
use hivegrid_core::{NodeId, NodeMetrics, SystemMetrics, epoch_secs};

use crate::alerts::{self, Alert};
use crate::error::{TelemetryError, TelemetryResult};
use crate::export::{ExportFormat, MetricsExport};
use crate::history::MetricsHistory;
use crate::sampler::{HostSampler, MetricsSource};
use crate::summary::{ClusterEfficiency, ClusterSummary};

const SECS_PER_HOUR: f64 = 3600.0;

struct Inner {
    config: MonitoringConfig,
    source: Arc<dyn MetricsSource>,
    system: RwLock<MetricsHistory<SystemMetrics>>,
    nodes: RwLock<BTreeMap<NodeId, MetricsHistory<NodeMetrics>>>,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct TelemetryCollector {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl TelemetryCollector {
    /// Collector sampling the local host.
    pub fn new(config: MonitoringConfig) -> Self {
        let source = Arc::new(HostSampler::new(config.enable_gpu, config.enable_bandwidth));
        Self::with_source(config, source)
    }

    pub fn with_source(config: MonitoringConfig, source: Arc<dyn MetricsSource>) -> Self {
        let system = MetricsHistory::new(config.history_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                system: RwLock::new(system),
                nodes: RwLock::new(BTreeMap::new()),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.inner.config
    }

    /// Start the sampling loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("telemetry collector already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run(shutdown_rx).await });

        *running = Some(Running { shutdown_tx, handle });
        true
    }

    /// Stop the sampling loop and wait for it. Returns `false` if it wasn't running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            error!(error = %e, "telemetry loop ended abnormally");
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Take one sample now, outside the loop. Returns the alerts it raised.
    pub async fn tick(&self) -> Vec<Alert> {
        self.inner.tick().await
    }

    /// Append a node sample to that node's history.
    pub async fn record_node_metrics(&self, sample: NodeMetrics) {
        let capacity = self.inner.config.history_capacity;
        self.inner
            .nodes
            .write()
            .await
            .entry(sample.node_id.clone())
            .or_insert_with(|| MetricsHistory::new(capacity))
            .push(sample);
    }

    pub async fn get_current_system_metrics(&self) -> Option<SystemMetrics> {
        self.inner.system.read().await.latest().cloned()
    }

    /// System samples from the last `hours`, oldest first.
    pub async fn get_system_metrics_history(&self, hours: f64) -> Vec<SystemMetrics> {
        self.inner.system.read().await.since(cutoff(hours))
    }

    /// Samples for one node from the last `hours`; empty for unknown nodes.
    pub async fn get_node_metrics_history(&self, node_id: &str, hours: f64) -> Vec<NodeMetrics> {
        self.inner
            .nodes
            .read()
            .await
            .get(node_id)
            .map(|h| h.since(cutoff(hours)))
            .unwrap_or_default()
    }

    /// Apply the retention window to every history now.
    pub async fn cleanup(&self) {
        self.inner.cleanup(epoch_secs()).await;
    }

    /// `None` until the first system sample has been taken.
    pub async fn get_cluster_summary(&self) -> Option<ClusterSummary> {
        let system = self.inner.system.read().await;
        let nodes = self.inner.nodes.read().await;
        ClusterSummary::build(&system, &nodes)
    }

    /// `None` when no node has a latest sample reporting online.
    pub async fn calculate_cluster_efficiency(&self) -> Option<ClusterEfficiency> {
        ClusterEfficiency::compute(&*self.inner.nodes.read().await)
    }

    /// Snapshot of the last `hours` of every history.
    pub async fn snapshot(&self, hours: f64) -> MetricsExport {
        let since = cutoff(hours);
        let system_metrics = self.inner.system.read().await.since(since);
        let node_metrics = self
            .inner
            .nodes
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), h.since(since)))
            .collect();

        MetricsExport {
            export_timestamp: epoch_secs(),
            hours,
            system_metrics,
            node_metrics,
        }
    }

    /// Write the last `hours` of metrics to `path`.
    pub async fn export_metrics(
        &self,
        path: &Path,
        format: ExportFormat,
        hours: f64,
    ) -> TelemetryResult<()> {
        let export = self.snapshot(hours).await;
        let body = export.render(format)?;
        tokio::fs::write(path, body)
            .await
            .map_err(|source| TelemetryError::Io {
                path: path.display().to_string(),
                source,
            })?;

        info!(
            path = %path.display(),
            system_samples = export.system_metrics.len(),
            nodes = export.node_metrics.len(),
            "metrics exported"
        );
        Ok(())
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            capacity = self.config.history_capacity,
            retention_hours = self.config.retention_hours,
            "telemetry collector started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("telemetry collector shutting down");
                    break;
                }
            }
        }
    }

    async fn tick(&self) -> Vec<Alert> {
        let source = self.source.clone();
        let sample = match tokio::task::spawn_blocking(move || source.sample()).await {
            Ok(sample) => sample,
            Err(e) => {
                error!(error = %e, "metrics sampling failed");
                return Vec::new();
            }
        };

        let alerts = alerts::evaluate(&sample, &self.config.alert_thresholds);
        for alert in &alerts {
            warn!(
                alert = %alert.message,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "ALERT"
            );
        }

        self.system.write().await.push(sample);
        self.cleanup(epoch_secs()).await;
        alerts
    }

    async fn cleanup(&self, now: f64) {
        let cutoff = now - self.config.retention_hours * SECS_PER_HOUR;

        let pruned = self.system.write().await.prune_older_than(cutoff);

        let mut nodes = self.nodes.write().await;
        let mut node_pruned = 0;
        for history in nodes.values_mut() {
            node_pruned += history.prune_older_than(cutoff);
        }
        nodes.retain(|_, h| !h.is_empty());

        if pruned + node_pruned > 0 {
            debug!(system = pruned, node = node_pruned, "expired metrics pruned");
        }
    }
}

fn cutoff(hours: f64) -> f64 {
    epoch_secs() - hours * SECS_PER_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use hivegrid_core::{GpuMetrics, STATUS_OFFLINE, STATUS_ONLINE};

    /// Replays queued samples; stamps each with the current time unless it
    /// already carries a timestamp.
    #[derive(Default)]
    struct ScriptedSource {
        queue: StdMutex<Vec<SystemMetrics>>,
    }

    impl ScriptedSource {
        fn push(&self, sample: SystemMetrics) {
            self.queue.lock().unwrap().insert(0, sample);
        }
    }

    impl MetricsSource for ScriptedSource {
        fn sample(&self) -> SystemMetrics {
            let mut sample = self.queue.lock().unwrap().pop().unwrap_or_else(|| quiet(0.0));
            if sample.timestamp == 0.0 {
                sample.timestamp = epoch_secs();
            }
            sample
        }
    }

    fn quiet(ts: f64) -> SystemMetrics {
        SystemMetrics {
            timestamp: ts,
            cpu_percent: 5.0,
            memory_percent: 30.0,
            disk_usage_percent: 40.0,
            network_bytes_sent: 0,
            network_bytes_recv: 0,
            process_count: 10,
            load_average: vec![0.1, 0.1, 0.1],
            gpu_metrics: vec![],
        }
    }

    fn node_sample(id: &str, ts: f64, status: &str) -> NodeMetrics {
        NodeMetrics {
            node_id: id.into(),
            timestamp: ts,
            response_time: 2.0,
            tokens_per_second: 25.0,
            active_jobs: 1,
            queue_size: 0,
            memory_usage_mb: 100.0,
            cpu_percent: 20.0,
            gpu_utilization: 0.0,
            gpu_memory_used: 0.0,
            gpu_memory_total: 0.0,
            model_name: "m1".into(),
            status: status.into(),
        }
    }

    fn collector(capacity: usize) -> (TelemetryCollector, Arc<ScriptedSource>) {
        let source = Arc::new(ScriptedSource::default());
        let config = MonitoringConfig {
            interval: Duration::from_millis(20),
            history_capacity: capacity,
            retention_hours: 1.0,
            ..MonitoringConfig::default()
        };
        (TelemetryCollector::with_source(config, source.clone()), source)
    }

    #[tokio::test]
    async fn tick_appends_and_alerts() {
        let (c, source) = collector(10);
        assert!(c.get_current_system_metrics().await.is_none());

        let mut hot = quiet(0.0);
        hot.cpu_percent = 99.0;
        hot.gpu_metrics.push(GpuMetrics {
            index: 0,
            name: "A100".into(),
            memory_used: 79.0,
            memory_total: 80.0,
            memory_free: 1.0,
            memory_percent: 98.75,
            utilization: 100.0,
            temperature: 80.0,
            power_draw: 300.0,
        });
        source.push(hot);

        let alerts = c.tick().await;
        assert_eq!(alerts.len(), 2);
        assert_eq!(c.get_current_system_metrics().await.unwrap().cpu_percent, 99.0);

        // No hysteresis: the next hot sample alerts again.
        let mut hot = quiet(0.0);
        hot.cpu_percent = 95.0;
        source.push(hot);
        assert_eq!(c.tick().await.len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded_and_retained() {
        let (c, source) = collector(5);
        let now = epoch_secs();
        // Two hours old: outside the one-hour retention window.
        source.push(quiet(now - 7200.0));
        c.tick().await;
        assert!(c.get_system_metrics_history(24.0).await.is_empty());

        for _ in 0..12 {
            c.tick().await;
        }
        let history = c.get_system_metrics_history(24.0).await;
        assert_eq!(history.len(), 5);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn node_histories_filter_and_expire() {
        let (c, _) = collector(10);
        let now = epoch_secs();
        c.record_node_metrics(node_sample("a", now - 1800.0, STATUS_ONLINE)).await;
        c.record_node_metrics(node_sample("a", now, STATUS_ONLINE)).await;
        c.record_node_metrics(node_sample("b", now - 7200.0, STATUS_ONLINE)).await;

        assert_eq!(c.get_node_metrics_history("a", 1.0).await.len(), 2);
        assert_eq!(c.get_node_metrics_history("a", 0.25).await.len(), 1);
        assert!(c.get_node_metrics_history("missing", 1.0).await.is_empty());

        c.cleanup().await;
        assert!(c.get_node_metrics_history("b", 24.0).await.is_empty());
        assert_eq!(c.snapshot(24.0).await.node_metrics.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_drops_late_arriving_old_samples() {
        let (c, _) = collector(10);
        let now = epoch_secs();
        c.record_node_metrics(node_sample("a", now, STATUS_ONLINE)).await;
        c.record_node_metrics(node_sample("a", now - 7200.0, STATUS_ONLINE)).await;

        c.cleanup().await;
        let ages: Vec<f64> = c
            .get_node_metrics_history("a", 24.0)
            .await
            .iter()
            .map(|m| now - m.timestamp)
            .collect();
        assert_eq!(ages, vec![0.0]);
    }

    #[tokio::test]
    async fn summary_and_efficiency() {
        let (c, _) = collector(10);
        assert!(c.get_cluster_summary().await.is_none());
        assert!(c.calculate_cluster_efficiency().await.is_none());

        c.tick().await;
        let now = epoch_secs();
        c.record_node_metrics(node_sample("a", now, STATUS_ONLINE)).await;
        c.record_node_metrics(node_sample("b", now, STATUS_OFFLINE)).await;

        let summary = c.get_cluster_summary().await.unwrap();
        assert_eq!(summary.nodes.len(), 2);
        assert_eq!(summary.system.process_count, 10);

        let e = c.calculate_cluster_efficiency().await.unwrap();
        assert_eq!(e.total_throughput, 25.0);
        assert_eq!(e.average_utilization, 20.0);
        assert_eq!(e.efficiency_score, 1250.0);
    }

    #[tokio::test]
    async fn json_export_round_trips() {
        let (c, source) = collector(10);
        for cpu in [10.0, 20.0, 30.0] {
            let mut s = quiet(0.0);
            s.cpu_percent = cpu;
            source.push(s);
            c.tick().await;
        }
        c.record_node_metrics(node_sample("a", epoch_secs(), STATUS_ONLINE)).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        c.export_metrics(&path, ExportFormat::Json, 24.0).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: MetricsExport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.hours, 24.0);
        assert_eq!(parsed.system_metrics, c.get_system_metrics_history(24.0).await);
        let cpus: Vec<f64> = parsed.system_metrics.iter().map(|m| m.cpu_percent).collect();
        assert_eq!(cpus, vec![10.0, 20.0, 30.0]);
        assert_eq!(parsed.node_metrics["a"], c.get_node_metrics_history("a", 24.0).await);
    }

    #[tokio::test]
    async fn json_export_preserves_exact_floats() {
        let (c, _) = collector(3000);
        let now = epoch_secs();
        for i in 0..2000u32 {
            let x = (f64::from(i) * 0.618_033_988_749_894_9).fract();
            let mut s = node_sample("a", now - 3000.0 + f64::from(i) * 1.318_713_1 + x / 7.0, STATUS_ONLINE);
            s.response_time = x * 3.141_592_653_589_793;
            s.tokens_per_second = 100.0 / (x + 0.3);
            s.cpu_percent = x * 100.0 / 3.0;
            s.gpu_utilization = (x * 1e6).sqrt() / 11.0;
            c.record_node_metrics(s).await;
        }

        let text = c.snapshot(24.0).await.render(ExportFormat::Json).unwrap();
        let parsed: MetricsExport = serde_json::from_str(&text).unwrap();
        let original = c.get_node_metrics_history("a", 24.0).await;
        assert_eq!(original.len(), 2000);
        let mismatched = parsed.node_metrics["a"]
            .iter()
            .zip(&original)
            .filter(|(a, b)| {
                a.timestamp.to_bits() != b.timestamp.to_bits()
                    || a.response_time.to_bits() != b.response_time.to_bits()
                    || a.tokens_per_second.to_bits() != b.tokens_per_second.to_bits()
                    || a.cpu_percent.to_bits() != b.cpu_percent.to_bits()
                    || a.gpu_utilization.to_bits() != b.gpu_utilization.to_bits()
            })
            .count();
        assert_eq!(mismatched, 0);
    }

    #[tokio::test]
    async fn csv_export_rows_match_history() {
        let (c, _) = collector(10);
        c.tick().await;
        c.tick().await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        c.export_metrics(&path, ExportFormat::Csv, 1.0).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let system_rows = text.lines().filter(|l| l.starts_with("system,")).count();
        assert_eq!(system_rows, 2 * 3);
    }

    #[tokio::test]
    async fn export_to_missing_directory_fails() {
        let (c, _) = collector(10);
        let err = c
            .export_metrics(Path::new("/definitely/not/here/m.json"), ExportFormat::Json, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Io { .. }));
    }

    #[tokio::test]
    async fn loop_samples_until_stopped() {
        let (c, _) = collector(100);
        assert!(c.start().await);
        assert!(!c.start().await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(c.stop().await);
        assert!(!c.stop().await);

        let taken = c.get_system_metrics_history(1.0).await.len();
        assert!(taken >= 2, "only {taken} samples");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(c.get_system_metrics_history(1.0).await.len(), taken);
    }
}

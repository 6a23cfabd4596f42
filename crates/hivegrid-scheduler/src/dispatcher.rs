//! The dispatcher: owns the job queue, the node registry, and the
//! background loops.
//!
//! ```text
//!  submit ──▶ JobQueue ──▶ dispatch loop ──acquire──▶ NodeRegistry
//!                 ▲              │
//!                 └─ requeue ◀───┤ (no node: back off, keep position)
//!                                ▼
//!                     JoinSet of workers (Semaphore-bounded)
//!                                │
//!                   JobExecutor ─┴─▶ completed / failed history
//! ```
//!
//! The dispatch loop never waits on job execution. Each worker marks its
//! job RUNNING, runs the body, records the outcome on the node, and then
//! releases the node slot and removes the job from the active table.
//! Slot reservation and release both happen while holding the active
//! table lock, so a node's `active_jobs` always equals the number of
//! active jobs assigned to it when observed through [`Dispatcher::get_status`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use hivegrid_core::config::{DiscoveryConfig, HealthPollConfig};
use hivegrid_core::{
    ClusterConfig, Job, JobId, JobKind, JobPriority, JobStatus, Node, NodeId, Payload, STATUS_OFFLINE,
    STATUS_ONLINE, epoch_secs,
};
use hivegrid_registry::{Discovery, HealthPoller, NodeClient, NodeRegistry};

use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::JobExecutor;
use crate::prompts::{PromptLibrary, PromptRenderer, PromptToggle};
use crate::queue::{JobQueue, QueuedJob};

/// Counters reported by [`Dispatcher::get_status`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatcherStats {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub total_nodes: usize,
    /// Enabled nodes.
    pub active_nodes: usize,
    /// Unix time of the last `start()`.
    pub start_time: Option<f64>,
}

/// Per-node view in the cluster status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub name: String,
    /// `online` when enabled, `offline` otherwise.
    pub status: String,
    pub model: String,
    pub active_jobs: u32,
    pub max_concurrent: u32,
    pub total_jobs: u64,
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub last_seen: f64,
    pub metrics: Payload,
}

impl From<&Node> for NodeStatus {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            status: if node.enabled { STATUS_ONLINE } else { STATUS_OFFLINE }.to_string(),
            model: node.model.clone(),
            active_jobs: node.active_jobs,
            max_concurrent: node.max_concurrent,
            total_jobs: node.total_jobs,
            success_rate: node.success_rate,
            avg_response_time: node.avg_response_time,
            last_seen: node.last_seen,
            metrics: node.metrics.clone(),
        }
    }
}

/// Snapshot returned by [`Dispatcher::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStatus {
    pub stats: DispatcherStats,
    pub nodes: BTreeMap<NodeId, NodeStatus>,
    pub queued_jobs: usize,
    pub active_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

#[derive(Debug, Default)]
struct Counters {
    jobs_processed: u64,
    jobs_failed: u64,
    start_time: Option<f64>,
}

/// State shared between the dispatcher handle, its loops, and workers.
struct Inner {
    registry: NodeRegistry,
    client: NodeClient,
    executor: JobExecutor,
    queue: JobQueue,
    /// Dispatched jobs not yet finished, by ID.
    active: Mutex<BTreeMap<JobId, Job>>,
    completed: RwLock<Vec<Job>>,
    failed: RwLock<Vec<Job>>,
    counters: RwLock<Counters>,
    workers: Arc<Semaphore>,
    job_seq: AtomicU64,
    max_retries: u32,
    requeue_backoff: Duration,
    health: HealthPollConfig,
    discovery: DiscoveryConfig,
}

/// Background tasks of a started dispatcher.
struct Running {
    shutdown_tx: watch::Sender<bool>,
    dispatch: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

/// Single-process job dispatcher.
pub struct Dispatcher {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl Dispatcher {
    /// Build a dispatcher with the built-in prompt library.
    ///
    /// Prompt toggles from `[prompts.toggles]` are applied; unknown names
    /// are logged and ignored.
    pub fn new(config: &ClusterConfig) -> Self {
        let mut library = PromptLibrary::new();
        for (name, enabled) in &config.prompts.toggles {
            match name.parse::<PromptToggle>() {
                Ok(toggle) => library.set_toggle(toggle, *enabled),
                Err(e) => warn!(error = %e, "ignoring prompt toggle"),
            }
        }
        Self::with_prompts(config, Arc::new(library))
    }

    /// Build a dispatcher with a custom prompt renderer.
    pub fn with_prompts(config: &ClusterConfig, prompts: Arc<dyn PromptRenderer>) -> Self {
        let cluster = &config.cluster;
        let registry = NodeRegistry::from_nodes(config.configured_nodes());
        let client = NodeClient::new(cluster.api_key.clone());
        let executor = JobExecutor::new(client.clone(), prompts, cluster.request_timeout);

        Self {
            inner: Arc::new(Inner {
                registry,
                client,
                executor,
                queue: JobQueue::new(),
                active: Mutex::new(BTreeMap::new()),
                completed: RwLock::new(Vec::new()),
                failed: RwLock::new(Vec::new()),
                counters: RwLock::new(Counters::default()),
                workers: Arc::new(Semaphore::new(cluster.workers.max(1))),
                job_seq: AtomicU64::new(0),
                max_retries: cluster.retry_attempts,
                requeue_backoff: cluster.requeue_backoff,
                health: cluster.health.clone(),
                discovery: cluster.discovery.clone(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Handle to the node registry.
    pub fn registry(&self) -> &NodeRegistry {
        &self.inner.registry
    }

    /// Start the dispatch, health-poll, and (if enabled) discovery loops.
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.inner.counters.write().await.start_time = Some(epoch_secs());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatch = tokio::spawn(dispatch_loop(self.inner.clone(), shutdown_rx.clone()));

        let mut background = Vec::new();
        let poller = HealthPoller::new(
            self.inner.registry.clone(),
            self.inner.client.clone(),
            self.inner.health.clone(),
        );
        background.push(tokio::spawn(poller.run(shutdown_rx.clone())));

        if self.inner.discovery.enabled {
            let discovery = Discovery::new(
                self.inner.registry.clone(),
                self.inner.client.clone(),
                self.inner.discovery.clone(),
            );
            background.push(tokio::spawn(discovery.run(shutdown_rx)));
        }

        let nodes = self.inner.registry.len().await;
        info!(nodes, discovery = self.inner.discovery.enabled, "dispatcher started");

        *running = Some(Running {
            shutdown_tx,
            dispatch,
            background,
        });
        Ok(())
    }

    /// Stop pulling new jobs and wait for in-flight jobs to finish.
    ///
    /// Jobs still queued stay queued.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(SchedulerError::NotRunning);
        };

        info!("dispatcher stopping");
        let _ = running.shutdown_tx.send(true);

        if let Err(e) = running.dispatch.await {
            error!(error = %e, "dispatch loop panicked");
        }
        for handle in running.background {
            if let Err(e) = handle.await {
                error!(error = %e, "background loop panicked");
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Queue a job and return its ID.
    pub async fn submit(&self, kind: JobKind, payload: Payload, priority: JobPriority) -> JobId {
        let seq = self.inner.job_seq.fetch_add(1, Ordering::Relaxed);
        let millis = (epoch_secs() * 1000.0) as u64;
        let id = format!("job_{millis}_{seq}");

        let job = Job::new(id.clone(), kind, priority, payload).with_max_retries(self.inner.max_retries);
        self.inner.queue.push(job).await;
        info!(job_id = %id, %kind, %priority, "job submitted");
        id
    }

    /// Queue a job whose kind is given by name.
    ///
    /// Unknown kinds are rejected before anything is queued.
    pub async fn submit_named(
        &self,
        kind: &str,
        payload: Payload,
        priority: JobPriority,
    ) -> SchedulerResult<JobId> {
        let kind: JobKind = kind.parse()?;
        Ok(self.submit(kind, payload, priority).await)
    }

    /// Snapshot of a job wherever it currently is.
    ///
    /// Jobs move queue → active → completed/failed, and each move
    /// publishes the job in its next table before removing it from the
    /// previous one, so a lookup in that order cannot miss a live job.
    /// Resubmission moves a job back to the queue; the second lookup
    /// catches a job that moved behind the first.
    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        match self.lookup(job_id).await {
            Some(job) => Some(job),
            None => self.lookup(job_id).await,
        }
    }

    async fn lookup(&self, job_id: &str) -> Option<Job> {
        if let Some(job) = self.inner.queue.get(job_id).await {
            return Some(job);
        }
        if let Some(job) = self.inner.active.lock().await.get(job_id) {
            return Some(job.clone());
        }
        if let Some(job) = self.inner.completed.read().await.iter().find(|j| j.id == job_id) {
            return Some(job.clone());
        }
        self.inner
            .failed
            .read()
            .await
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }

    /// Re-enqueue a FAILED job that has retries left.
    ///
    /// The job becomes RETRYING with `retry_count + 1` and its previous
    /// error cleared, and leaves the failed history.
    pub async fn resubmit(&self, job_id: &str) -> SchedulerResult<Job> {
        let mut failed = self.inner.failed.write().await;
        let Some(pos) = failed.iter().position(|j| j.id == job_id) else {
            drop(failed);
            return match self.get_job(job_id).await {
                Some(job) => Err(SchedulerError::NotRetryable {
                    id: job_id.to_string(),
                    reason: format!("job is {}", job.status),
                }),
                None => Err(SchedulerError::JobNotFound(job_id.to_string())),
            };
        };

        if !failed[pos].can_retry() {
            let job = &failed[pos];
            return Err(SchedulerError::NotRetryable {
                id: job_id.to_string(),
                reason: format!("retries exhausted ({}/{})", job.retry_count, job.max_retries),
            });
        }

        let mut job = failed[pos].clone();
        job.status = JobStatus::Retrying;
        job.retry_count += 1;
        job.error = None;
        job.result = None;
        job.assigned_node = None;
        job.started_at = None;
        job.completed_at = None;

        self.inner.queue.push(job.clone()).await;
        failed.remove(pos);
        drop(failed);

        info!(job_id = %job.id, retry = job.retry_count, max = job.max_retries, "job resubmitted");
        Ok(job)
    }

    /// Cluster-wide status snapshot.
    pub async fn get_status(&self) -> ClusterStatus {
        // Hold the active table so node counters and active jobs agree.
        let active = self.inner.active.lock().await;
        let nodes = self.inner.registry.snapshot().await;
        let active_jobs = active.len();
        drop(active);

        let counters = self.inner.counters.read().await;
        let stats = DispatcherStats {
            jobs_processed: counters.jobs_processed,
            jobs_failed: counters.jobs_failed,
            total_nodes: nodes.len(),
            active_nodes: nodes.iter().filter(|n| n.enabled).count(),
            start_time: counters.start_time,
        };
        drop(counters);

        ClusterStatus {
            stats,
            nodes: nodes.iter().map(|n| (n.id.clone(), NodeStatus::from(n))).collect(),
            queued_jobs: self.inner.queue.len().await,
            active_jobs,
            completed_jobs: self.inner.completed.read().await.len(),
            failed_jobs: self.inner.failed.read().await.len(),
        }
    }

    /// Jobs currently assigned to nodes.
    pub async fn active_jobs(&self) -> Vec<Job> {
        self.inner.active.lock().await.values().cloned().collect()
    }

    /// Queued jobs in dispatch order.
    pub async fn queued_jobs(&self) -> Vec<Job> {
        self.inner.queue.snapshot().await
    }

    pub async fn completed_jobs(&self) -> Vec<Job> {
        self.inner.completed.read().await.clone()
    }

    pub async fn failed_jobs(&self) -> Vec<Job> {
        self.inner.failed.read().await.clone()
    }
}

// ── Dispatch loop ─────────────────────────────────────────────────

async fn dispatch_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    debug!("dispatch loop starting");
    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            queued = inner.queue.next() => {
                if !dispatch(&inner, queued, &mut workers).await {
                    tokio::select! {
                        _ = tokio::time::sleep(inner.requeue_backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "worker task failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    if !workers.is_empty() {
        info!(in_flight = workers.len(), "waiting for in-flight jobs");
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "worker task failed");
        }
    }
    debug!("dispatch loop stopped");
}

/// Route one job. Returns `false` if no node could take it.
async fn dispatch(inner: &Arc<Inner>, queued: QueuedJob, workers: &mut JoinSet<()>) -> bool {
    let requirements = queued.job.requirements();

    let mut active = inner.active.lock().await;
    let Some(node) = inner.registry.acquire(&requirements).await else {
        drop(active);
        debug!(job_id = %queued.job.id, "no node available, requeueing");
        inner.queue.requeue(queued).await;
        return false;
    };

    let mut job = queued.job;
    job.assigned_node = Some(node.id.clone());
    active.insert(job.id.clone(), job.clone());
    drop(active);
    inner.queue.settle(&job.id).await;

    info!(job_id = %job.id, node_id = %node.id, kind = %job.kind, "job dispatched");
    workers.spawn(run_job(inner.clone(), job, node));
    true
}

/// Worker body. Always releases the node slot and clears the active entry.
async fn run_job(inner: Arc<Inner>, mut job: Job, node: Node) {
    let _permit = inner.workers.clone().acquire_owned().await.ok();

    let started = epoch_secs();
    job.status = JobStatus::Running;
    job.started_at = Some(started);
    inner.active.lock().await.insert(job.id.clone(), job.clone());
    debug!(job_id = %job.id, node_id = %node.id, "job running");

    // Run the body in its own task so a panic is recorded as a failure.
    let body = {
        let executor = inner.executor.clone();
        let job = job.clone();
        let node = node.clone();
        tokio::spawn(async move { executor.execute(&job, &node).await })
    };
    let outcome = match body.await {
        Ok(result) => result,
        Err(e) => Err(SchedulerError::Aborted(e.to_string())),
    };

    let finished = epoch_secs();
    let elapsed = finished - started;
    job.completed_at = Some(finished);

    match outcome {
        Ok(result) => {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            inner.registry.record_outcome(&node.id, true, elapsed).await;
            inner.counters.write().await.jobs_processed += 1;
            inner.completed.write().await.push(job.clone());
            info!(job_id = %job.id, node_id = %node.id, elapsed_secs = elapsed, "job completed");
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.error = Some(e.to_string());
            inner.registry.record_outcome(&node.id, false, elapsed).await;
            inner.counters.write().await.jobs_failed += 1;
            inner.failed.write().await.push(job.clone());
            warn!(job_id = %job.id, node_id = %node.id, error = %e, "job failed");
        }
    }

    let mut active = inner.active.lock().await;
    active.remove(&job.id);
    inner.registry.release(&node.id).await;
}

//! Priority job queue.
//!
//! Jobs are ordered by `(priority, sequence)`: urgent before normal
//! before bulk, FIFO within a class. The sequence number is assigned on
//! [`JobQueue::push`] and carried by the [`QueuedJob`] handle, so a job
//! given back with [`JobQueue::requeue`] keeps its place ahead of
//! same-priority jobs submitted after it.
//!
//! A popped job stays visible to [`JobQueue::get`] as *claimed* until the
//! consumer either requeues it or calls [`JobQueue::settle`] once it is
//! tracked elsewhere.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::{Mutex, Notify};

use hivegrid_core::{Job, JobId, JobPriority};

/// A job popped from the queue, along with its queue position.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    seq: u64,
}

impl QueuedJob {
    fn key(&self) -> (JobPriority, u64) {
        (self.job.priority, self.seq)
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Default)]
struct Entries {
    heap: BinaryHeap<Reverse<QueuedJob>>,
    /// Popped but not yet settled or requeued.
    claimed: BTreeMap<JobId, Job>,
}

/// Multi-producer, single-consumer priority queue of jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    entries: Mutex<Entries>,
    next_seq: AtomicU64,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job behind every job already queued at its priority.
    pub async fn push(&self, job: Job) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.entries.lock().await.heap.push(Reverse(QueuedJob { job, seq }));
        self.notify.notify_one();
    }

    /// Put a popped job back at its original position.
    pub async fn requeue(&self, queued: QueuedJob) {
        let mut entries = self.entries.lock().await;
        entries.claimed.remove(&queued.job.id);
        entries.heap.push(Reverse(queued));
        drop(entries);
        self.notify.notify_one();
    }

    /// Remove the head of the queue, if any, and hold it as claimed.
    pub async fn pop(&self) -> Option<QueuedJob> {
        let mut entries = self.entries.lock().await;
        let Reverse(queued) = entries.heap.pop()?;
        entries.claimed.insert(queued.job.id.clone(), queued.job.clone());
        Some(queued)
    }

    /// Forget a claimed job once the consumer tracks it elsewhere.
    pub async fn settle(&self, job_id: &str) {
        self.entries.lock().await.claimed.remove(job_id);
    }

    /// Wait until a job is available and remove it.
    ///
    /// Cancel-safe: a job is only removed once the future completes.
    pub async fn next(&self) -> QueuedJob {
        loop {
            if let Some(queued) = self.pop().await {
                return queued;
            }
            self.notify.notified().await;
        }
    }

    /// Jobs waiting in the queue. Claimed jobs are not counted.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.heap.is_empty()
    }

    /// Look up a queued or claimed job by ID.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        let entries = self.entries.lock().await;
        entries
            .heap
            .iter()
            .find(|Reverse(q)| q.job.id == job_id)
            .map(|Reverse(q)| q.job.clone())
            .or_else(|| entries.claimed.get(job_id).cloned())
    }

    /// Queued jobs in dispatch order.
    pub async fn snapshot(&self) -> Vec<Job> {
        let mut entries: Vec<QueuedJob> = self
            .entries
            .lock()
            .await
            .heap
            .iter()
            .map(|Reverse(q)| q.clone())
            .collect();
        entries.sort();
        entries.into_iter().map(|q| q.job).collect()
    }
}

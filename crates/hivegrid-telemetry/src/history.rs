//! Bounded, time-ordered sample history.

use std::collections::VecDeque;

use hivegrid_core::{NodeMetrics, SystemMetrics};

/// A sample carrying its own epoch timestamp (seconds).
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

impl Timestamped for SystemMetrics {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl Timestamped for NodeMetrics {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Fixed-capacity ring buffer; the oldest sample is evicted first.
#[derive(Debug, Clone)]
pub struct MetricsHistory<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T: Timestamped + Clone> MetricsHistory<T> {
    /// A zero capacity is treated as one so the latest sample is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Drop samples strictly older than `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&mut self, cutoff: f64) -> usize {
        let before = self.samples.len();
        // Recorded samples may arrive out of order.
        self.samples.retain(|s| s.timestamp() >= cutoff);
        before - self.samples.len()
    }

    /// Samples with `timestamp >= cutoff`, oldest first.
    pub fn since(&self, cutoff: f64) -> Vec<T> {
        self.samples
            .iter()
            .filter(|s| s.timestamp() >= cutoff)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.samples.back()
    }

    /// The two most recent samples as `(previous, latest)`.
    pub fn last_two(&self) -> Option<(&T, &T)> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        Some((&self.samples[n - 2], &self.samples[n - 1]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Running counters for one worker identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub total_tasks: u64,
    pub completed: u64,
    pub failed: u64,
    pub success_rate: f64,
    /// Mean duration of completed tasks.
    pub avg_duration_secs: f64,
}

impl WorkerMetrics {
    fn merge(&mut self, succeeded: bool, duration: Option<Duration>) {
        self.total_tasks += 1;
        if succeeded {
            self.completed += 1;
            if let Some(d) = duration {
                let n = self.completed as f64;
                self.avg_duration_secs += (d.as_secs_f64() - self.avg_duration_secs) / n;
            }
        } else {
            self.failed += 1;
        }
        self.success_rate = self.completed as f64 / self.total_tasks as f64;
    }
}

/// Per-worker aggregate over terminal task outcomes, shared by all loops.
#[derive(Debug, Default)]
pub struct MetricsAggregate {
    workers: DashMap<String, WorkerMetrics>,
}

impl MetricsAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one outcome under the worker's shard lock.
    pub fn record(&self, worker: &str, succeeded: bool, duration: Option<Duration>) {
        self.workers
            .entry(worker.to_string())
            .or_default()
            .merge(succeeded, duration);
    }

    pub fn get(&self, worker: &str) -> Option<WorkerMetrics> {
        self.workers.get(worker).map(|m| m.value().clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, WorkerMetrics> {
        self.workers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

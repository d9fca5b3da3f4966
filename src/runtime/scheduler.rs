use crate::config::EngineConfig;
use crate::error::{TaskError, WorkflowError};
use crate::graph::{EventKind, HistoryEvent, TaskStatus, Workflow, WorkflowSnapshot, WorkflowStatus};
use crate::handlers::HandlerRegistry;
use crate::runtime::context::TaskContext;
use crate::runtime::metrics::MetricsAggregate;
use crate::runtime::storage::SnapshotStore;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type AttemptOutcome = (Result<Value, TaskError>, Duration);

/// Drives one workflow to a terminal state.
///
/// The loop owns the workflow outright; handlers only ever see a
/// [`TaskContext`] and report back through their join handles, so every
/// mutation happens here.
pub struct Scheduler {
    workflow: Workflow,
    config: Arc<EngineConfig>,
    registry: Arc<HandlerRegistry>,
    live: Arc<DashMap<Uuid, WorkflowSnapshot>>,
    metrics: Arc<MetricsAggregate>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl Scheduler {
    pub fn new(
        workflow: Workflow,
        config: Arc<EngineConfig>,
        registry: Arc<HandlerRegistry>,
        live: Arc<DashMap<Uuid, WorkflowSnapshot>>,
        metrics: Arc<MetricsAggregate>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            workflow,
            config,
            registry,
            live,
            metrics,
            snapshots,
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow.id
    }

    pub async fn run(mut self) -> WorkflowSnapshot {
        self.workflow.status = WorkflowStatus::Running;
        self.workflow.started_at = Some(Utc::now());
        self.workflow.record(HistoryEvent::workflow(EventKind::WorkflowStarted));
        info!(workflow_id = %self.workflow.id, name = %self.workflow.name, tasks = self.workflow.task_count(), "Workflow started");
        self.publish();

        loop {
            self.promote_due_retries();

            if self.workflow.is_complete() {
                break;
            }

            let ready = self.workflow.ready_set();
            if ready.is_empty() {
                let now = Instant::now();
                if self.workflow.is_stalled(now, self.config.stall_window()) {
                    self.fail_stalled(now);
                    break;
                }
                self.idle(now).await;
                continue;
            }

            self.run_batch(ready).await;

            if self.workflow.failure().is_some() {
                break;
            }
        }

        self.finish().await
    }

    /// Moves every awaiting-retry task whose backoff has elapsed back to pending.
    fn promote_due_retries(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .workflow
            .tasks()
            .filter(|t| t.status == TaskStatus::AwaitingRetry)
            .filter(|t| t.retry_at().is_some_and(|at| at <= now))
            .map(|t| t.id.clone())
            .collect();

        for task_id in due {
            let Some(task) = self.workflow.task_mut(&task_id) else {
                continue;
            };
            task.requeue();
            let event = HistoryEvent::task(EventKind::TaskRequeued, task);
            self.workflow.record(event);
            debug!(workflow_id = %self.workflow.id, task_id = %task_id, "Task requeued");
        }
    }

    /// Sleeps for the idle interval, or less if a retry comes due sooner.
    async fn idle(&self, now: Instant) {
        let deadline = now + self.config.idle_interval();
        let wake = match self.workflow.next_retry_at() {
            Some(at) => at.min(deadline),
            None => deadline,
        };
        sleep_until(wake).await;
    }

    /// Runs every ready task concurrently and applies all outcomes before the
    /// next ready-set computation.
    async fn run_batch(&mut self, ready: Vec<String>) {
        let mut batch: Vec<(String, JoinHandle<AttemptOutcome>)> = Vec::with_capacity(ready.len());

        for task_id in ready {
            let Some(task) = self.workflow.task_mut(&task_id) else {
                continue;
            };
            task.begin_attempt();
            let event = HistoryEvent::task(EventKind::TaskStarted, task);
            self.workflow.record(event);

            let Some(task) = self.workflow.task(&task_id) else {
                continue;
            };
            let task_type = task.task_type();
            let ctx = TaskContext::new(&self.workflow, task);
            let handler = self.registry.get(task_type);
            debug!(workflow_id = %self.workflow.id, task_id = %task_id, task_type = %task_type, "Task started");

            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let outcome = match handler {
                    Some(handler) => handler.handle(&ctx).await,
                    None => Err(TaskError::MissingHandler(task_type.to_string())),
                };
                (outcome, started.elapsed())
            });
            batch.push((task_id, handle));
        }
        self.publish();

        for (task_id, handle) in batch {
            let (outcome, elapsed) = match handle.await {
                Ok(result) => result,
                Err(e) => (Err(TaskError::Panicked(e.to_string())), Duration::ZERO),
            };
            self.apply(&task_id, outcome, elapsed);
        }
        self.publish();
    }

    fn apply(&mut self, task_id: &str, outcome: Result<Value, TaskError>, elapsed: Duration) {
        let workflow_id = self.workflow.id;
        let config = Arc::clone(&self.config);
        let Some(task) = self.workflow.task_mut(task_id) else {
            return;
        };
        let worker = task.worker().map(str::to_string);

        match outcome {
            Ok(result) => {
                task.complete(result, elapsed);
                let event = HistoryEvent::task(EventKind::TaskCompleted, task);
                self.workflow.record(event);
                info!(workflow_id = %workflow_id, task_id = %task_id, elapsed = ?elapsed, "Task completed");
                if let Some(worker) = worker {
                    self.metrics.record(&worker, true, Some(elapsed));
                }
            }
            Err(err) => {
                let status = task.fail_attempt(&err, |n| config.backoff(n));
                let retries = task.retry_count;
                let max_retries = task.max_retries;
                let kind = if status == TaskStatus::AwaitingRetry {
                    EventKind::TaskRetryScheduled
                } else {
                    EventKind::TaskFailed
                };
                let event = HistoryEvent::task(kind, task).with_error(&err);
                self.workflow.record(event);

                if status == TaskStatus::AwaitingRetry {
                    warn!(
                        workflow_id = %workflow_id,
                        task_id = %task_id,
                        attempt = retries,
                        max_retries,
                        delay = ?config.backoff(retries),
                        error = %err,
                        "Task failed, retry scheduled"
                    );
                    return;
                }

                if let Some(worker) = worker {
                    self.metrics.record(&worker, false, None);
                }

                if self.workflow.failure().is_some() {
                    warn!(workflow_id = %workflow_id, task_id = %task_id, error = %err, "Collateral task failure");
                } else {
                    error!(workflow_id = %workflow_id, task_id = %task_id, retries = max_retries, error = %err, "Task failed permanently");
                }
                self.workflow.set_failure(WorkflowError::PermanentFailure {
                    task_id: task_id.to_string(),
                    retries: max_retries,
                    last_error: err.to_string(),
                });
            }
        }
    }

    fn fail_stalled(&mut self, now: Instant) {
        let waiting: Vec<String> = self
            .workflow
            .tasks()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();
        let cause = WorkflowError::StallTimeout {
            window: self.config.stall_window(),
            idle: self.workflow.idle_for(now),
            waiting,
        };
        error!(workflow_id = %self.workflow.id, error = %cause, "Workflow stalled");
        self.workflow.set_failure(cause);
    }

    async fn finish(mut self) -> WorkflowSnapshot {
        let workflow_id = self.workflow.id;

        let event = match self.workflow.failure() {
            Some(cause) => {
                let event = HistoryEvent::workflow(EventKind::WorkflowFailed).with_error(cause);
                self.workflow.status = WorkflowStatus::Failed;
                event
            }
            None => {
                self.workflow.status = WorkflowStatus::Completed;
                HistoryEvent::workflow(EventKind::WorkflowCompleted)
            }
        };
        self.workflow.completed_at = Some(Utc::now());
        self.workflow.record(event);

        let snapshot = self.workflow.snapshot(self.config.snapshot_history);
        self.live.insert(workflow_id, snapshot.clone());

        match self.snapshots.save(&snapshot, self.config.snapshot_ttl()).await {
            Ok(()) => {
                if self.config.evict_on_terminal {
                    self.live.remove(&workflow_id);
                }
            }
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "Failed to persist snapshot, keeping it in memory");
            }
        }

        info!(workflow_id = %workflow_id, status = ?snapshot.status, "Workflow finished");
        snapshot
    }

    fn publish(&self) {
        self.live
            .insert(self.workflow.id, self.workflow.snapshot(self.config.snapshot_history));
    }
}

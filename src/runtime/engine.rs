use crate::config::EngineConfig;
use crate::decompose::keyword::KeywordClassifier;
use crate::decompose::{Classifier, Decomposer};
use crate::graph::builder::TaskDefaults;
use crate::graph::{Workflow, WorkflowSnapshot};
use crate::handlers::remote::{RemoteWorkHandler, WorkerLimits};
use crate::handlers::{HandlerRegistry, TaskHandler};
use crate::runtime::metrics::{MetricsAggregate, WorkerMetrics};
use crate::runtime::router::ResponseRouter;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::storage::{SnapshotStore, Transport};
use anyhow::Result;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Entry point: decomposes requests, starts one scheduler loop per workflow
/// and serves status and metrics.
pub struct Engine {
    config: Arc<EngineConfig>,
    decomposer: Decomposer,
    registry: Arc<HandlerRegistry>,
    transport: Arc<dyn Transport>,
    router: Arc<ResponseRouter>,
    limits: Arc<WorkerLimits>,
    snapshots: Arc<dyn SnapshotStore>,
    // Map<WorkflowId, Latest snapshot>
    live: Arc<DashMap<Uuid, WorkflowSnapshot>>,
    metrics: Arc<MetricsAggregate>,
}

impl Engine {
    /// Builds an engine with the keyword classifier and all built-in handlers.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        let router = Arc::new(ResponseRouter::new());
        let limits = Arc::new(WorkerLimits::new(config.max_in_flight_per_worker));

        let mut registry = HandlerRegistry::with_flow_handlers();
        registry.register(Arc::new(RemoteWorkHandler::new(
            Arc::clone(&transport),
            Arc::clone(&router),
            Arc::clone(&limits),
        )));

        let classifier = KeywordClassifier::new().with_analysis_worker(&config.fallback_worker);
        let decomposer = Self::decomposer_for(&config, Box::new(classifier));

        Self {
            config: Arc::new(config),
            decomposer,
            registry: Arc::new(registry),
            transport,
            router,
            limits,
            snapshots,
            live: Arc::new(DashMap::new()),
            metrics: Arc::new(MetricsAggregate::new()),
        }
    }

    fn decomposer_for(config: &EngineConfig, classifier: Box<dyn Classifier>) -> Decomposer {
        let defaults = TaskDefaults {
            max_retries: config.default_max_retries,
            timeout: config.default_timeout(),
        };
        Decomposer::new(classifier, &config.fallback_worker)
            .with_defaults(defaults)
            .with_history_limit(config.history_limit)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_classifier(&mut self, classifier: Box<dyn Classifier>) {
        self.decomposer = Self::decomposer_for(&self.config, classifier);
    }

    /// Registers or replaces the handler for a task type. Loops already
    /// running keep the registry they started with.
    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) {
        debug!(task_type = %handler.task_type(), "Handler registered");
        Arc::make_mut(&mut self.registry).register(handler);
    }

    pub fn router(&self) -> Arc<ResponseRouter> {
        Arc::clone(&self.router)
    }

    pub fn limits(&self) -> Arc<WorkerLimits> {
        Arc::clone(&self.limits)
    }

    /// Decomposes `request` and starts a scheduler loop for the result.
    pub async fn create(&self, request: &str, creator: &str, context: Map<String, Value>) -> Uuid {
        let workflow = self.decomposer.decompose(request, creator, &context);
        self.submit(workflow).await
    }

    /// Starts a scheduler loop for an already-built workflow.
    pub async fn submit(&self, workflow: Workflow) -> Uuid {
        let scheduler = self.prepare(workflow).await;
        let id = scheduler.workflow_id();
        tokio::spawn(scheduler.run());
        id
    }

    /// Runs a workflow to completion on the current task.
    pub async fn execute(&self, workflow: Workflow) -> WorkflowSnapshot {
        self.prepare(workflow).await.run().await
    }

    async fn prepare(&self, mut workflow: Workflow) -> Scheduler {
        workflow.set_history_limit(self.config.history_limit);
        let snapshot = workflow.snapshot(self.config.snapshot_history);
        self.live.insert(workflow.id, snapshot.clone());

        if let Err(e) = self.snapshots.save(&snapshot, self.config.snapshot_ttl()).await {
            warn!(workflow_id = %workflow.id, error = %e, "Failed to persist initial snapshot");
        }
        info!(workflow_id = %workflow.id, name = %workflow.name, created_by = %workflow.created_by, "Workflow created");

        Scheduler::new(
            workflow,
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.live),
            Arc::clone(&self.metrics),
            Arc::clone(&self.snapshots),
        )
    }

    /// Live state first, then the persisted snapshot.
    pub async fn get_status(&self, workflow_id: Uuid) -> Result<Option<WorkflowSnapshot>> {
        if let Some(snapshot) = self.live.get(&workflow_id) {
            return Ok(Some(snapshot.value().clone()));
        }
        self.snapshots.load(workflow_id).await
    }

    /// Polls until the workflow is terminal. `None` when it is unknown.
    pub async fn wait_for(&self, workflow_id: Uuid, poll: Duration) -> Result<Option<WorkflowSnapshot>> {
        loop {
            match self.get_status(workflow_id).await? {
                Some(snapshot) if snapshot.status.is_terminal() => return Ok(Some(snapshot)),
                Some(_) => tokio::time::sleep(poll).await,
                None => return Ok(None),
            }
        }
    }

    pub fn metrics(&self) -> BTreeMap<String, WorkerMetrics> {
        self.metrics.snapshot()
    }

    pub fn worker_metrics(&self, worker: &str) -> Option<WorkerMetrics> {
        self.metrics.get(worker)
    }

    /// Ids of workflows currently held in memory and not yet terminal.
    pub fn active_workflows(&self) -> Vec<Uuid> {
        self.live
            .iter()
            .filter(|e| !e.value().status.is_terminal())
            .map(|e| *e.key())
            .collect()
    }

    /// Starts the task that routes transport responses to waiting handlers.
    /// The response stream is open by the time this returns.
    pub async fn spawn_dispatcher(&self) -> Result<JoinHandle<()>> {
        self.transport.listen().await?;
        let router = Arc::clone(&self.router);
        let transport = Arc::clone(&self.transport);
        let retry_interval = self.config.idle_interval();
        Ok(tokio::spawn(async move {
            router.run(transport.as_ref(), retry_interval).await;
        }))
    }
}

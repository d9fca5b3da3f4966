use async_trait::async_trait;
use crate::error::TaskError;
use crate::graph::{TaskKind, TaskType};
use crate::handlers::TaskHandler;
use crate::runtime::context::TaskContext;
use crate::runtime::message::DispatchRecord;
use crate::runtime::router::ResponseRouter;
use crate::runtime::storage::Transport;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Per-worker cap on concurrent remote dispatches. A cap of 0 disables it.
#[derive(Debug)]
pub struct WorkerLimits {
    cap: usize,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl WorkerLimits {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            semaphores: DashMap::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub async fn acquire(&self, worker: &str) -> Result<Option<OwnedSemaphorePermit>, TaskError> {
        if self.cap == 0 {
            return Ok(None);
        }
        let semaphore = self
            .semaphores
            .entry(worker.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.cap)))
            .value()
            .clone();
        semaphore
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|e| TaskError::Dispatch(e.to_string()))
    }

    /// Permits currently free for `worker`; `None` when uncapped or unused.
    pub fn available(&self, worker: &str) -> Option<usize> {
        self.semaphores.get(worker).map(|s| s.available_permits())
    }
}

/// Publishes a dispatch record for the task's worker and waits, up to the
/// task's timeout, for the matching response.
pub struct RemoteWorkHandler {
    transport: Arc<dyn Transport>,
    router: Arc<ResponseRouter>,
    limits: Arc<WorkerLimits>,
}

impl RemoteWorkHandler {
    pub fn new(transport: Arc<dyn Transport>, router: Arc<ResponseRouter>, limits: Arc<WorkerLimits>) -> Self {
        Self {
            transport,
            router,
            limits,
        }
    }
}

impl fmt::Debug for RemoteWorkHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteWorkHandler")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskHandler for RemoteWorkHandler {
    fn task_type(&self) -> TaskType {
        TaskType::RemoteWork
    }

    async fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let TaskKind::RemoteWork { worker } = &ctx.kind else {
            return Err(TaskError::InvalidPayload(format!("{} is not a remote task", ctx.task_id)));
        };

        let _permit = self.limits.acquire(worker).await?;

        // Registered before publishing so the response cannot outrun it.
        let receiver = self.router.register(ctx.workflow_id, &ctx.task_id);

        let record = DispatchRecord {
            workflow_id: ctx.workflow_id,
            task_id: ctx.task_id.clone(),
            input_data: ctx.input.clone(),
            context: (*ctx.context).clone(),
        };

        if let Err(e) = self.transport.dispatch(worker, &record).await {
            self.router.forget(ctx.workflow_id, &ctx.task_id);
            return Err(TaskError::Dispatch(e.to_string()));
        }
        debug!(workflow_id = %ctx.workflow_id, task_id = %ctx.task_id, worker = %worker, "Dispatched");

        match timeout(ctx.timeout, receiver).await {
            Ok(Ok(payload)) => Ok(payload.result),
            Ok(Err(_)) => Err(TaskError::Dispatch("response channel closed".to_string())),
            Err(_) => {
                self.router.forget(ctx.workflow_id, &ctx.task_id);
                warn!(workflow_id = %ctx.workflow_id, task_id = %ctx.task_id, worker = %worker, timeout = ?ctx.timeout, "No response in time");
                Err(TaskError::Timeout(ctx.timeout))
            }
        }
    }
}

use crate::runtime::message::{InboundResponse, ResponsePayload};
use crate::runtime::storage::Transport;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;

struct PendingEntry {
    task_id: String,
    sender: oneshot::Sender<ResponsePayload>,
}

/// Table of outstanding remote dispatches, keyed by workflow.
///
/// Entries are registered before the dispatch is published, so a response can
/// never arrive ahead of its entry. A response naming a task resolves that
/// task's entry; an anonymous one resolves the oldest entry of the workflow.
#[derive(Default)]
pub struct ResponseRouter {
    // Map<WorkflowId, Queue<PendingEntry>>
    pending: DashMap<Uuid, VecDeque<PendingEntry>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, workflow_id: Uuid, task_id: &str) -> oneshot::Receiver<ResponsePayload> {
        let (tx, rx) = oneshot::channel();
        self.pending.entry(workflow_id).or_default().push_back(PendingEntry {
            task_id: task_id.to_string(),
            sender: tx,
        });
        rx
    }

    /// Hands a response to its waiting handler. Returns false when nothing
    /// was waiting for it.
    pub fn resolve(&self, response: InboundResponse) -> bool {
        let InboundResponse { workflow_id, payload } = response;

        let entry = {
            let Some(mut queue) = self.pending.get_mut(&workflow_id) else {
                return false;
            };
            let position = match &payload.task_id {
                Some(task_id) => queue.iter().position(|e| &e.task_id == task_id),
                None => (!queue.is_empty()).then_some(0),
            };
            position.and_then(|i| queue.remove(i))
        };
        self.pending.remove_if(&workflow_id, |_, queue| queue.is_empty());

        match entry {
            Some(entry) => {
                debug!(workflow_id = %workflow_id, task_id = %entry.task_id, "Response routed");
                entry.sender.send(payload).is_ok()
            }
            None => false,
        }
    }

    /// Drops the entry of a dispatch that is no longer awaited.
    pub fn forget(&self, workflow_id: Uuid, task_id: &str) {
        if let Some(mut queue) = self.pending.get_mut(&workflow_id) {
            queue.retain(|e| e.task_id != task_id);
        }
        self.pending.remove_if(&workflow_id, |_, queue| queue.is_empty());
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(|q| q.len()).sum()
    }

    /// Receives responses from the transport until the task is aborted.
    pub async fn run(&self, transport: &dyn Transport, retry_interval: Duration) {
        loop {
            match transport.next_response().await {
                Ok(Some(response)) => {
                    let workflow_id = response.workflow_id;
                    let task_id = response.payload.task_id.clone();
                    if !self.resolve(response) {
                        warn!(workflow_id = %workflow_id, task_id = ?task_id, "Dropping response with no pending dispatch");
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(retry_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive response");
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }
}

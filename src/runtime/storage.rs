use async_trait::async_trait;
use crate::graph::WorkflowSnapshot;
use crate::runtime::message::{DispatchRecord, InboundResponse, ResponsePayload};
use anyhow::{Result, anyhow};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

// --- Interfaces ---

/// Scheduler side of the process boundary.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a dispatch record addressed to `worker`.
    async fn dispatch(&self, worker: &str, record: &DispatchRecord) -> Result<()>;
    /// Next inbound response from any workflow. `None` means the stream has
    /// nothing to offer right now (closed or reconnecting).
    async fn next_response(&self) -> Result<Option<InboundResponse>>;
    /// Opens the response stream ahead of the first dispatch, for transports
    /// that would otherwise miss responses sent before they start listening.
    async fn listen(&self) -> Result<()> {
        Ok(())
    }
}

/// Worker side of the process boundary.
#[async_trait]
pub trait WorkerChannel: Send + Sync {
    async fn next_dispatch(&self, worker: &str) -> Result<Option<DispatchRecord>>;
    async fn respond(&self, workflow_id: Uuid, payload: &ResponsePayload) -> Result<()>;
}

/// Durable sink for bounded workflow snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &WorkflowSnapshot, ttl: Duration) -> Result<()>;
    async fn load(&self, workflow_id: Uuid) -> Result<Option<WorkflowSnapshot>>;
}

// --- In-Memory Implementations ---

struct Mailbox<T> {
    sender: mpsc::UnboundedSender<T>,
    receiver: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T> Mailbox<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: tx,
            receiver: Mutex::new(rx),
        }
    }
}

/// Channel-backed transport for a single process. Implements both sides so a
/// test or a local run can host workers next to the engine.
pub struct InMemoryTransport {
    // Map<Worker, Mailbox>
    work: DashMap<String, Arc<Mailbox<DispatchRecord>>>,
    responses: Mailbox<InboundResponse>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            work: DashMap::new(),
            responses: Mailbox::new(),
        }
    }

    fn mailbox(&self, worker: &str) -> Arc<Mailbox<DispatchRecord>> {
        self.work
            .entry(worker.to_string())
            .or_insert_with(|| Arc::new(Mailbox::new()))
            .value()
            .clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn dispatch(&self, worker: &str, record: &DispatchRecord) -> Result<()> {
        self.mailbox(worker)
            .sender
            .send(record.clone())
            .map_err(|e| anyhow!("Work channel for {} closed: {}", worker, e))
    }

    async fn next_response(&self) -> Result<Option<InboundResponse>> {
        let mut rx = self.responses.receiver.lock().await;
        Ok(rx.recv().await)
    }
}

#[async_trait]
impl WorkerChannel for InMemoryTransport {
    async fn next_dispatch(&self, worker: &str) -> Result<Option<DispatchRecord>> {
        let mailbox = self.mailbox(worker);
        let mut rx = mailbox.receiver.lock().await;
        Ok(rx.recv().await)
    }

    async fn respond(&self, workflow_id: Uuid, payload: &ResponsePayload) -> Result<()> {
        let response = InboundResponse {
            workflow_id,
            payload: payload.clone(),
        };
        self.responses
            .sender
            .send(response)
            .map_err(|e| anyhow!("Response channel closed: {}", e))
    }
}

/// Snapshot store that expires entries lazily on read.
pub struct InMemorySnapshotStore {
    // Map<WorkflowId, (ExpiresAt, Snapshot)>
    snapshots: DashMap<Uuid, (Instant, WorkflowSnapshot)>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
        }
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &WorkflowSnapshot, ttl: Duration) -> Result<()> {
        self.snapshots
            .insert(snapshot.id, (Instant::now() + ttl, snapshot.clone()));
        Ok(())
    }

    async fn load(&self, workflow_id: Uuid) -> Result<Option<WorkflowSnapshot>> {
        // Clone out first so the shard lock is released before a removal.
        let entry = self.snapshots.get(&workflow_id).map(|e| e.value().clone());
        match entry {
            Some((expires_at, snapshot)) if Instant::now() < expires_at => Ok(Some(snapshot)),
            Some(_) => {
                self.snapshots.remove(&workflow_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

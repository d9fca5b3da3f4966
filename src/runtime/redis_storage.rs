use async_trait::async_trait;
use crate::config::RedisConfig;
use crate::graph::WorkflowSnapshot;
use crate::runtime::message::{
    DispatchRecord, InboundResponse, ResponsePayload, parse_result_address, result_address, work_address,
};
use crate::runtime::storage::{SnapshotStore, Transport, WorkerChannel};
use anyhow::{Context as AnyhowContext, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Dispatch goes through a Redis list per worker (`LPUSH work.<worker>`,
/// consumed with `BRPOP`); responses are published on `result.<workflow_id>`
/// and received through a single pattern subscription.
///
/// Pub/sub does not buffer: call [`Transport::listen`] before dispatching.
/// A response published while the subscription is reconnecting is lost and
/// surfaces as a task timeout.
pub struct RedisTransport {
    client: redis::Client,
    work_prefix: String,
    result_prefix: String,
    responses: Mutex<Option<BoxStream<'static, redis::Msg>>>,
}

impl RedisTransport {
    pub fn new(client: redis::Client, config: &RedisConfig) -> Self {
        Self {
            client,
            work_prefix: config.work_prefix.clone(),
            result_prefix: config.result_prefix.clone(),
            responses: Mutex::new(None),
        }
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, redis::Msg>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{}.*", self.result_prefix)).await?;
        Ok(pubsub.into_on_message().boxed())
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn dispatch(&self, worker: &str, record: &DispatchRecord) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(record)?;
        let _: () = conn.lpush(work_address(&self.work_prefix, worker), serialized).await?;
        Ok(())
    }

    async fn listen(&self) -> Result<()> {
        let mut guard = self.responses.lock().await;
        if guard.is_none() {
            let stream = self.subscribe().await.context("Failed to subscribe to result channels")?;
            *guard = Some(stream);
        }
        Ok(())
    }

    async fn next_response(&self) -> Result<Option<InboundResponse>> {
        let mut guard = self.responses.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.subscribe().await.context("Failed to subscribe to result channels")?,
        };

        loop {
            // A finished stream means the subscription connection dropped;
            // the next call subscribes again.
            let Some(msg) = stream.next().await else {
                return Ok(None);
            };

            let channel = msg.get_channel_name().to_string();
            let Some(workflow_id) = parse_result_address(&self.result_prefix, &channel) else {
                warn!(channel = %channel, "Ignoring message on unexpected channel");
                continue;
            };

            let raw: String = match msg.get_payload() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Ignoring unreadable response");
                    continue;
                }
            };

            match serde_json::from_str::<ResponsePayload>(&raw) {
                Ok(payload) => {
                    *guard = Some(stream);
                    return Ok(Some(InboundResponse { workflow_id, payload }));
                }
                Err(e) => warn!(channel = %channel, error = %e, "Ignoring malformed response"),
            }
        }
    }
}

#[async_trait]
impl WorkerChannel for RedisTransport {
    async fn next_dispatch(&self, worker: &str) -> Result<Option<DispatchRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Short BRPOP timeout keeps the worker loop responsive.
        let result: Option<(String, String)> = conn.brpop(work_address(&self.work_prefix, worker), 1.0).await?;

        if let Some((_, record_json)) = result {
            let record = serde_json::from_str(&record_json)?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    async fn respond(&self, workflow_id: Uuid, payload: &ResponsePayload) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = conn.publish(result_address(&self.result_prefix, workflow_id), serialized).await?;
        Ok(())
    }
}

/// Stores snapshots as JSON strings under `<prefix>:<workflow_id>` with a TTL.
pub struct RedisSnapshotStore {
    client: redis::Client,
    prefix: String,
}

impl RedisSnapshotStore {
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, workflow_id: Uuid) -> String {
        format!("{}:{}", self.prefix, workflow_id)
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn save(&self, snapshot: &WorkflowSnapshot, ttl: Duration) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(snapshot)?;
        let _: () = redis::cmd("SET")
            .arg(self.key(snapshot.id))
            .arg(serialized)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn load(&self, workflow_id: Uuid) -> Result<Option<WorkflowSnapshot>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(self.key(workflow_id)).await?;

        if let Some(s) = raw {
            let snapshot = serde_json::from_str(&s)?;
            Ok(Some(snapshot))
        } else {
            Ok(None)
        }
    }
}

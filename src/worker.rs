//! Worker-side harness: pulls dispatch records for one worker identity,
//! runs a [`WorkFunction`] on each and publishes the result.

use async_trait::async_trait;
use crate::runtime::message::{DispatchRecord, ResponsePayload};
use crate::runtime::storage::WorkerChannel;
use anyhow::Result;
use serde_json::{Value, json};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait WorkFunction: Send + Sync + Debug {
    fn name(&self) -> &str;
    async fn perform(&self, record: &DispatchRecord) -> Result<Value>;
}

/// Returns its input along with a full-confidence score.
#[derive(Debug)]
pub struct EchoWork;

#[async_trait]
impl WorkFunction for EchoWork {
    fn name(&self) -> &str {
        "echo"
    }

    async fn perform(&self, record: &DispatchRecord) -> Result<Value> {
        Ok(json!({
            "task_id": record.task_id,
            "input": record.input_data,
            "confidence": 1.0,
        }))
    }
}

pub struct Worker {
    identity: String,
    channel: Arc<dyn WorkerChannel>,
    function: Arc<dyn WorkFunction>,
    retry_interval: Duration,
}

impl Worker {
    pub fn new(identity: &str, channel: Arc<dyn WorkerChannel>, function: Arc<dyn WorkFunction>) -> Self {
        Self {
            identity: identity.to_string(),
            channel,
            function,
            retry_interval: Duration::from_secs(1),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Handles at most one dispatch. Returns false when none was waiting.
    ///
    /// A failing work function sends no response; the scheduler side sees a
    /// timeout and retries.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(record) = self.channel.next_dispatch(&self.identity).await? else {
            return Ok(false);
        };
        debug!(worker = %self.identity, workflow_id = %record.workflow_id, task_id = %record.task_id, "Dispatch received");

        match self.function.perform(&record).await {
            Ok(result) => {
                let payload = ResponsePayload::for_task(&record.task_id, result);
                self.channel.respond(record.workflow_id, &payload).await?;
            }
            Err(e) => {
                warn!(worker = %self.identity, task_id = %record.task_id, error = %e, "Work function failed");
            }
        }
        Ok(true)
    }

    pub async fn run(&self) {
        info!(worker = %self.identity, function = self.function.name(), "Worker started");
        loop {
            if let Err(e) = self.process_next().await {
                error!(worker = %self.identity, error = %e, "Worker loop error");
                tokio::time::sleep(self.retry_interval).await;
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Outbound work item, addressed to `work.<worker>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub workflow_id: Uuid,
    pub task_id: String,
    pub input_data: Map<String, Value>,
    pub context: Map<String, Value>,
}

/// Body of a response published on `result.<workflow_id>`.
///
/// `task_id` is optional on the wire; without it the response resolves the
/// oldest outstanding dispatch of that workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ResponsePayload {
    pub fn for_task(task_id: &str, result: Value) -> Self {
        Self {
            result,
            task_id: Some(task_id.to_string()),
        }
    }
}

/// A response together with the workflow it was addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundResponse {
    pub workflow_id: Uuid,
    pub payload: ResponsePayload,
}

pub fn work_address(prefix: &str, worker: &str) -> String {
    format!("{}.{}", prefix, worker)
}

pub fn result_address(prefix: &str, workflow_id: Uuid) -> String {
    format!("{}.{}", prefix, workflow_id)
}

/// Extracts the workflow id from a `result.<workflow_id>` address.
pub fn parse_result_address(prefix: &str, address: &str) -> Option<Uuid> {
    let id = address.strip_prefix(prefix)?.strip_prefix('.')?;
    Uuid::parse_str(id).ok()
}

use crate::graph::{Task, TaskKind, Workflow};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Everything a handler may read about the task it runs. Built by the
/// scheduler right before dispatch; cheap to clone apart from the input.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub workflow_id: Uuid,
    pub task_id: String,
    pub kind: TaskKind,
    pub input: Map<String, Value>,
    pub timeout: Duration,
    pub context: Arc<Map<String, Value>>,
    /// Dependency results in declaration order.
    pub dependencies: Vec<(String, Value)>,
}

impl TaskContext {
    pub fn new(workflow: &Workflow, task: &Task) -> Self {
        let dependencies = task
            .dependencies
            .iter()
            .map(|dep| {
                let result = workflow
                    .task(dep)
                    .and_then(|t| t.result.clone())
                    .unwrap_or(Value::Null);
                (dep.clone(), result)
            })
            .collect();

        Self {
            workflow_id: workflow.id,
            task_id: task.id.clone(),
            kind: task.kind.clone(),
            input: task.input.clone(),
            timeout: task.timeout,
            context: Arc::clone(&workflow.context),
            dependencies,
        }
    }

    pub fn dependency(&self, id: &str) -> Option<&Value> {
        self.dependencies
            .iter()
            .find(|(dep, _)| dep == id)
            .map(|(_, v)| v)
    }

    pub fn first_dependency(&self) -> Option<&Value> {
        self.dependencies.first().map(|(_, v)| v)
    }

    pub fn last_dependency(&self) -> Option<&Value> {
        self.dependencies.last().map(|(_, v)| v)
    }
}

use async_trait::async_trait;
use crate::error::TaskError;
use crate::graph::TaskType;
use crate::runtime::context::TaskContext;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

pub mod flow;
pub mod remote;

/// Behaviour behind one task type. A handler owns no workflow state: it sees
/// a [`TaskContext`] and returns the task's result or an error.
#[async_trait]
pub trait TaskHandler: Send + Sync + Debug {
    fn task_type(&self) -> TaskType;
    async fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError>;
}

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the local flow handlers: decision, parallel-join, sequence
    /// and conditional. Remote work needs a transport and is added separately.
    pub fn with_flow_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(flow::DecisionHandler));
        registry.register(Arc::new(flow::ParallelJoinHandler));
        registry.register(Arc::new(flow::SequenceHandler));
        registry.register(Arc::new(flow::ConditionalHandler));
        registry
    }

    /// Replaces any handler previously registered for the same type.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.insert(handler.task_type(), handler)
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

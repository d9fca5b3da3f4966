use async_trait::async_trait;
use crate::error::TaskError;
use crate::graph::predicate::lookup;
use crate::graph::{TaskKind, TaskType};
use crate::handlers::TaskHandler;
use crate::runtime::context::TaskContext;
use serde_json::Value;

// --- Decision ---

/// Applies the task's rule to the first dependency's result.
///
/// No dependency, or a result that is not an object, passes. A missing or
/// non-numeric field reads as 0.0.
#[derive(Debug)]
pub struct DecisionHandler;

#[async_trait]
impl TaskHandler for DecisionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Decision
    }

    async fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let TaskKind::Decision(rule) = &ctx.kind else {
            return Err(TaskError::InvalidPayload(format!("{} is not a decision task", ctx.task_id)));
        };

        let Some(Value::Object(result)) = ctx.first_dependency() else {
            return Ok(Value::Bool(true));
        };

        let actual = lookup(result, &rule.field)
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let passed = rule.op.apply(&Value::from(actual), &Value::from(rule.threshold));
        Ok(Value::Bool(passed))
    }
}

// --- ParallelJoin ---

#[derive(Debug)]
pub struct ParallelJoinHandler;

#[async_trait]
impl TaskHandler for ParallelJoinHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ParallelJoin
    }

    async fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let results = ctx.dependencies.iter().map(|(_, v)| v.clone()).collect();
        Ok(Value::Array(results))
    }
}

// --- Sequence ---

#[derive(Debug)]
pub struct SequenceHandler;

#[async_trait]
impl TaskHandler for SequenceHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Sequence
    }

    async fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        Ok(ctx.last_dependency().cloned().unwrap_or(Value::Null))
    }
}

// --- Conditional ---

/// Evaluates the task's predicate against the workflow context.
#[derive(Debug)]
pub struct ConditionalHandler;

#[async_trait]
impl TaskHandler for ConditionalHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Conditional
    }

    async fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let TaskKind::Conditional { predicate } = &ctx.kind else {
            return Err(TaskError::InvalidPayload(format!("{} is not a conditional task", ctx.task_id)));
        };
        Ok(Value::Bool(predicate.evaluate(&ctx.context)))
    }
}

//! Error taxonomy for graph construction, task execution and workflow failure.

use std::time::Duration;
use thiserror::Error;

/// Structural problems found while building a task graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {0} depends on itself")]
    SelfDependency(String),

    #[error("task {task} references {dependency} before it was declared")]
    ForwardReference { task: String, dependency: String },

    #[error("dependency cycle through tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("workflow has no tasks")]
    Empty,
}

/// A failed attempt of a single task. Every variant is retryable until the
/// task's retry budget is spent.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("no handler registered for task type {0}")]
    MissingHandler(String),

    #[error("handler aborted: {0}")]
    Panicked(String),

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),
}

/// The cause recorded when a workflow ends `failed`.
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("task {task_id} failed permanently after {retries} retries: {last_error}")]
    PermanentFailure {
        task_id: String,
        retries: u32,
        last_error: String,
    },

    #[error("stalled: no progress for {idle:?} (window {window:?}), waiting tasks: {}", .waiting.join(", "))]
    StallTimeout {
        window: Duration,
        idle: Duration,
        waiting: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Rejections from the conditional predicate parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },

    #[error("invalid number literal {0:?}")]
    InvalidNumber(String),

    #[error("empty predicate")]
    Empty,

    #[error("predicate nested deeper than {0} levels")]
    TooDeep(usize),
}

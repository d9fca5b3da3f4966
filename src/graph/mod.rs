//! Workflow and task data model.
//!
//! A [`Workflow`] owns its tasks and execution history. It is only ever
//! mutated by the scheduler loop that runs it; everyone else sees
//! [`WorkflowSnapshot`] copies.

pub mod builder;
pub mod predicate;

use crate::error::{GraphError, TaskError, WorkflowError};
use chrono::{DateTime, Utc};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use predicate::{CompareOp, Predicate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Discriminant of [`TaskKind`]; handlers are registered per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RemoteWork,
    Decision,
    ParallelJoin,
    Sequence,
    Conditional,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::RemoteWork => "remote_work",
            TaskType::Decision => "decision",
            TaskType::ParallelJoin => "parallel_join",
            TaskType::Sequence => "sequence",
            TaskType::Conditional => "conditional",
        };
        f.write_str(name)
    }
}

/// Rule evaluated by a decision task against its single dependency's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRule {
    #[serde(default = "DecisionRule::default_field")]
    pub field: String,
    #[serde(default)]
    pub op: CompareOp,
    pub threshold: f64,
}

impl DecisionRule {
    fn default_field() -> String {
        "confidence".to_string()
    }

    /// `field >= threshold`
    pub fn at_least(field: &str, threshold: f64) -> Self {
        Self {
            field: field.to_string(),
            op: CompareOp::Ge,
            threshold,
        }
    }
}

impl Default for DecisionRule {
    fn default() -> Self {
        Self::at_least("confidence", 0.8)
    }
}

/// What a task does, with the payload specific to that behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Dispatch to an external worker and await its response.
    RemoteWork { worker: String },
    Decision(DecisionRule),
    /// Collect the results of all dependencies, in declaration order.
    ParallelJoin,
    /// Forward the result of the last declared dependency.
    Sequence,
    Conditional { predicate: Predicate },
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::RemoteWork { .. } => TaskType::RemoteWork,
            TaskKind::Decision(_) => TaskType::Decision,
            TaskKind::ParallelJoin => TaskType::ParallelJoin,
            TaskKind::Sequence => TaskType::Sequence,
            TaskKind::Conditional { .. } => TaskType::Conditional,
        }
    }

    pub fn worker(&self) -> Option<&str> {
        match self {
            TaskKind::RemoteWork { worker } => Some(worker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    AwaitingRetry,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub input: Map<String, Value>,
    /// Declaration order matters to parallel-join and sequence tasks.
    pub dependencies: Vec<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time of the successful attempt.
    pub duration: Option<Duration>,
    retry_at: Option<Instant>,
}

impl Task {
    pub fn new(id: &str, kind: TaskKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            input: Map::new(),
            dependencies: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            timeout: Duration::from_secs(300),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration: None,
            retry_at: None,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.kind.task_type()
    }

    pub fn worker(&self) -> Option<&str> {
        self.kind.worker()
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self, result: Value, elapsed: Duration) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
        self.duration = Some(elapsed);
    }

    /// Records a failed attempt. Returns the new status: `AwaitingRetry` while
    /// the retry budget lasts, `Failed` afterwards.
    pub(crate) fn fail_attempt(&mut self, error: &TaskError, backoff: impl Fn(u32) -> Duration) -> TaskStatus {
        self.retry_count += 1;
        self.error = Some(error.to_string());
        if self.retry_count <= self.max_retries {
            self.status = TaskStatus::AwaitingRetry;
            self.retry_at = Some(Instant::now() + backoff(self.retry_count));
        } else {
            self.status = TaskStatus::Failed;
            self.retry_at = None;
            self.completed_at = Some(Utc::now());
        }
        self.status
    }

    pub(crate) fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.retry_at = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    TaskStarted,
    TaskCompleted,
    TaskRetryScheduled,
    TaskRequeued,
    TaskFailed,
    WorkflowCompleted,
    WorkflowFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub event: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEvent {
    pub fn workflow(event: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            task_id: None,
            status: None,
            duration_secs: None,
            error: None,
        }
    }

    pub fn task(event: EventKind, task: &Task) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            task_id: Some(task.id.clone()),
            status: Some(task.status),
            duration_secs: task.duration.map(|d| d.as_secs_f64()),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub retries: u32,
    pub duration_secs: Option<f64>,
}

/// Read-only copy of a workflow's state. Served by `get_status` and written
/// to the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub id: Uuid,
    pub name: String,
    pub created_by: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub task_count: usize,
    pub tasks: BTreeMap<String, TaskReport>,
    pub failure: Option<String>,
    pub history: Vec<HistoryEvent>,
}

#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub context: Arc<Map<String, Value>>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    history: VecDeque<HistoryEvent>,
    history_limit: usize,
    last_progress: Instant,
    failure: Option<WorkflowError>,
}

impl Workflow {
    /// Builds a workflow after checking that ids are unique, every dependency
    /// exists, no task depends on itself and the graph is acyclic.
    pub fn new(
        name: &str,
        description: &str,
        created_by: &str,
        context: Map<String, Value>,
        tasks: Vec<Task>,
    ) -> Result<Self, GraphError> {
        validate(&tasks)?;
        Ok(Self::new_unchecked(name, description, created_by, context, tasks))
    }

    /// Builds a workflow without graph validation. A graph that can never
    /// finish is terminated by the scheduler's stall detection.
    ///
    /// Task ids still key every lookup, so a task reusing an earlier id is
    /// dropped.
    pub fn new_unchecked(
        name: &str,
        description: &str,
        created_by: &str,
        context: Map<String, Value>,
        tasks: Vec<Task>,
    ) -> Self {
        let mut index = HashMap::with_capacity(tasks.len());
        let mut unique = Vec::with_capacity(tasks.len());
        for task in tasks {
            if index.contains_key(&task.id) {
                warn!(task_id = %task.id, "Dropping task with duplicate id");
                continue;
            }
            index.insert(task.id.clone(), unique.len());
            unique.push(task);
        }
        let tasks = unique;

        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            created_by: created_by.to_string(),
            context: Arc::new(context),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            tasks,
            index,
            history: VecDeque::new(),
            history_limit: 100,
            last_progress: Instant::now(),
            failure: None,
        }
    }

    pub fn set_history_limit(&mut self, limit: usize) {
        self.history_limit = limit.max(1);
        self.truncate_history();
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub(crate) fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.index.get(id).map(|&i| &mut self.tasks[i])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Pending tasks whose dependencies have all completed.
    pub fn ready_set(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.dependencies.iter().all(|dep| {
                    self.task(dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                })
            })
            .map(|t| t.id.clone())
            .collect()
    }

    /// No task is pending, running or awaiting a retry.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn has_pending_retries(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::AwaitingRetry)
    }

    /// Earliest instant at which an awaiting-retry task becomes pending again.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.tasks.iter().filter_map(|t| t.retry_at).min()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    pub fn is_stalled(&self, now: Instant, window: Duration) -> bool {
        self.ready_set().is_empty()
            && !self.is_complete()
            && !self.has_pending_retries()
            && self.idle_for(now) > window
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEvent> {
        self.history.iter()
    }

    /// Appends an event and counts it as progress for stall detection.
    pub fn record(&mut self, event: HistoryEvent) {
        self.history.push_back(event);
        self.truncate_history();
        self.last_progress = Instant::now();
    }

    fn truncate_history(&mut self) {
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn failure(&self) -> Option<&WorkflowError> {
        self.failure.as_ref()
    }

    pub(crate) fn set_failure(&mut self, error: WorkflowError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    pub fn snapshot(&self, history_len: usize) -> WorkflowSnapshot {
        let tasks = self
            .tasks
            .iter()
            .map(|t| {
                let report = TaskReport {
                    status: t.status,
                    worker: t.worker().map(str::to_string),
                    retries: t.retry_count,
                    duration_secs: t.duration.map(|d| d.as_secs_f64()),
                };
                (t.id.clone(), report)
            })
            .collect();

        let skip = self.history.len().saturating_sub(history_len);

        WorkflowSnapshot {
            id: self.id,
            name: self.name.clone(),
            created_by: self.created_by.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            task_count: self.tasks.len(),
            tasks,
            failure: self.failure.as_ref().map(|e| e.to_string()),
            history: self.history.iter().skip(skip).cloned().collect(),
        }
    }
}

/// Checks the structural invariants of a task graph.
pub fn validate(tasks: &[Task]) -> Result<(), GraphError> {
    if tasks.is_empty() {
        return Err(GraphError::Empty);
    }

    let mut ids = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(GraphError::DuplicateTask(task.id.clone()));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if dep == &task.id {
                return Err(GraphError::SelfDependency(task.id.clone()));
            }
            if !ids.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut graph: DiGraph<&str, ()> = DiGraph::with_capacity(tasks.len(), tasks.len());
    let nodes: HashMap<&str, NodeIndex> = tasks
        .iter()
        .map(|t| (t.id.as_str(), graph.add_node(t.id.as_str())))
        .collect();
    for task in tasks {
        for dep in &task.dependencies {
            graph.update_edge(nodes[dep.as_str()], nodes[task.id.as_str()], ());
        }
    }

    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    // Every strongly connected component with more than one task is a cycle.
    let mut cycle: Vec<String> = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .map(|node| graph[node].to_string())
        .collect();
    cycle.sort();
    Err(GraphError::Cycle(cycle))
}

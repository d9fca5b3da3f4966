use crate::error::GraphError;
use crate::graph::predicate::Predicate;
use crate::graph::{DecisionRule, Task, TaskKind, Workflow};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// Per-task settings applied when a task does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskDefaults {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Incremental task-graph builder.
///
/// A task may only depend on tasks added before it, so every graph built here
/// is acyclic by construction. The first violation is remembered and reported
/// by [`GraphBuilder::build`].
pub struct GraphBuilder {
    name: String,
    description: String,
    created_by: String,
    context: Map<String, Value>,
    defaults: TaskDefaults,
    history_limit: Option<usize>,
    tasks: Vec<Task>,
    declared: HashSet<String>,
    error: Option<GraphError>,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            created_by: "system".to_string(),
            context: Map::new(),
            defaults: TaskDefaults::default(),
            history_limit: None,
            tasks: Vec::new(),
            declared: HashSet::new(),
            error: None,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn created_by(mut self, creator: &str) -> Self {
        self.created_by = creator.to_string();
        self
    }

    pub fn context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn defaults(mut self, defaults: TaskDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn task(self, id: &str, kind: TaskKind) -> TaskBuilder {
        let mut task = Task::new(id, kind);
        task.max_retries = self.defaults.max_retries;
        task.timeout = self.defaults.timeout;
        TaskBuilder { graph: self, task }
    }

    pub fn remote(self, id: &str, worker: &str) -> TaskBuilder {
        self.task(id, TaskKind::RemoteWork { worker: worker.to_string() })
    }

    pub fn decision(self, id: &str, rule: DecisionRule) -> TaskBuilder {
        self.task(id, TaskKind::Decision(rule))
    }

    pub fn parallel_join(self, id: &str) -> TaskBuilder {
        self.task(id, TaskKind::ParallelJoin)
    }

    pub fn sequence(self, id: &str) -> TaskBuilder {
        self.task(id, TaskKind::Sequence)
    }

    pub fn conditional(self, id: &str, predicate: Predicate) -> TaskBuilder {
        self.task(id, TaskKind::Conditional { predicate })
    }

    fn push(&mut self, task: Task) {
        if self.error.is_some() {
            return;
        }
        if self.declared.contains(&task.id) {
            self.error = Some(GraphError::DuplicateTask(task.id));
            return;
        }
        for dep in &task.dependencies {
            if dep == &task.id {
                self.error = Some(GraphError::SelfDependency(task.id.clone()));
                return;
            }
            if !self.declared.contains(dep) {
                self.error = Some(GraphError::ForwardReference {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
                return;
            }
        }
        self.declared.insert(task.id.clone());
        self.tasks.push(task);
    }

    pub fn build(self) -> Result<Workflow, GraphError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut workflow = Workflow::new(
            &self.name,
            &self.description,
            &self.created_by,
            self.context,
            self.tasks,
        )?;
        if let Some(limit) = self.history_limit {
            workflow.set_history_limit(limit);
        }
        Ok(workflow)
    }
}

pub struct TaskBuilder {
    graph: GraphBuilder,
    task: Task,
}

impl TaskBuilder {
    pub fn input(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.task.input.insert(key.to_string(), value.into());
        self
    }

    pub fn inputs(mut self, input: Map<String, Value>) -> Self {
        self.task.input.extend(input);
        self
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        if !self.task.dependencies.iter().any(|d| d == dependency) {
            self.task.dependencies.push(dependency.to_string());
        }
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.task.timeout = timeout;
        self
    }

    pub fn build(mut self) -> GraphBuilder {
        self.graph.push(self.task);
        self.graph
    }
}

//! Turns a free-text request into an initial task graph.

pub mod keyword;

use crate::graph::builder::{GraphBuilder, TaskDefaults};
use crate::graph::{Task, TaskKind, Workflow};
use crate::error::GraphError;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// One task proposed by a classifier. Dependencies may only name tasks that
/// appear earlier in the same plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub id: String,
    pub kind: TaskKind,
    pub input: Map<String, Value>,
    pub dependencies: Vec<String>,
}

impl PlannedTask {
    pub fn new(id: &str, kind: TaskKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            input: Map::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn remote(id: &str, worker: &str) -> Self {
        Self::new(id, TaskKind::RemoteWork { worker: worker.to_string() })
    }

    pub fn after(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }
}

/// Strategy that recognises a request and proposes a plan for it.
/// Returning `None` means "not recognised" and is never an error.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, request: &str, context: &Map<String, Value>) -> Option<Vec<PlannedTask>>;
}

pub struct Decomposer {
    classifier: Box<dyn Classifier>,
    fallback_worker: String,
    defaults: TaskDefaults,
    history_limit: usize,
}

impl Decomposer {
    pub fn new(classifier: Box<dyn Classifier>, fallback_worker: &str) -> Self {
        Self {
            classifier,
            fallback_worker: fallback_worker.to_string(),
            defaults: TaskDefaults::default(),
            history_limit: 100,
        }
    }

    pub fn with_defaults(mut self, defaults: TaskDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// Always yields a workflow: an unrecognised request, or a plan that does
    /// not form a valid graph, degrades to a single generic task.
    pub fn decompose(&self, request: &str, creator: &str, context: &Map<String, Value>) -> Workflow {
        if let Some(plan) = self.classifier.classify(request, context) {
            match self.assemble(request, creator, context, plan) {
                Ok(workflow) => {
                    debug!(classifier = self.classifier.name(), tasks = workflow.task_count(), "Request decomposed");
                    return workflow;
                }
                Err(e) => {
                    warn!(classifier = self.classifier.name(), error = %e, "Rejected plan, using single-task fallback");
                }
            }
        } else {
            debug!(classifier = self.classifier.name(), "No pattern matched, using single-task fallback");
        }

        self.fallback(request, creator, context)
    }

    /// A lone task without dependencies satisfies every graph invariant.
    fn fallback(&self, request: &str, creator: &str, context: &Map<String, Value>) -> Workflow {
        let mut task = Task::new("main", TaskKind::RemoteWork { worker: self.fallback_worker.clone() });
        task.input = default_input(request, context);
        task.max_retries = self.defaults.max_retries;
        task.timeout = self.defaults.timeout;

        let mut workflow = Workflow::new_unchecked(&workflow_name(request), request, creator, context.clone(), vec![task]);
        workflow.set_history_limit(self.history_limit);
        workflow
    }

    fn assemble(
        &self,
        request: &str,
        creator: &str,
        context: &Map<String, Value>,
        plan: Vec<PlannedTask>,
    ) -> Result<Workflow, GraphError> {
        let mut graph = GraphBuilder::new(&workflow_name(request))
            .description(request)
            .created_by(creator)
            .context(context.clone())
            .defaults(self.defaults)
            .history_limit(self.history_limit);

        for planned in plan {
            let mut input = planned.input;
            if planned.kind.worker().is_some() && input.is_empty() {
                input = default_input(request, context);
            }
            let mut task = graph.task(&planned.id, planned.kind).inputs(input);
            for dep in &planned.dependencies {
                task = task.depends_on(dep);
            }
            graph = task.build();
        }

        graph.build()
    }
}

/// Input handed to every generated remote-work task.
pub fn default_input(request: &str, context: &Map<String, Value>) -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("request".to_string(), json!(request));
    input.insert("context".to_string(), Value::Object(context.clone()));
    input
}

fn workflow_name(request: &str) -> String {
    let head: String = request.chars().take(50).collect();
    format!("Auto-generated: {}", head)
}

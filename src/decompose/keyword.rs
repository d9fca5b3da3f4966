use crate::decompose::{Classifier, PlannedTask};
use crate::graph::{DecisionRule, TaskKind};
use serde_json::{Map, Value};

/// Deterministic keyword classifier.
///
/// - "research" and "write": `research` -> `write` -> `review`
/// - "analyze": `analyze` -> `validate` (decision on confidence >= 0.8)
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    analysis_worker: String,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            analysis_worker: "coordinator".to_string(),
        }
    }

    pub fn with_analysis_worker(mut self, worker: &str) -> Self {
        self.analysis_worker = worker.to_string();
        self
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, request: &str, _context: &Map<String, Value>) -> Option<Vec<PlannedTask>> {
        let lowered = request.to_lowercase();

        if lowered.contains("research") && lowered.contains("write") {
            return Some(vec![
                PlannedTask::remote("research", "researcher"),
                PlannedTask::remote("write", "writer").after("research"),
                PlannedTask::remote("review", "reviewer").after("write"),
            ]);
        }

        if lowered.contains("analyze") {
            return Some(vec![
                PlannedTask::remote("analyze", &self.analysis_worker),
                PlannedTask::new("validate", TaskKind::Decision(DecisionRule::default())).after("analyze"),
            ]);
        }

        None
    }
}

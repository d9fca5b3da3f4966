use conductor::error::GraphError;
use conductor::graph::builder::{GraphBuilder, TaskDefaults};
use conductor::graph::{DecisionRule, Task, TaskKind, TaskStatus, Workflow, WorkflowStatus, validate};
use serde_json::{Map, json};
use std::time::Duration;

fn remote(id: &str, deps: &[&str]) -> Task {
    let mut task = Task::new(id, TaskKind::RemoteWork { worker: "w".to_string() });
    task.dependencies = deps.iter().map(|d| d.to_string()).collect();
    task
}

#[test]
fn test_builder_linear_chain() {
    let workflow = GraphBuilder::new("chain")
        .description("three steps")
        .created_by("alice")
        .var("topic", "rust")
        .remote("a", "researcher").build()
        .remote("b", "writer").depends_on("a").build()
        .remote("c", "reviewer").depends_on("b").build()
        .build()
        .expect("valid graph");

    assert_eq!(workflow.task_count(), 3);
    assert_eq!(workflow.status, WorkflowStatus::Pending);
    assert_eq!(workflow.created_by, "alice");
    assert_eq!(workflow.context.get("topic"), Some(&json!("rust")));
    assert_eq!(workflow.ready_set(), vec!["a".to_string()]);
    assert_eq!(workflow.task("c").unwrap().dependencies, vec!["b".to_string()]);
    assert_eq!(workflow.task("b").unwrap().worker(), Some("writer"));
}

#[test]
fn test_builder_applies_defaults_and_overrides() {
    let defaults = TaskDefaults {
        max_retries: 1,
        timeout: Duration::from_secs(5),
    };
    let workflow = GraphBuilder::new("defaults")
        .defaults(defaults)
        .remote("a", "w").build()
        .remote("b", "w").max_retries(7).timeout(Duration::from_secs(9)).depends_on("a").build()
        .build()
        .unwrap();

    let a = workflow.task("a").unwrap();
    assert_eq!(a.max_retries, 1);
    assert_eq!(a.timeout, Duration::from_secs(5));

    let b = workflow.task("b").unwrap();
    assert_eq!(b.max_retries, 7);
    assert_eq!(b.timeout, Duration::from_secs(9));
}

#[test]
fn test_builder_rejects_forward_reference() {
    let err = GraphBuilder::new("bad")
        .remote("a", "w").depends_on("b").build()
        .remote("b", "w").build()
        .build()
        .unwrap_err();

    assert_eq!(
        err,
        GraphError::ForwardReference {
            task: "a".to_string(),
            dependency: "b".to_string()
        }
    );
}

#[test]
fn test_builder_rejects_duplicate_and_self_reference() {
    let dup = GraphBuilder::new("dup")
        .remote("a", "w").build()
        .remote("a", "w").build()
        .build()
        .unwrap_err();
    assert_eq!(dup, GraphError::DuplicateTask("a".to_string()));

    let selfish = GraphBuilder::new("self")
        .remote("a", "w").depends_on("a").build()
        .build()
        .unwrap_err();
    assert_eq!(selfish, GraphError::SelfDependency("a".to_string()));
}

#[test]
fn test_depends_on_ignores_repeats() {
    let workflow = GraphBuilder::new("repeat")
        .remote("a", "w").build()
        .parallel_join("j").depends_on("a").depends_on("a").build()
        .build()
        .unwrap();
    assert_eq!(workflow.task("j").unwrap().dependencies.len(), 1);
}

#[test]
fn test_validate_detects_cycle() {
    let tasks = vec![remote("a", &["c"]), remote("b", &["a"]), remote("c", &["b"]), remote("d", &[])];
    match validate(&tasks) {
        Err(GraphError::Cycle(ids)) => assert_eq!(ids, vec!["a", "b", "c"]),
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_validate_unknown_dependency_and_empty() {
    let tasks = vec![remote("a", &["ghost"])];
    assert_eq!(
        validate(&tasks),
        Err(GraphError::UnknownDependency {
            task: "a".to_string(),
            dependency: "ghost".to_string()
        })
    );
    assert_eq!(validate(&[]), Err(GraphError::Empty));
}

#[test]
fn test_workflow_new_validates_but_unchecked_does_not() {
    let cyclic = vec![remote("a", &["b"]), remote("b", &["a"])];
    assert!(Workflow::new("c", "", "t", Map::new(), cyclic.clone()).is_err());

    let workflow = Workflow::new_unchecked("c", "", "t", Map::new(), cyclic);
    assert_eq!(workflow.task_count(), 2);
    assert!(workflow.ready_set().is_empty());
    assert!(!workflow.is_complete());
}

#[test]
fn test_unchecked_keeps_first_of_duplicate_ids() {
    let tasks = vec![remote("a", &[]), remote("a", &["ghost"]), remote("b", &["a"])];
    let workflow = Workflow::new_unchecked("dup", "", "t", Map::new(), tasks);

    assert_eq!(workflow.task_count(), 2);
    assert!(workflow.task("a").unwrap().dependencies.is_empty());
    assert_eq!(workflow.ready_set(), vec!["a".to_string()]);
}

#[test]
fn test_validate_reports_only_tasks_on_the_cycle() {
    // "d" hangs off the cycle but is not part of it.
    let tasks = vec![remote("a", &["b"]), remote("b", &["a"]), remote("d", &["a"])];
    match validate(&tasks) {
        Err(GraphError::Cycle(ids)) => assert_eq!(ids, vec!["a", "b"]),
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_ready_set_waits_for_all_dependencies() {
    let workflow = GraphBuilder::new("diamond")
        .remote("a", "w").build()
        .remote("b", "w").build()
        .parallel_join("j").depends_on("a").depends_on("b").build()
        .build()
        .unwrap();

    let mut ready = workflow.ready_set();
    ready.sort();
    assert_eq!(ready, vec!["a".to_string(), "b".to_string()]);
    assert!(workflow.task("j").map(|t| t.status == TaskStatus::Pending).unwrap());
}

#[test]
fn test_snapshot_reports_tasks_and_bounded_history() {
    let mut workflow = GraphBuilder::new("snap")
        .created_by("bob")
        .remote("a", "w").build()
        .decision("d", DecisionRule::default()).depends_on("a").build()
        .build()
        .unwrap();
    workflow.set_history_limit(3);

    for _ in 0..5 {
        workflow.record(conductor::graph::HistoryEvent::workflow(conductor::graph::EventKind::WorkflowStarted));
    }
    assert_eq!(workflow.history().count(), 3);

    let snapshot = workflow.snapshot(2);
    assert_eq!(snapshot.created_by, "bob");
    assert_eq!(snapshot.task_count, 2);
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.tasks["a"].worker.as_deref(), Some("w"));
    assert_eq!(snapshot.tasks["d"].worker, None);
    assert_eq!(snapshot.tasks["d"].status, TaskStatus::Pending);
}

#[test]
fn test_task_kind_serialization_is_tagged() {
    let kind = TaskKind::RemoteWork { worker: "researcher".to_string() };
    let value = serde_json::to_value(&kind).unwrap();
    assert_eq!(value, json!({"type": "remote_work", "worker": "researcher"}));

    let decision: TaskKind = serde_json::from_value(json!({"type": "decision", "threshold": 0.5})).unwrap();
    assert_eq!(decision, TaskKind::Decision(DecisionRule::at_least("confidence", 0.5)));
}

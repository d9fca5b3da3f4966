use conductor::graph::builder::GraphBuilder;
use conductor::graph::predicate::Predicate;
use conductor::graph::{DecisionRule, TaskType, Workflow};
use conductor::handlers::flow::{ConditionalHandler, DecisionHandler, ParallelJoinHandler, SequenceHandler};
use conductor::handlers::{HandlerRegistry, TaskHandler};
use conductor::runtime::context::TaskContext;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Context for task `id` with the given dependency results.
fn ctx_for(workflow: &Workflow, id: &str, results: &[(&str, Value)]) -> TaskContext {
    let mut ctx = TaskContext::new(workflow, workflow.task(id).unwrap());
    for (dep, value) in results {
        if let Some(slot) = ctx.dependencies.iter_mut().find(|(d, _)| d == dep) {
            slot.1 = value.clone();
        }
    }
    ctx
}

fn decision_workflow(rule: DecisionRule) -> Workflow {
    GraphBuilder::new("decision")
        .remote("analyze", "w").build()
        .decision("validate", rule).depends_on("analyze").build()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_decision_thresholds() {
    let workflow = decision_workflow(DecisionRule::default());

    let pass = ctx_for(&workflow, "validate", &[("analyze", json!({"confidence": 0.9}))]);
    assert_eq!(DecisionHandler.handle(&pass).await.unwrap(), json!(true));

    let edge = ctx_for(&workflow, "validate", &[("analyze", json!({"confidence": 0.8}))]);
    assert_eq!(DecisionHandler.handle(&edge).await.unwrap(), json!(true));

    let fail = ctx_for(&workflow, "validate", &[("analyze", json!({"confidence": 0.3}))]);
    assert_eq!(DecisionHandler.handle(&fail).await.unwrap(), json!(false));
}

#[tokio::test]
async fn test_decision_defaults() {
    let workflow = decision_workflow(DecisionRule::default());

    // Missing field reads as 0.0
    let missing = ctx_for(&workflow, "validate", &[("analyze", json!({"other": 1}))]);
    assert_eq!(DecisionHandler.handle(&missing).await.unwrap(), json!(false));

    // Non-object result passes
    let scalar = ctx_for(&workflow, "validate", &[("analyze", json!("done"))]);
    assert_eq!(DecisionHandler.handle(&scalar).await.unwrap(), json!(true));

    // No dependency passes
    let lone = GraphBuilder::new("lone")
        .decision("d", DecisionRule::default()).build()
        .build()
        .unwrap();
    let ctx = TaskContext::new(&lone, lone.task("d").unwrap());
    assert_eq!(DecisionHandler.handle(&ctx).await.unwrap(), json!(true));
}

#[tokio::test]
async fn test_decision_custom_field() {
    let rule = DecisionRule::at_least("metrics.score", 10.0);
    let workflow = decision_workflow(rule);
    let ctx = ctx_for(&workflow, "validate", &[("analyze", json!({"metrics": {"score": 12}}))]);
    assert_eq!(DecisionHandler.handle(&ctx).await.unwrap(), json!(true));
}

#[tokio::test]
async fn test_parallel_join_and_sequence_follow_declaration_order() {
    let workflow = GraphBuilder::new("join")
        .remote("first", "w").build()
        .remote("second", "w").build()
        .parallel_join("join").depends_on("second").depends_on("first").build()
        .sequence("seq").depends_on("second").depends_on("first").build()
        .build()
        .unwrap();

    let results = [("first", json!(1)), ("second", json!(2))];

    let join = ctx_for(&workflow, "join", &results);
    assert_eq!(ParallelJoinHandler.handle(&join).await.unwrap(), json!([2, 1]));

    let seq = ctx_for(&workflow, "seq", &results);
    assert_eq!(SequenceHandler.handle(&seq).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_sequence_without_dependencies_is_null() {
    let workflow = GraphBuilder::new("seq").sequence("s").build().build().unwrap();
    let ctx = TaskContext::new(&workflow, workflow.task("s").unwrap());
    assert_eq!(SequenceHandler.handle(&ctx).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_conditional_reads_workflow_context() {
    let predicate = Predicate::parse("priority >= 3 && team == 'core'").unwrap();
    let workflow = GraphBuilder::new("cond")
        .var("priority", 4)
        .var("team", "core")
        .conditional("gate", predicate.clone()).build()
        .build()
        .unwrap();
    let ctx = TaskContext::new(&workflow, workflow.task("gate").unwrap());
    assert_eq!(ConditionalHandler.handle(&ctx).await.unwrap(), json!(true));

    let mut context = Map::new();
    context.insert("priority".to_string(), json!(1));
    let other = GraphBuilder::new("cond")
        .context(context)
        .conditional("gate", predicate).build()
        .build()
        .unwrap();
    let ctx = TaskContext::new(&other, other.task("gate").unwrap());
    assert_eq!(ConditionalHandler.handle(&ctx).await.unwrap(), json!(false));
}

#[tokio::test]
async fn test_handler_rejects_mismatched_kind() {
    let workflow = GraphBuilder::new("m").remote("r", "w").build().build().unwrap();
    let ctx = TaskContext::new(&workflow, workflow.task("r").unwrap());
    assert!(DecisionHandler.handle(&ctx).await.is_err());
    assert!(ConditionalHandler.handle(&ctx).await.is_err());
}

#[test]
fn test_registry_registration_and_replacement() {
    let mut registry = HandlerRegistry::with_flow_handlers();
    assert_eq!(registry.len(), 4);
    assert!(registry.get(TaskType::RemoteWork).is_none());
    assert!(registry.get(TaskType::Decision).is_some());

    let previous = registry.register(Arc::new(SequenceHandler));
    assert!(previous.is_some());
    assert_eq!(registry.len(), 4);
}

#[test]
fn test_context_carries_task_settings() {
    let workflow = GraphBuilder::new("ctx")
        .var("k", "v")
        .remote("r", "w").input("x", 1).build()
        .build()
        .unwrap();
    let ctx = TaskContext::new(&workflow, workflow.task("r").unwrap());
    assert_eq!(ctx.workflow_id, workflow.id);
    assert_ne!(ctx.workflow_id, Uuid::nil());
    assert_eq!(ctx.task_id, "r");
    assert_eq!(ctx.input.get("x"), Some(&json!(1)));
    assert_eq!(ctx.context.get("k"), Some(&json!("v")));
}

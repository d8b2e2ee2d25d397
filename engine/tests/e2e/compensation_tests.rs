//! Compensation-driven rollback scenarios.

use crate::fixtures::Behavior;
use crate::harness::TestHarness;
use serde_json::json;
use swarmlite::{AuditEvent, TaskStatus, WorkflowStatus};

fn chain_with_compensation(workflow_id: &str) -> String {
    json!({
        "workflow_id": workflow_id,
        "retry_policy": {"max_attempts": 1, "delay_seconds": 0.0, "jitter_fraction": 0.0},
        "tasks": [
            {"id": "a", "type": "test"},
            {"id": "b", "type": "test", "depends_on": ["a"]},
            {"id": "c", "type": "test", "depends_on": ["b"]},
        ],
        "compensation_handlers": {"a": "test", "b": "test"}
    })
    .to_string()
}

#[tokio::test]
async fn failure_rolls_back_succeeded_tasks_in_reverse_order() {
    let harness = TestHarness::new();
    harness.handler.script("c", [Behavior::Permanent("no disk")]);

    let snapshot = harness
        .run_to_terminal(&chain_with_compensation("wf-s3"))
        .await;

    assert_eq!(snapshot.status, WorkflowStatus::Failed);
    let by_id = |id: &str| snapshot.tasks.iter().find(|t| t.task_id == id).unwrap();
    assert_eq!(by_id("a").status, TaskStatus::Rollback);
    assert_eq!(by_id("b").status, TaskStatus::Rollback);
    assert_eq!(by_id("c").status, TaskStatus::Failed);

    // rollback runs in reverse topological order
    assert_eq!(harness.log.compensations(), vec!["b", "a"]);

    let events = harness.events("wf-s3").await;
    let comp_tasks: Vec<_> = events
        .iter()
        .filter(|e| e.event == AuditEvent::CompensationRun)
        .map(|e| e.task_id.clone().unwrap())
        .collect();
    assert_eq!(comp_tasks, vec!["b", "a"]);

    // the terminal record comes after compensation and reads failed
    let last = events.last().unwrap();
    assert_eq!(last.event, AuditEvent::WorkflowTerminal);
    assert_eq!(last.to_state.as_deref(), Some("failed"));
}

#[tokio::test]
async fn tasks_without_handlers_keep_success() {
    let harness = TestHarness::new();
    harness.handler.script("c", [Behavior::Permanent("boom")]);

    // only `a` registers compensation
    let snapshot = harness
        .run_to_terminal(
            &json!({
                "workflow_id": "wf-partial-comp",
                "retry_policy": {"max_attempts": 1, "delay_seconds": 0.0, "jitter_fraction": 0.0},
                "tasks": [
                    {"id": "a", "type": "test"},
                    {"id": "b", "type": "test", "depends_on": ["a"]},
                    {"id": "c", "type": "test", "depends_on": ["b"]},
                ],
                "compensation_handlers": {"a": "test"}
            })
            .to_string(),
        )
        .await;

    let by_id = |id: &str| snapshot.tasks.iter().find(|t| t.task_id == id).unwrap();
    assert_eq!(by_id("a").status, TaskStatus::Rollback);
    // b had no handler registered; its side effects stand, recorded as such
    assert_eq!(by_id("b").status, TaskStatus::Success);
    assert_eq!(snapshot.status, WorkflowStatus::Failed);
    assert_eq!(harness.log.compensations(), vec!["a"]);
}

#[tokio::test]
async fn failing_compensation_does_not_block_the_rest() {
    let harness = TestHarness::new();
    harness.handler.script("c", [Behavior::Permanent("boom")]);
    harness.handler.fail_compensation("b", "undo unavailable");

    let snapshot = harness
        .run_to_terminal(&chain_with_compensation("wf-comp-error"))
        .await;

    let by_id = |id: &str| snapshot.tasks.iter().find(|t| t.task_id == id).unwrap();
    // b's compensation failed: status stays success, error recorded
    assert_eq!(by_id("b").status, TaskStatus::Success);
    assert!(by_id("b")
        .last_error
        .as_deref()
        .unwrap()
        .contains("undo unavailable"));
    // a still rolled back after b's failure
    assert_eq!(by_id("a").status, TaskStatus::Rollback);
    assert_eq!(snapshot.status, WorkflowStatus::Failed);

    // both compensations were attempted
    assert_eq!(harness.log.compensations(), vec!["b", "a"]);
}

#[tokio::test]
async fn diamond_compensates_in_reverse_topological_order() {
    let harness = TestHarness::new();
    harness.handler.script("d", [Behavior::Permanent("boom")]);

    harness
        .run_to_terminal(
            &json!({
                "workflow_id": "wf-diamond-comp",
                "retry_policy": {"max_attempts": 1, "delay_seconds": 0.0, "jitter_fraction": 0.0},
                "tasks": [
                    {"id": "a", "type": "test"},
                    {"id": "b", "type": "test", "depends_on": ["a"]},
                    {"id": "c", "type": "test", "depends_on": ["a"]},
                    {"id": "d", "type": "test", "depends_on": ["b", "c"]},
                ],
                "compensation_handlers": {"a": "test", "b": "test", "c": "test"}
            })
            .to_string(),
        )
        .await;

    // reverse of the deterministic topological order a, b, c, d
    assert_eq!(harness.log.compensations(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn no_compensation_when_nothing_succeeded() {
    let harness = TestHarness::new();
    harness.handler.script("a", [Behavior::Permanent("boom")]);

    harness
        .run_to_terminal(&chain_with_compensation("wf-empty-comp"))
        .await;

    assert!(harness.log.compensations().is_empty());
    let events = harness.events("wf-empty-comp").await;
    assert!(!events
        .iter()
        .any(|e| e.event == AuditEvent::CompensationRun));
}

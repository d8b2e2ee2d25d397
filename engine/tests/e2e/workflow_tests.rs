//! Happy-path and structural scenarios.

use crate::harness::{render_events, TestHarness};
use serde_json::json;
use swarmlite::{AuditEvent, TaskStatus, WorkflowStatus};

fn linear_chain(workflow_id: &str) -> String {
    json!({
        "workflow_id": workflow_id,
        "tasks": [
            {"id": "a", "type": "test"},
            {"id": "b", "type": "test", "depends_on": ["a"]},
            {"id": "c", "type": "test", "depends_on": ["b"]},
            {"id": "d", "type": "test", "depends_on": ["c"]},
        ]
    })
    .to_string()
}

#[tokio::test]
async fn linear_happy_path_reaches_success() {
    let harness = TestHarness::new();
    let snapshot = harness.run_to_terminal(&linear_chain("wf-s1")).await;

    assert_eq!(snapshot.status, WorkflowStatus::Success);
    for task in &snapshot.tasks {
        assert_eq!(task.status, TaskStatus::Success, "task {}", task.task_id);
        assert_eq!(task.attempt, 1);
        assert!(task.started_at.is_some());
        assert!(task.finished_at.is_some());
    }

    // every task executed exactly once, in dependency order
    let executions: Vec<String> = harness
        .log
        .entries()
        .iter()
        .map(|i| i.task_id.clone())
        .collect();
    assert_eq!(executions, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn linear_happy_path_audit_sequence() {
    let harness = TestHarness::new();
    harness.run_to_terminal(&linear_chain("wf-s1-audit")).await;

    let rendered = render_events(&harness.events("wf-s1-audit").await);
    let mut expected = vec![
        "WORKFLOW_CREATED:-:-->pending".to_string(),
        "WORKFLOW_STARTED:-:pending->running".to_string(),
    ];
    for task in ["a", "b", "c", "d"] {
        expected.push(format!("TASK_TRANSITION:{task}:pending->ready"));
        expected.push(format!("TASK_TRANSITION:{task}:ready->running"));
        expected.push(format!("TASK_TRANSITION:{task}:running->success"));
    }
    expected.push("WORKFLOW_TERMINAL:-:running->success".to_string());
    assert_eq!(rendered, expected);
}

#[tokio::test]
async fn audit_chain_verifies_end_to_end() {
    let harness = TestHarness::new();
    let snapshot = harness.run_to_terminal(&linear_chain("wf-chain")).await;

    use swarmlite::audit::AuditLog;
    harness.audit.verify_chain("wf-chain").await.unwrap();
    assert!(snapshot.audit_len > 0);
    assert!(snapshot.audit_head.is_some());
}

#[tokio::test]
async fn single_task_workflow() {
    let harness = TestHarness::new();
    let snapshot = harness
        .run_to_terminal(
            &json!({
                "workflow_id": "wf-single",
                "tasks": [{"id": "only", "type": "test"}]
            })
            .to_string(),
        )
        .await;
    assert_eq!(snapshot.status, WorkflowStatus::Success);
    assert_eq!(harness.log.executions_of("only"), 1);
}

#[tokio::test]
async fn unknown_task_type_fails_workflow() {
    let harness = TestHarness::new();
    let snapshot = harness
        .run_to_terminal(
            &json!({
                "workflow_id": "wf-unknown-type",
                "tasks": [{"id": "a", "type": "no-such-handler"}]
            })
            .to_string(),
        )
        .await;

    assert_eq!(snapshot.status, WorkflowStatus::Failed);
    let task = &snapshot.tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .last_error
        .as_deref()
        .unwrap()
        .contains("no handler registered"));
}

#[tokio::test]
async fn failed_task_skips_descendants() {
    let harness = TestHarness::new();
    harness
        .handler
        .script("b", [crate::fixtures::Behavior::Permanent("boom")]);

    let snapshot = harness.run_to_terminal(&linear_chain("wf-skip")).await;

    assert_eq!(snapshot.status, WorkflowStatus::Failed);
    let by_id = |id: &str| {
        snapshot
            .tasks
            .iter()
            .find(|t| t.task_id == id)
            .unwrap()
            .status
    };
    assert_eq!(by_id("a"), TaskStatus::Success);
    assert_eq!(by_id("b"), TaskStatus::Failed);
    assert_eq!(by_id("c"), TaskStatus::Skipped);
    assert_eq!(by_id("d"), TaskStatus::Skipped);

    // skipped tasks never reach a handler
    assert_eq!(harness.log.executions_of("c"), 0);
    assert_eq!(harness.log.executions_of("d"), 0);

    let events = harness.events("wf-skip").await;
    assert!(events.iter().any(|e| e.event == AuditEvent::TaskTransition
        && e.task_id.as_deref() == Some("c")
        && e.to_state.as_deref() == Some("skipped")));
}

#[tokio::test]
async fn no_task_left_non_terminal() {
    let harness = TestHarness::new();
    harness
        .handler
        .script("a", [crate::fixtures::Behavior::Permanent("dead on arrival")]);

    let snapshot = harness.run_to_terminal(&linear_chain("wf-total")).await;
    for task in &snapshot.tasks {
        assert!(
            matches!(
                task.status,
                TaskStatus::Success | TaskStatus::Failed | TaskStatus::Rollback | TaskStatus::Skipped
            ),
            "task {} left in {:?}",
            task.task_id,
            task.status
        );
    }
}

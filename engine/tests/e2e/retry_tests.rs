//! Retry and backoff scenarios.

use crate::fixtures::Behavior;
use crate::harness::TestHarness;
use serde_json::json;
use std::time::Instant;
use swarmlite::{TaskStatus, WorkflowStatus};

fn retrying_workflow(workflow_id: &str, max_attempts: u32, delay_seconds: f64) -> String {
    json!({
        "workflow_id": workflow_id,
        "retry_policy": {
            "max_attempts": max_attempts,
            "delay_seconds": delay_seconds,
            "exponential_backoff": false,
            "jitter_fraction": 0.0,
        },
        "tasks": [{"id": "a", "type": "test"}]
    })
    .to_string()
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let harness = TestHarness::new();
    harness.handler.script(
        "a",
        [
            Behavior::Transient("first wobble"),
            Behavior::Transient("second wobble"),
            Behavior::Ok,
        ],
    );

    let started = Instant::now();
    let snapshot = harness
        .run_to_terminal(&retrying_workflow("wf-s2", 3, 0.05))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(snapshot.status, WorkflowStatus::Success);
    let task = &snapshot.tasks[0];
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.attempt, 3);
    assert_eq!(harness.log.executions_of("a"), 3);

    // two retry delays of 50ms each sit between the three attempts
    assert!(
        elapsed.as_millis() >= 100,
        "expected two retry delays, finished in {elapsed:?}"
    );
}

#[tokio::test]
async fn transient_failures_exhaust_retries() {
    let harness = TestHarness::new();
    harness.handler.script(
        "a",
        [
            Behavior::Transient("down"),
            Behavior::Transient("still down"),
            Behavior::Transient("dead"),
        ],
    );

    let snapshot = harness
        .run_to_terminal(&retrying_workflow("wf-exhaust", 3, 0.01))
        .await;

    assert_eq!(snapshot.status, WorkflowStatus::Failed);
    let task = &snapshot.tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt, 3);
    assert_eq!(task.last_error.as_deref(), Some("dead"));
    assert_eq!(harness.log.executions_of("a"), 3);
}

#[tokio::test]
async fn permanent_failure_skips_remaining_retries() {
    let harness = TestHarness::new();
    harness
        .handler
        .script("a", [Behavior::Permanent("schema mismatch")]);

    let snapshot = harness
        .run_to_terminal(&retrying_workflow("wf-permanent", 5, 0.01))
        .await;

    assert_eq!(snapshot.status, WorkflowStatus::Failed);
    assert_eq!(snapshot.tasks[0].attempt, 1);
    assert_eq!(harness.log.executions_of("a"), 1);
}

#[tokio::test]
async fn single_attempt_policy_never_retries() {
    let harness = TestHarness::new();
    harness
        .handler
        .script("a", [Behavior::Transient("one shot")]);

    let snapshot = harness
        .run_to_terminal(&retrying_workflow("wf-one-shot", 1, 0.01))
        .await;

    assert_eq!(snapshot.status, WorkflowStatus::Failed);
    assert_eq!(snapshot.tasks[0].attempt, 1);
    assert_eq!(harness.log.executions_of("a"), 1);
}

#[tokio::test]
async fn attempts_never_exceed_policy() {
    let harness = TestHarness::new();
    harness.handler.script(
        "a",
        [
            Behavior::Transient("1"),
            Behavior::Transient("2"),
            Behavior::Transient("3"),
            Behavior::Transient("4"),
        ],
    );

    let snapshot = harness
        .run_to_terminal(&retrying_workflow("wf-bound", 2, 0.01))
        .await;

    assert_eq!(snapshot.tasks[0].attempt, 2);
    assert_eq!(harness.log.executions_of("a"), 2);
}

#[tokio::test]
async fn task_timeout_is_transient() {
    let harness = TestHarness::new();
    // first attempt exceeds the 1s task timeout; second returns immediately
    harness
        .handler
        .script("slow", [Behavior::SleepMs(1500), Behavior::Ok]);

    let snapshot = harness
        .run_to_terminal(
            &json!({
                "workflow_id": "wf-timeout",
                "retry_policy": {
                    "max_attempts": 2,
                    "delay_seconds": 0.01,
                    "exponential_backoff": false,
                    "jitter_fraction": 0.0,
                },
                "tasks": [{"id": "slow", "type": "test", "timeout_seconds": 1}]
            })
            .to_string(),
        )
        .await;

    assert_eq!(snapshot.status, WorkflowStatus::Success);
    assert_eq!(snapshot.tasks[0].attempt, 2);
}

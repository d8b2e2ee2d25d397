//! Cooperative stop scenarios.

use crate::fixtures::Behavior;
use crate::harness::TestHarness;
use serde_json::json;
use std::time::{Duration, Instant};
use swarmlite::{GovernanceContext, TaskStatus, WorkflowStatus};

#[tokio::test]
async fn stop_cancels_in_flight_handlers_and_records_results() {
    let harness = TestHarness::new();
    harness.handler.script("a", [Behavior::HangUntilCancelled]);

    let id = harness
        .engine
        .submit(
            &json!({
                "workflow_id": "wf-stop",
                "tasks": [
                    {"id": "a", "type": "test"},
                    {"id": "b", "type": "test", "depends_on": ["a"]},
                ]
            })
            .to_string(),
            None,
            GovernanceContext::default(),
        )
        .await
        .unwrap();

    // wait for the handler to actually start before stopping
    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.log.executions_of("a") == 0 {
        assert!(Instant::now() < deadline, "task a never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    harness.engine.stop(&id).await.unwrap();
    harness.engine.join(&id).await.unwrap();

    let snapshot = harness.engine.status(&id).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Stopped);

    let by_id = |id: &str| snapshot.tasks.iter().find(|t| t.task_id == id).unwrap();
    // the in-flight handler observed the token, its result was recorded,
    // and no retry followed under the stop
    assert_eq!(by_id("a").status, TaskStatus::Failed);
    assert_eq!(by_id("a").last_error.as_deref(), Some("cancelled"));
    // never dispatched
    assert_eq!(by_id("b").status, TaskStatus::Skipped);
    assert_eq!(harness.log.executions_of("b"), 0);
}

#[tokio::test]
async fn stop_cancels_pending_retry_timers() {
    let harness = TestHarness::new();
    harness
        .handler
        .script("a", [Behavior::Transient("wobble"), Behavior::Ok]);

    // a long retry delay so the stop lands while the timer is pending
    let id = harness
        .engine
        .submit(
            &json!({
                "workflow_id": "wf-stop-retry",
                "retry_policy": {
                    "max_attempts": 3,
                    "delay_seconds": 30.0,
                    "exponential_backoff": false,
                    "jitter_fraction": 0.0,
                },
                "tasks": [{"id": "a", "type": "test"}]
            })
            .to_string(),
            None,
            GovernanceContext::default(),
        )
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.log.executions_of("a") == 0 {
        assert!(Instant::now() < deadline, "task a never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // give the first attempt a moment to fail and park in the retry timer
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stop_started = Instant::now();
    harness.engine.stop(&id).await.unwrap();
    harness.engine.join(&id).await.unwrap();

    // the 30s timer did not run out; stop cancelled it
    assert!(stop_started.elapsed() < Duration::from_secs(5));

    let snapshot = harness.engine.status(&id).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Stopped);
    // parked task was never re-dispatched, then skipped at finalize
    assert_eq!(snapshot.tasks[0].status, TaskStatus::Skipped);
    assert_eq!(harness.log.executions_of("a"), 1);
}

#[tokio::test]
async fn stop_before_dispatch_skips_everything() {
    let harness = TestHarness::new();
    harness.handler.script("a", [Behavior::SleepMs(200)]);

    let id = harness
        .engine
        .submit(
            &json!({
                "workflow_id": "wf-stop-early",
                "tasks": [
                    {"id": "a", "type": "test"},
                    {"id": "b", "type": "test", "depends_on": ["a"]},
                ]
            })
            .to_string(),
            None,
            GovernanceContext::default(),
        )
        .await
        .unwrap();

    harness.engine.stop(&id).await.unwrap();
    harness.engine.join(&id).await.unwrap();

    let snapshot = harness.engine.status(&id).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Stopped);
    for task in &snapshot.tasks {
        assert!(
            matches!(task.status, TaskStatus::Skipped | TaskStatus::Success | TaskStatus::Failed),
            "task {} left in {:?}",
            task.task_id,
            task.status
        );
    }
}

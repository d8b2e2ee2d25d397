//! Store-unavailability scenarios.
//!
//! When the store stays down past the bounded retry ceiling, the in-memory
//! scheduler gives up; the persisted image (workflow `running`, task rows at
//! their last committed state) must remain consistent enough for a later
//! `recover()` to finish the job.

use crate::fixtures::Behavior;
use crate::harness::TestHarness;
use serde_json::json;
use std::time::{Duration, Instant};
use swarmlite::{GovernanceContext, WorkflowStatus};

#[tokio::test]
async fn outage_aborts_the_run_and_recover_finishes_it() {
    let harness = TestHarness::new();
    harness.handler.script("a", [Behavior::SleepMs(80), Behavior::Ok]);

    let id = harness
        .engine
        .submit(
            &json!({
                "workflow_id": "wf-outage",
                "tasks": [{"id": "a", "type": "test"}]
            })
            .to_string(),
            None,
            GovernanceContext::default(),
        )
        .await
        .unwrap();

    // take the store down while the handler is mid-flight, so the completion
    // write runs into the outage and exhausts its retries
    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.log.executions_of("a") == 0 {
        assert!(Instant::now() < deadline, "task a never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    harness.store.set_unavailable(true);

    // the run aborts internally; join returns once the scheduler has given up
    harness.engine.join(&id).await.unwrap();
    harness.store.set_unavailable(false);

    // persisted state is non-terminal and intact
    let snapshot = harness.engine.status(&id).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Running);

    // a fresh recovery pass completes the workflow; the interrupted attempt
    // is replayed
    let resumed = harness.engine.recover().await.unwrap();
    assert_eq!(resumed, vec![id.clone()]);
    harness.engine.join(&id).await.unwrap();

    let snapshot = harness.engine.status(&id).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Success);
    assert_eq!(harness.log.executions_of("a"), 2);
}

//! Resume/recovery
//!
//! At startup the engine rehydrates in-flight workflows from the store. The
//! audit chain is verified before anything else happens: a workflow whose
//! chain does not verify is quarantined as `Failed` and never re-entered.
//! For the rest, `Running` tasks are reset to `Ready` (the previous attempt
//! is considered lost, which is why handlers must tolerate replay) and the
//! scheduler re-enters its dispatch loop. Tasks already `Success` or
//! `Failed` are untouched.

use crate::audit::AuditLog;
use crate::error::{EngineError, Result};
use crate::store::StateStore;
use chrono::Utc;
use std::sync::Arc;
use swarmlite_core::audit::AuditEvent;
use swarmlite_core::model::{TaskStatus, Workflow, WorkflowStatus};
use tracing::{error, info, warn};

/// Result of scanning the store for in-flight workflows.
#[derive(Debug, Default)]
pub(crate) struct RecoveryOutcome {
    /// Workflows ready to re-enter the scheduler
    pub resumable: Vec<Workflow>,
    /// Workflows whose audit chain failed verification
    pub quarantined: Vec<String>,
}

/// Verify and rehydrate every in-flight workflow.
pub(crate) async fn scan_in_flight(
    store: &Arc<dyn StateStore>,
    audit: &Arc<dyn AuditLog>,
) -> Result<RecoveryOutcome> {
    let mut outcome = RecoveryOutcome::default();

    for workflow_id in store.list_in_flight().await? {
        match audit.verify_chain(&workflow_id).await {
            Ok(()) => {}
            Err(EngineError::Integrity(violation)) => {
                error!(
                    workflow_id = %workflow_id,
                    %violation,
                    "audit chain verification failed; quarantining workflow"
                );
                quarantine(store, &workflow_id).await?;
                outcome.quarantined.push(workflow_id);
                continue;
            }
            Err(other) => return Err(other),
        }

        for task in store.list_tasks(&workflow_id).await? {
            if task.status != TaskStatus::Running {
                continue;
            }
            if store
                .cas_task_status(&workflow_id, &task.task_id, TaskStatus::Running, TaskStatus::Ready)
                .await?
            {
                let mut reset = task.clone();
                reset.status = TaskStatus::Ready;
                // the lost attempt never completed, so it does not count
                // against max_attempts
                reset.attempt = reset.attempt.saturating_sub(1);
                store.put_task(&workflow_id, &reset).await?;
                audit
                    .append(
                        &workflow_id,
                        Some(&task.task_id),
                        AuditEvent::TaskTransition,
                        Some(TaskStatus::Running.as_str()),
                        Some(TaskStatus::Ready.as_str()),
                    )
                    .await?;
                warn!(
                    workflow_id = %workflow_id,
                    task_id = %task.task_id,
                    "reset interrupted task for re-dispatch"
                );
            }
        }

        let Some(workflow) = store.get_workflow(&workflow_id).await? else {
            continue;
        };
        info!(workflow_id = %workflow_id, "workflow rehydrated for resume");
        outcome.resumable.push(workflow);
    }

    Ok(outcome)
}

/// Mark a workflow failed without touching its (unverifiable) audit chain.
async fn quarantine(store: &Arc<dyn StateStore>, workflow_id: &str) -> Result<()> {
    let Some(mut workflow) = store.get_workflow(workflow_id).await? else {
        return Ok(());
    };
    workflow.status = WorkflowStatus::Failed;
    workflow.updated_at = Utc::now();
    store.put_workflow(&workflow).await?;
    Ok(())
}

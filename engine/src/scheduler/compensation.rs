//! Compensation engine
//!
//! When a workflow fails terminally, the side effects of already-succeeded
//! tasks must be undone. Compensation walks the succeeded tasks in reverse
//! topological order and invokes the handler each task registered under
//! `compensation_handlers`. Rollback is best effort: a failing compensation
//! is recorded and the walk continues, and the workflow's terminal state is
//! `Failed` regardless of the outcome here. Tasks without a registered
//! handler keep their `Success` status; the audit trail is the record of
//! which side effects were and were not undone.

use super::Scheduler;
use crate::error::Result;
use crate::handler::TaskContext;
use chrono::Utc;
use swarmlite_core::audit::AuditEvent;
use swarmlite_core::model::TaskStatus;
use tracing::{info, warn};

impl Scheduler {
    pub(super) async fn run_compensation(&mut self) -> Result<()> {
        let order: Vec<String> = self.graph.reverse_order().map(str::to_string).collect();

        for task_id in order {
            let Some(task) = self.workflow.task(&task_id) else {
                continue;
            };
            if task.status != TaskStatus::Success {
                continue;
            }
            let Some(handler_name) = self.workflow.compensation_handlers.get(&task_id).cloned()
            else {
                continue;
            };

            let Some(handler) = self.registry.get(&handler_name) else {
                warn!(
                    workflow_id = %self.workflow.workflow_id,
                    task_id = %task_id,
                    handler = %handler_name,
                    "compensation handler not registered"
                );
                self.record_compensation_failure(
                    &task_id,
                    format!("compensation handler '{handler_name}' not registered"),
                )
                .await?;
                continue;
            };

            let ctx = TaskContext::new(
                self.workflow.workflow_id.clone(),
                task_id.clone(),
                task.attempt,
                self.cancel.child_token(),
            );
            let config = task.config.clone();

            match handler.compensate(&ctx, &config).await {
                Ok(()) => {
                    self.cas(&task_id, TaskStatus::Success, TaskStatus::Rollback)
                        .await?;
                    {
                        let task = self.task_mut(&task_id)?;
                        task.status = TaskStatus::Rollback;
                        task.finished_at = Some(Utc::now());
                    }
                    self.persist_task(&task_id).await?;
                    self.audit_event(
                        Some(&task_id),
                        AuditEvent::CompensationRun,
                        Some(TaskStatus::Success.as_str()),
                        Some(TaskStatus::Rollback.as_str()),
                    )
                    .await?;
                    info!(
                        workflow_id = %self.workflow.workflow_id,
                        task_id = %task_id,
                        handler = %handler_name,
                        "compensation applied"
                    );
                }
                Err(err) => {
                    warn!(
                        workflow_id = %self.workflow.workflow_id,
                        task_id = %task_id,
                        handler = %handler_name,
                        error = %err.message(),
                        "compensation failed; continuing rollback"
                    );
                    self.record_compensation_failure(
                        &task_id,
                        format!("compensation failed: {}", err.message()),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// A compensation failure leaves the task `Success`; only the error and
    /// the audit record change.
    async fn record_compensation_failure(&mut self, task_id: &str, reason: String) -> Result<()> {
        self.task_mut(task_id)?.last_error = Some(reason);
        self.persist_task(task_id).await?;
        self.audit_event(
            Some(task_id),
            AuditEvent::CompensationRun,
            Some(TaskStatus::Success.as_str()),
            Some(TaskStatus::Success.as_str()),
        )
        .await
    }
}

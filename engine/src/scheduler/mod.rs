//! The orchestration kernel
//!
//! One `Scheduler` drives one workflow run: it promotes tasks whose
//! dependencies have succeeded, consults the governance gate, dispatches onto
//! the process-wide worker pool under CAS protection, applies retry policy to
//! transient failures, marks the descendants of failed tasks skipped, and
//! hands terminally failed workflows to the compensation engine.
//!
//! The store is the source of truth: every transition is a CAS against the
//! expected prior state, so a concurrent scheduler for the same workflow
//! (e.g. after an over-eager resume) loses the race, re-reads, and
//! re-evaluates instead of double-dispatching.

mod compensation;

use crate::audit::AuditLog;
use crate::config::SchedulerConfig;
use crate::error::{EngineError, Result};
use crate::governance::{Decision, GovernanceContext, GovernanceGate};
use crate::handler::{HandlerError, HandlerRegistry, HandlerResult, TaskContext};
use crate::store::{with_store_retry, StateStore};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use swarmlite_core::audit::AuditEvent;
use swarmlite_core::definition::TaskGraph;
use swarmlite_core::model::{TaskStatus, Workflow, WorkflowStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events the dispatch loop waits on.
enum TaskEvent {
    Finished {
        task_id: String,
        result: HandlerResult<Value>,
    },
    RetryDue {
        task_id: String,
    },
}

/// Drives a single workflow to a terminal state.
pub struct Scheduler {
    workflow: Workflow,
    graph: TaskGraph,
    store: Arc<dyn StateStore>,
    audit: Arc<dyn AuditLog>,
    gate: Arc<dyn GovernanceGate>,
    registry: Arc<HandlerRegistry>,
    pool: Arc<Semaphore>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    gov_ctx: GovernanceContext,
    run_id: Uuid,
    running: HashSet<String>,
    waiting_retry: HashSet<String>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow: Workflow,
        store: Arc<dyn StateStore>,
        audit: Arc<dyn AuditLog>,
        gate: Arc<dyn GovernanceGate>,
        registry: Arc<HandlerRegistry>,
        pool: Arc<Semaphore>,
        config: SchedulerConfig,
        cancel: CancellationToken,
        mut gov_ctx: GovernanceContext,
    ) -> Result<Self> {
        let graph = TaskGraph::build(&workflow)?;
        gov_ctx.has_idempotency_key = workflow.idempotency_key.is_some();
        Ok(Self {
            workflow,
            graph,
            store,
            audit,
            gate,
            registry,
            pool,
            config,
            cancel,
            gov_ctx,
            run_id: Uuid::new_v4(),
            running: HashSet::new(),
            waiting_retry: HashSet::new(),
        })
    }

    /// Run the workflow to a terminal state and return it.
    ///
    /// On store exhaustion the in-memory run aborts with an error; persisted
    /// state remains consistent (workflow `running`) for later resume.
    pub async fn run(mut self) -> Result<Workflow> {
        info!(
            workflow_id = %self.workflow.workflow_id,
            run_id = %self.run_id,
            tasks = self.workflow.tasks.len(),
            "workflow run starting"
        );

        self.workflow.status = WorkflowStatus::Running;
        self.workflow.updated_at = Utc::now();
        self.persist_workflow().await?;
        self.audit_event(None, AuditEvent::WorkflowStarted, Some("pending"), Some("running"))
            .await?;

        let mut inflight: JoinSet<TaskEvent> = JoinSet::new();
        let mut stopped = false;
        // cloned so the select arms don't hold borrows of self
        let cancel = self.cancel.clone();
        let pool = Arc::clone(&self.pool);

        loop {
            if !stopped {
                self.promote_ready().await?;
            }

            let dispatchable = !stopped && self.next_ready().is_some();
            if self.running.is_empty() && self.waiting_retry.is_empty() && !dispatchable {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled(), if !stopped => {
                    info!(workflow_id = %self.workflow.workflow_id, "stop requested; draining in-flight tasks");
                    stopped = true;
                }
                permit = Arc::clone(&pool).acquire_owned(), if dispatchable => {
                    let permit = permit
                        .map_err(|_| EngineError::Other("worker pool closed".to_string()))?;
                    self.dispatch_one(permit, &mut inflight).await?;
                }
                joined = inflight.join_next(), if !inflight.is_empty() => {
                    let Some(joined) = joined else { continue };
                    let event = joined.map_err(|e| {
                        error!(workflow_id = %self.workflow.workflow_id, error = %e, "task worker aborted");
                        EngineError::Other(format!("task worker aborted: {e}"))
                    })?;
                    match event {
                        TaskEvent::Finished { task_id, result } => {
                            self.running.remove(&task_id);
                            self.apply_result(&task_id, result, stopped, &mut inflight).await?;
                        }
                        TaskEvent::RetryDue { task_id } => {
                            self.waiting_retry.remove(&task_id);
                        }
                    }
                }
            }
        }

        self.finalize(stopped).await
    }

    // ── Ready-set computation ────────────────────────────────────────

    /// Promote every pending task whose dependencies are all `Success`.
    async fn promote_ready(&mut self) -> Result<()> {
        let candidates: Vec<String> = self
            .workflow
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.depends_on.iter().all(|dep| {
                        self.workflow
                            .task(dep)
                            .map(|d| d.status == TaskStatus::Success)
                            .unwrap_or(false)
                    })
            })
            .map(|t| t.task_id.clone())
            .collect();

        for task_id in candidates {
            if self.cas(&task_id, TaskStatus::Pending, TaskStatus::Ready).await? {
                self.transition(&task_id, TaskStatus::Ready).await?;
                self.audit_transition(&task_id, TaskStatus::Pending, TaskStatus::Ready)
                    .await?;
            } else {
                self.sync_task_from_store(&task_id).await?;
            }
        }
        Ok(())
    }

    /// First dispatchable ready task in deterministic task-id order.
    fn next_ready(&self) -> Option<&str> {
        self.workflow
            .tasks
            .values()
            .find(|t| {
                t.status == TaskStatus::Ready && !self.waiting_retry.contains(&t.task_id)
            })
            .map(|t| t.task_id.as_str())
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    async fn dispatch_one(
        &mut self,
        permit: tokio::sync::OwnedSemaphorePermit,
        inflight: &mut JoinSet<TaskEvent>,
    ) -> Result<()> {
        let Some(task_id) = self.next_ready().map(str::to_string) else {
            return Ok(());
        };

        // Restart idempotency: re-read before CAS. A task completed by a
        // previous incarnation is adopted, not re-dispatched.
        if let Some(stored) = self.get_task(&task_id).await? {
            if stored.status == TaskStatus::Success {
                debug!(task_id = %task_id, "task already completed; adopting stored result");
                self.sync_task_from_store(&task_id).await?;
                return Ok(());
            }
        }

        let task = self
            .workflow
            .task(&task_id)
            .ok_or_else(|| EngineError::Other(format!("task '{task_id}' vanished")))?
            .clone();

        if let Decision::Deny(reason) = self.gate.check(&task, &self.gov_ctx) {
            warn!(
                workflow_id = %self.workflow.workflow_id,
                task_id = %task_id,
                reason = %reason,
                "governance denied task"
            );
            if !self.cas(&task_id, TaskStatus::Ready, TaskStatus::Failed).await? {
                self.sync_task_from_store(&task_id).await?;
                return Ok(());
            }
            {
                let task = self.task_mut(&task_id)?;
                task.status = TaskStatus::Failed;
                task.last_error = Some(format!("GovernanceDenied({reason})"));
                task.finished_at = Some(Utc::now());
            }
            self.persist_task(&task_id).await?;
            self.audit_event(
                Some(&task_id),
                AuditEvent::GovernanceDeny,
                Some(TaskStatus::Ready.as_str()),
                Some(TaskStatus::Failed.as_str()),
            )
            .await?;
            self.skip_descendants(&task_id).await?;
            return Ok(());
        }

        if !self.cas(&task_id, TaskStatus::Ready, TaskStatus::Running).await? {
            // lost the race to another scheduler; re-read and re-evaluate
            self.sync_task_from_store(&task_id).await?;
            return Ok(());
        }

        let attempt = {
            let task = self.task_mut(&task_id)?;
            task.status = TaskStatus::Running;
            task.attempt += 1;
            if task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
            task.attempt
        };
        self.persist_task(&task_id).await?;
        self.audit_transition(&task_id, TaskStatus::Ready, TaskStatus::Running)
            .await?;

        debug!(
            workflow_id = %self.workflow.workflow_id,
            task_id = %task_id,
            attempt,
            task_type = %task.task_type,
            "dispatching task"
        );

        let handler = self.registry.get(&task.task_type);
        let ctx = TaskContext::new(
            self.workflow.workflow_id.clone(),
            task_id.clone(),
            attempt,
            self.cancel.child_token(),
        );
        let timeout = task
            .timeout_seconds
            .map(Duration::from_secs)
            .or(self.config.default_task_timeout);
        let config = task.config.clone();
        let task_type = task.task_type.clone();
        let spawned_id = task_id.clone();

        self.running.insert(task_id);
        inflight.spawn(async move {
            let _permit = permit;
            let result = match handler {
                None => Err(HandlerError::Permanent(format!(
                    "no handler registered for type '{task_type}'"
                ))),
                Some(handler) => match timeout {
                    Some(limit) => {
                        match tokio::time::timeout(limit, handler.execute(&ctx, &config)).await {
                            Ok(result) => result,
                            Err(_) => Err(HandlerError::Transient(format!(
                                "task timed out after {:.1}s",
                                limit.as_secs_f64()
                            ))),
                        }
                    }
                    None => handler.execute(&ctx, &config).await,
                },
            };
            TaskEvent::Finished {
                task_id: spawned_id,
                result,
            }
        });
        Ok(())
    }

    // ── Result application ───────────────────────────────────────────

    async fn apply_result(
        &mut self,
        task_id: &str,
        result: HandlerResult<Value>,
        stopped: bool,
        inflight: &mut JoinSet<TaskEvent>,
    ) -> Result<()> {
        match result {
            Ok(output) => {
                self.cas(task_id, TaskStatus::Running, TaskStatus::Success).await?;
                {
                    let task = self.task_mut(task_id)?;
                    task.status = TaskStatus::Success;
                    task.last_error = None;
                    task.finished_at = Some(Utc::now());
                }
                self.persist_task(task_id).await?;
                self.audit_transition(task_id, TaskStatus::Running, TaskStatus::Success)
                    .await?;
                debug!(
                    workflow_id = %self.workflow.workflow_id,
                    task_id,
                    output = %output,
                    "task succeeded"
                );
            }
            Err(err) => {
                let attempt = self.task_mut(task_id)?.attempt;
                let retryable = err.is_transient()
                    && !stopped
                    && self.workflow.retry_policy.should_retry(attempt);

                if retryable {
                    self.cas(task_id, TaskStatus::Running, TaskStatus::Ready).await?;
                    {
                        let task = self.task_mut(task_id)?;
                        task.status = TaskStatus::Ready;
                        task.last_error = Some(err.message().to_string());
                    }
                    self.persist_task(task_id).await?;
                    self.audit_transition(task_id, TaskStatus::Running, TaskStatus::Ready)
                        .await?;

                    let delay = self.workflow.retry_policy.delay_for(attempt);
                    warn!(
                        workflow_id = %self.workflow.workflow_id,
                        task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err.message(),
                        "transient failure; retry scheduled"
                    );
                    self.waiting_retry.insert(task_id.to_string());
                    let cancel = self.cancel.clone();
                    let retry_id = task_id.to_string();
                    inflight.spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {}
                        }
                        TaskEvent::RetryDue { task_id: retry_id }
                    });
                } else {
                    self.cas(task_id, TaskStatus::Running, TaskStatus::Failed).await?;
                    {
                        let task = self.task_mut(task_id)?;
                        task.status = TaskStatus::Failed;
                        task.last_error = Some(err.message().to_string());
                        task.finished_at = Some(Utc::now());
                    }
                    self.persist_task(task_id).await?;
                    self.audit_transition(task_id, TaskStatus::Running, TaskStatus::Failed)
                        .await?;
                    warn!(
                        workflow_id = %self.workflow.workflow_id,
                        task_id,
                        attempt,
                        error = %err.message(),
                        "task failed"
                    );
                    self.skip_descendants(task_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Mark every non-terminal transitive dependent of a failed task skipped.
    async fn skip_descendants(&mut self, failed_id: &str) -> Result<()> {
        let mut descendants: Vec<String> = self.graph.descendants(failed_id).into_iter().collect();
        descendants.sort();

        for task_id in descendants {
            let status = self
                .workflow
                .task(&task_id)
                .map(|t| t.status)
                .unwrap_or(TaskStatus::Skipped);
            if matches!(status, TaskStatus::Pending | TaskStatus::Ready) {
                self.cas(&task_id, status, TaskStatus::Skipped).await?;
                self.transition(&task_id, TaskStatus::Skipped).await?;
                self.audit_transition(&task_id, status, TaskStatus::Skipped)
                    .await?;
            }
        }
        Ok(())
    }

    // ── Termination ──────────────────────────────────────────────────

    async fn finalize(mut self, stopped: bool) -> Result<Workflow> {
        // Anything never dispatched is skipped; after a stop this covers
        // ready tasks whose retry timers were cancelled.
        let leftovers: Vec<(String, TaskStatus)> = self
            .workflow
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .map(|t| (t.task_id.clone(), t.status))
            .collect();
        for (task_id, status) in leftovers {
            self.cas(&task_id, status, TaskStatus::Skipped).await?;
            self.transition(&task_id, TaskStatus::Skipped).await?;
            self.audit_transition(&task_id, status, TaskStatus::Skipped)
                .await?;
        }

        let any_failed = self
            .workflow
            .tasks
            .values()
            .any(|t| t.status == TaskStatus::Failed);

        let terminal = if stopped {
            WorkflowStatus::Stopped
        } else if any_failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Success
        };

        if terminal == WorkflowStatus::Failed {
            self.run_compensation().await?;
        }

        self.workflow.status = terminal;
        self.workflow.updated_at = Utc::now();
        self.persist_workflow().await?;
        self.audit_event(
            None,
            AuditEvent::WorkflowTerminal,
            Some(WorkflowStatus::Running.as_str()),
            Some(terminal.as_str()),
        )
        .await?;

        info!(
            workflow_id = %self.workflow.workflow_id,
            run_id = %self.run_id,
            status = %terminal,
            "workflow run finished"
        );
        Ok(self.workflow)
    }

    // ── Store and audit plumbing ─────────────────────────────────────

    fn task_mut(&mut self, task_id: &str) -> Result<&mut swarmlite_core::model::Task> {
        self.workflow
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::Other(format!("task '{task_id}' vanished")))
    }

    async fn transition(&mut self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.task_mut(task_id)?.status = status;
        self.persist_task(task_id).await
    }

    async fn cas(&self, task_id: &str, expected: TaskStatus, new: TaskStatus) -> Result<bool> {
        with_store_retry(&self.config, "cas_task_status", || {
            self.store
                .cas_task_status(&self.workflow.workflow_id, task_id, expected, new)
        })
        .await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<swarmlite_core::model::Task>> {
        with_store_retry(&self.config, "get_task", || {
            self.store.get_task(&self.workflow.workflow_id, task_id)
        })
        .await
    }

    async fn sync_task_from_store(&mut self, task_id: &str) -> Result<()> {
        if let Some(stored) = self.get_task(task_id).await? {
            let task = self.task_mut(task_id)?;
            task.status = stored.status;
            task.attempt = stored.attempt;
            task.last_error = stored.last_error;
            task.started_at = stored.started_at;
            task.finished_at = stored.finished_at;
        }
        Ok(())
    }

    async fn persist_task(&self, task_id: &str) -> Result<()> {
        let task = self
            .workflow
            .task(task_id)
            .ok_or_else(|| EngineError::Other(format!("task '{task_id}' vanished")))?;
        with_store_retry(&self.config, "put_task", || {
            self.store.put_task(&self.workflow.workflow_id, task)
        })
        .await
    }

    async fn persist_workflow(&self) -> Result<()> {
        with_store_retry(&self.config, "put_workflow", || {
            self.store.put_workflow(&self.workflow)
        })
        .await
    }

    async fn audit_transition(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<()> {
        self.audit_event(
            Some(task_id),
            AuditEvent::TaskTransition,
            Some(from.as_str()),
            Some(to.as_str()),
        )
        .await
    }

    async fn audit_event(
        &self,
        task_id: Option<&str>,
        event: AuditEvent,
        from_state: Option<&str>,
        to_state: Option<&str>,
    ) -> Result<()> {
        with_store_retry(&self.config, "audit_append", || {
            self.audit.append(
                &self.workflow.workflow_id,
                task_id,
                event,
                from_state,
                to_state,
            )
        })
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workflow_id", &self.workflow.workflow_id)
            .field("run_id", &self.run_id)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

//! Engine facade
//!
//! `WorkflowEngine` is what the submission surface talks to: `submit`,
//! `status`, `stop`, plus `recover` at startup. Collaborators (store, audit
//! log, governance gate, handler registry) are injected at construction; the
//! engine owns the process-wide worker pool and the map of in-process runs.

use crate::audit::AuditLog;
use crate::config::KernelConfig;
use crate::error::{EngineError, Result};
use crate::governance::{GovernanceContext, GovernanceGate};
use crate::handler::HandlerRegistry;
use crate::recovery;
use crate::scheduler::Scheduler;
use crate::store::StateStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use swarmlite_core::audit::AuditEvent;
use swarmlite_core::definition;
use swarmlite_core::model::{Workflow, WorkflowSnapshot};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

struct RunningWorkflow {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Single-node workflow orchestration engine.
pub struct WorkflowEngine {
    config: KernelConfig,
    store: Arc<dyn StateStore>,
    audit: Arc<dyn AuditLog>,
    gate: Arc<dyn GovernanceGate>,
    registry: Arc<HandlerRegistry>,
    pool: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<String, RunningWorkflow>>>,
}

impl WorkflowEngine {
    pub fn new(
        config: KernelConfig,
        store: Arc<dyn StateStore>,
        audit: Arc<dyn AuditLog>,
        gate: Arc<dyn GovernanceGate>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.scheduler.max_parallel_tasks));
        Self {
            config,
            store,
            audit,
            gate,
            registry,
            pool,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Validate and start a workflow; returns its id.
    ///
    /// Submissions are idempotent: a second call with the same
    /// `(workflow_id, idempotency_key)` returns the existing workflow's
    /// handle whether or not it finished. If the replayed definition differs
    /// from the stored one, an `IDEMPOTENCY_CONFLICT` audit event records the
    /// disagreement and the original still wins.
    pub async fn submit(
        &self,
        definition: &str,
        idempotency_key: Option<&str>,
        gov_ctx: GovernanceContext,
    ) -> Result<String> {
        let mut workflow = definition::parse_str(definition)?;
        workflow.idempotency_key = idempotency_key.map(str::to_string);

        if workflow.has_sensitive_tasks() && self.config.db_encryption_key.is_none() {
            return Err(EngineError::InvalidConfiguration(
                "DB_ENCRYPTION_KEY is required when tasks carry pii/phi classification"
                    .to_string(),
            ));
        }

        if let Some(existing) = self.store.get_workflow(&workflow.workflow_id).await? {
            let same_key =
                existing.idempotency_key.is_some() && existing.idempotency_key == workflow.idempotency_key;
            if !same_key {
                return Err(EngineError::WorkflowExists(workflow.workflow_id));
            }
            if !definitions_match(&existing, &workflow) {
                self.audit
                    .append(
                        &workflow.workflow_id,
                        None,
                        AuditEvent::IdempotencyConflict,
                        None,
                        None,
                    )
                    .await?;
            }
            info!(
                workflow_id = %existing.workflow_id,
                status = %existing.status,
                "idempotent replay; returning existing workflow"
            );
            return Ok(existing.workflow_id);
        }

        self.store.put_workflow(&workflow).await?;
        for task in workflow.tasks.values() {
            self.store.put_task(&workflow.workflow_id, task).await?;
        }
        self.audit
            .append(
                &workflow.workflow_id,
                None,
                AuditEvent::WorkflowCreated,
                None,
                Some(workflow.status.as_str()),
            )
            .await?;

        let workflow_id = workflow.workflow_id.clone();
        self.spawn_run(workflow, gov_ctx)?;
        Ok(workflow_id)
    }

    /// Current state of a workflow, including its audit head.
    pub async fn status(&self, workflow_id: &str) -> Result<WorkflowSnapshot> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        let records = self.audit.records_for(workflow_id).await?;

        let mut snapshot = WorkflowSnapshot::from_workflow(&workflow);
        snapshot.audit_len = records.len() as u64;
        snapshot.audit_head = records.last().map(|r| r.signature.clone());
        Ok(snapshot)
    }

    /// Request a cooperative stop.
    ///
    /// Pending retry timers are cancelled, in-flight handlers are signalled
    /// through their cancellation token, their final results are recorded,
    /// and nothing new is dispatched.
    pub async fn stop(&self, workflow_id: &str) -> Result<()> {
        if let Some(run) = self.running.lock().get(workflow_id) {
            run.cancel.cancel();
            return Ok(());
        }
        // not in-process; still a valid call if the workflow exists
        if self.store.get_workflow(workflow_id).await?.is_some() {
            return Ok(());
        }
        Err(EngineError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Wait for an in-process workflow run to finish.
    pub async fn join(&self, workflow_id: &str) -> Result<()> {
        let run = self.running.lock().remove(workflow_id);
        if let Some(run) = run {
            run.handle
                .await
                .map_err(|e| EngineError::Other(format!("workflow run aborted: {e}")))?;
        }
        Ok(())
    }

    /// Rehydrate in-flight workflows from the store and re-enter the
    /// scheduler for each. Returns the ids that were resumed.
    pub async fn recover(&self) -> Result<Vec<String>> {
        let outcome = recovery::scan_in_flight(&self.store, &self.audit).await?;
        for workflow_id in &outcome.quarantined {
            error!(workflow_id = %workflow_id, "workflow quarantined with integrity violation");
        }

        let mut resumed = Vec::with_capacity(outcome.resumable.len());
        for workflow in outcome.resumable {
            resumed.push(workflow.workflow_id.clone());
            self.spawn_run(workflow, GovernanceContext::default())?;
        }
        Ok(resumed)
    }

    fn spawn_run(&self, workflow: Workflow, gov_ctx: GovernanceContext) -> Result<()> {
        let workflow_id = workflow.workflow_id.clone();
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            workflow,
            Arc::clone(&self.store),
            Arc::clone(&self.audit),
            Arc::clone(&self.gate),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            self.config.scheduler.clone(),
            cancel.clone(),
            gov_ctx,
        )?;

        let running = Arc::clone(&self.running);
        let spawned_id = workflow_id.clone();
        let handle = tokio::spawn(async move {
            match scheduler.run().await {
                Ok(workflow) => {
                    info!(
                        workflow_id = %workflow.workflow_id,
                        status = %workflow.status,
                        "workflow finished"
                    );
                }
                Err(e) => {
                    error!(workflow_id = %spawned_id, error = %e, "workflow run aborted");
                }
            }
            running.lock().remove(&spawned_id);
        });

        self.running
            .lock()
            .insert(workflow_id, RunningWorkflow { cancel, handle });
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("running", &self.running.lock().len())
            .finish_non_exhaustive()
    }
}

/// Structural comparison of two workflows' definition content, ignoring
/// execution state.
fn definitions_match(a: &Workflow, b: &Workflow) -> bool {
    if a.retry_policy != b.retry_policy
        || a.compensation_handlers != b.compensation_handlers
        || a.tasks.len() != b.tasks.len()
    {
        return false;
    }
    a.tasks.iter().all(|(id, task_a)| {
        b.tasks.get(id).is_some_and(|task_b| {
            task_a.task_type == task_b.task_type
                && task_a.depends_on == task_b.depends_on
                && task_a.config == task_b.config
                && task_a.data_classification == task_b.data_classification
                && task_a.timeout_seconds == task_b.timeout_seconds
        })
    })
}

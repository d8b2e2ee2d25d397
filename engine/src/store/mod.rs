//! State store abstraction
//!
//! The store is the sole source of truth for workflow and task state. The
//! scheduler mutates task rows only through `cas_task_status` against the
//! expected prior state, which makes concurrent schedulers for the same
//! workflow safe: the loser of a CAS re-reads and re-evaluates.
//!
//! Two implementations are provided: `MemoryStore` for tests and ephemeral
//! runs, and `SqliteStore` for durable single-node deployments. Durable
//! `put_*` operations return only after the row is committed.

mod crypto;
mod memory;
mod sqlite;

pub use crypto::FieldCipher;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::SchedulerConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::future::Future;
use swarmlite_core::model::{Task, TaskStatus, Workflow};
use tracing::warn;

/// Durable persistence for workflow and task rows.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert the workflow row (definition blob, status, idempotency key).
    async fn put_workflow(&self, workflow: &Workflow) -> Result<()>;

    /// Load a workflow with current task state overlaid.
    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>>;

    /// Ids of workflows whose status is `Running`.
    async fn list_in_flight(&self) -> Result<Vec<String>>;

    /// Upsert a task row.
    async fn put_task(&self, workflow_id: &str, task: &Task) -> Result<()>;

    async fn get_task(&self, workflow_id: &str, task_id: &str) -> Result<Option<Task>>;

    /// All task rows for a workflow, in task-id order.
    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<Task>>;

    /// Atomically transition a task's status from `expected` to `new`.
    ///
    /// Returns false when the stored status no longer matches `expected`;
    /// the caller re-reads and re-evaluates. Used to prevent double dispatch
    /// in the presence of resume.
    async fn cas_task_status(
        &self,
        workflow_id: &str,
        task_id: &str,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool>;
}

/// Retry a store operation with bounded exponential backoff.
///
/// Only `EngineError::Store` is retried; everything else surfaces
/// immediately. When the ceiling is reached the last error is returned and
/// the caller abandons the in-memory run, leaving persisted state consistent
/// for later resume.
pub(crate) async fn with_store_retry<T, F, Fut>(
    config: &SchedulerConfig,
    op: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(EngineError::Store(reason)) if attempt < config.store_retry_attempts => {
                attempt += 1;
                let delay = config.store_retry_backoff * 2u32.saturating_pow(attempt - 1);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

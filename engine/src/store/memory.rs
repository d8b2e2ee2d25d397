//! In-memory state store for tests and ephemeral runs
//!
//! All data lives in thread-safe maps and is lost on drop. Rows are not
//! signed; tamper evidence only matters for state that survives the process.

use super::StateStore;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use swarmlite_core::model::{Task, TaskStatus, Workflow, WorkflowStatus};

/// In-memory implementation of `StateStore`.
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    tasks: RwLock<HashMap<String, BTreeMap<String, Task>>>,
    /// Test switch: makes every operation fail like an unavailable store
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate store unavailability (for scheduler backoff tests).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Store("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.check_available()?;
        self.workflows
            .write()
            .insert(workflow.workflow_id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        self.check_available()?;
        let Some(mut workflow) = self.workflows.read().get(workflow_id).cloned() else {
            return Ok(None);
        };
        if let Some(rows) = self.tasks.read().get(workflow_id) {
            for (task_id, row) in rows {
                if let Some(task) = workflow.tasks.get_mut(task_id) {
                    task.status = row.status;
                    task.attempt = row.attempt;
                    task.last_error = row.last_error.clone();
                    task.started_at = row.started_at;
                    task.finished_at = row.finished_at;
                }
            }
        }
        Ok(Some(workflow))
    }

    async fn list_in_flight(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let mut ids: Vec<String> = self
            .workflows
            .read()
            .values()
            .filter(|w| w.status == WorkflowStatus::Running)
            .map(|w| w.workflow_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn put_task(&self, workflow_id: &str, task: &Task) -> Result<()> {
        self.check_available()?;
        self.tasks
            .write()
            .entry(workflow_id.to_string())
            .or_default()
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, workflow_id: &str, task_id: &str) -> Result<Option<Task>> {
        self.check_available()?;
        Ok(self
            .tasks
            .read()
            .get(workflow_id)
            .and_then(|rows| rows.get(task_id))
            .cloned())
    }

    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<Task>> {
        self.check_available()?;
        Ok(self
            .tasks
            .read()
            .get(workflow_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn cas_task_status(
        &self,
        workflow_id: &str,
        task_id: &str,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool> {
        self.check_available()?;
        let mut tasks = self.tasks.write();
        let Some(task) = tasks
            .get_mut(workflow_id)
            .and_then(|rows| rows.get_mut(task_id))
        else {
            return Ok(false);
        };
        if task.status != expected {
            return Ok(false);
        }
        task.status = new;
        Ok(true)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("workflows", &self.workflows.read().len())
            .finish()
    }
}

//! Workflow and task data model
//!
//! Statuses follow the kernel state machine: tasks are created `Pending` at
//! parse time, promoted to `Ready` when dependencies resolve, moved `Running`
//! on dispatch, and finish as `Success` or `Failed`. `Rollback` is reached
//! only by the compensation engine, `Skipped` when an ancestor failed.

use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sensitivity classification of the data a task touches.
///
/// Non-public tasks must pass the governance gate before dispatch and have
/// their sensitive fields encrypted at rest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    #[default]
    Public,
    Pii,
    Phi,
}

impl DataClassification {
    pub fn is_sensitive(self) -> bool {
        matches!(self, Self::Pii | Self::Phi)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Pii => "pii",
            Self::Phi => "phi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "pii" => Some(Self::Pii),
            "phi" => Some(Self::Phi),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a single task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Success,
    Failed,
    Rollback,
    Skipped,
}

impl TaskStatus {
    /// Terminal states are never left once entered, except `Success`, which
    /// the compensation engine may move to `Rollback`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Rollback | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Rollback => "rollback",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "rollback" => Some(Self::Rollback),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a workflow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Stopped,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of work inside a workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the owning workflow
    pub task_id: String,
    /// Handler family tag, e.g. `python`, `http`, `llm`, `database`
    pub task_type: String,
    /// Sibling task ids that must succeed first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Opaque handler configuration; may contain `function` and `params`
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub data_classification: DataClassification,
    /// Wall-clock limit per attempt; a breach is a transient failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Attempts started so far; 0 before the first try
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            depends_on: Vec::new(),
            config: Map::new(),
            data_classification: DataClassification::Public,
            timeout_seconds: None,
            status: TaskStatus::Pending,
            attempt: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = classification;
        self
    }

    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }
}

/// A validated workflow: a DAG of tasks plus execution policy.
///
/// Tasks live in a `BTreeMap` so iteration order is the deterministic
/// task-id order the scheduler uses for tie-breaking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// task_id -> registered compensation handler name
    #[serde(default)]
    pub compensation_handlers: BTreeMap<String, String>,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Workflow {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            tasks: BTreeMap::new(),
            retry_policy: RetryPolicy::default(),
            compensation_handlers: BTreeMap::new(),
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            idempotency_key: None,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(task_id)
    }

    /// Task ids in deterministic (lexicographic) order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether any task touches pii/phi data.
    pub fn has_sensitive_tasks(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.data_classification.is_sensitive())
    }
}

/// Read model for a single task, as returned by `status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Read model for a workflow, as returned by `status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub tasks: Vec<TaskSnapshot>,
    /// Number of audit records chained for this workflow
    pub audit_len: u64,
    /// Signature of the audit head, if any records exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_head: Option<String>,
}

impl WorkflowSnapshot {
    /// Build the task-level view from a workflow; audit fields are filled by
    /// the engine from the audit log.
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.workflow_id.clone(),
            status: workflow.status,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
            idempotency_key: workflow.idempotency_key.clone(),
            tasks: workflow
                .tasks
                .values()
                .map(|t| TaskSnapshot {
                    task_id: t.task_id.clone(),
                    task_type: t.task_type.clone(),
                    status: t.status,
                    attempt: t.attempt,
                    last_error: t.last_error.clone(),
                    started_at: t.started_at,
                    finished_at: t.finished_at,
                })
                .collect(),
            audit_len: 0,
            audit_head: None,
        }
    }
}

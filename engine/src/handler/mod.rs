//! Task handler interface
//!
//! Handlers are the pluggable edge of the kernel: every task type resolves to
//! a named handler which exposes `execute` and, optionally, `compensate`.
//! Handlers never panic or sleep on their own behalf; they return typed
//! results and respect the cancellation token the scheduler passes through
//! the context.
//!
//! Handlers are expected to be effectively idempotent within a single
//! `(workflow_id, task_id, attempt)`. The kernel guarantees at most one
//! concurrent invocation per task but cannot guarantee exactly-once delivery
//! across process restarts.

mod builtin;
mod registry;

pub use builtin::{builtin_registry, DatabaseHandler, HttpHandler, LlmHandler, PythonHandler};
pub use registry::HandlerRegistry;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Failure reported by a handler.
///
/// Transient errors are retried under the workflow's retry policy; permanent
/// errors skip remaining retries and fail the task immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Result type for handler operations.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Execution context passed to every handler invocation.
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub workflow_id: String,
    pub task_id: String,
    /// 1-based attempt number of this invocation
    pub attempt: u32,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub fn new(
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        attempt: u32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            attempt,
            cancellation,
        }
    }

    /// The scheduler cancels this token on workflow stop; long-running
    /// handlers should observe it and return promptly.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A named task implementation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Name this handler registers under; task types resolve against it.
    fn kind(&self) -> &str;

    /// Run the task with its opaque configuration.
    async fn execute(&self, ctx: &TaskContext, config: &Map<String, Value>)
        -> HandlerResult<Value>;

    /// Semantically undo a previously successful execution.
    ///
    /// The default reports no compensation support; the compensation engine
    /// records the error and continues.
    async fn compensate(
        &self,
        _ctx: &TaskContext,
        _config: &Map<String, Value>,
    ) -> HandlerResult<()> {
        Err(HandlerError::Permanent(format!(
            "handler '{}' does not support compensation",
            self.kind()
        )))
    }

    fn supports_compensation(&self) -> bool {
        false
    }
}

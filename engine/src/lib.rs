//! SwarmLite: single-node workflow orchestration engine
//!
//! SwarmLite executes DAG pipelines of typed tasks with durable state,
//! retry-with-backoff, compensation-based rollback, idempotent submission,
//! and a tamper-evident audit trail.
//!
//! The kernel is the [`scheduler`]: it interleaves dependency-respecting
//! parallel execution, retry/backoff, compensation-driven rollback,
//! idempotent resume across restarts, and signed state persistence. Its
//! collaborators are injected interfaces: a [`store::StateStore`], an
//! [`audit::AuditLog`], a [`governance::GovernanceGate`], and a
//! [`handler::HandlerRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use swarmlite::{KernelConfig, WorkflowEngine, GovernanceContext};
//! use swarmlite::audit::MemoryAuditLog;
//! use swarmlite::governance::AllowAll;
//! use swarmlite::handler::builtin_registry;
//! use swarmlite::store::MemoryStore;
//! use std::sync::Arc;
//!
//! let config = KernelConfig::from_env()?;
//! let key = config.audit_secret_key.clone();
//! let engine = WorkflowEngine::new(
//!     config,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryAuditLog::new(&key)),
//!     Arc::new(AllowAll),
//!     builtin_registry()?,
//! );
//!
//! let id = engine.submit(definition_yaml, Some("req-42"), GovernanceContext::new("client-1", "api")).await?;
//! let snapshot = engine.status(&id).await?;
//! ```

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod governance;
pub mod handler;
mod recovery;
pub mod scheduler;
pub mod store;

pub use config::{ComplianceReport, KernelConfig, SchedulerConfig};
pub use engine::WorkflowEngine;
pub use error::{EngineError, Result};
pub use governance::{AllowAll, Decision, GovernanceContext, GovernanceGate, PolicyGate};
pub use handler::{HandlerError, HandlerRegistry, HandlerResult, TaskContext, TaskHandler};
pub use scheduler::Scheduler;

// Re-export the core model so consumers need a single crate.
pub use swarmlite_core::audit::{AuditEvent, AuditRecord};
pub use swarmlite_core::error::{IntegrityError, ValidationError};
pub use swarmlite_core::model::{
    DataClassification, Task, TaskSnapshot, TaskStatus, Workflow, WorkflowSnapshot, WorkflowStatus,
};
pub use swarmlite_core::retry::RetryPolicy;

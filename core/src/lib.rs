//! Core data model and algorithms for the SwarmLite workflow engine.
//!
//! This crate is pure: no I/O, no async, no globals. It holds the workflow
//! data model, the definition parser and DAG validator, retry backoff math,
//! HMAC signing helpers, and the audit record model with its hash chain.
//! The executing kernel lives in the `swarmlite` crate and consumes these
//! types through injected interfaces.

pub mod audit;
pub mod definition;
pub mod error;
pub mod model;
pub mod retry;
pub mod signature;

pub use audit::{AuditEvent, AuditRecord, GENESIS_HASH};
pub use definition::{parse_str, parse_value, TaskGraph};
pub use error::{IntegrityError, ValidationError};
pub use model::{
    DataClassification, Task, TaskSnapshot, TaskStatus, Workflow, WorkflowSnapshot, WorkflowStatus,
};
pub use retry::RetryPolicy;

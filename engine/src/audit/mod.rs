//! Append-only audit log
//!
//! Every state transition is appended as a signed record whose `prev_hash`
//! chains it to the previous record for the same workflow. Appends are
//! serialized by the store, so audit events for one workflow are totally
//! ordered. Verification is a linear walk (`swarmlite_core::audit`).

mod memory;
mod sqlite;

pub use memory::MemoryAuditLog;
pub use sqlite::SqliteAuditLog;

use crate::error::Result;
use async_trait::async_trait;
use swarmlite_core::audit::{AuditEvent, AuditRecord};

/// Append-only signed event sequence.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append the next record in the workflow's chain and return it.
    async fn append(
        &self,
        workflow_id: &str,
        task_id: Option<&str>,
        event: AuditEvent,
        from_state: Option<&str>,
        to_state: Option<&str>,
    ) -> Result<AuditRecord>;

    /// All records for a workflow in chain order.
    async fn records_for(&self, workflow_id: &str) -> Result<Vec<AuditRecord>>;

    /// Verify the workflow's chain end to end.
    async fn verify_chain(&self, workflow_id: &str) -> Result<()>;
}

//! Audit record model and hash chain
//!
//! Every state transition appends a signed record. Each record's `prev_hash`
//! is the signature of the previous record for the same workflow, so the
//! per-workflow sequence forms a hash chain and tampering with any record
//! breaks verification of everything after it.

use crate::error::IntegrityError;
use crate::signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `prev_hash` of the first record in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kind of audited event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    WorkflowCreated,
    WorkflowStarted,
    TaskTransition,
    WorkflowTerminal,
    CompensationRun,
    GovernanceDeny,
    /// An idempotent replay arrived with a definition that differs from the
    /// stored one; the original workflow was returned unchanged.
    IdempotencyConflict,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowCreated => "WORKFLOW_CREATED",
            Self::WorkflowStarted => "WORKFLOW_STARTED",
            Self::TaskTransition => "TASK_TRANSITION",
            Self::WorkflowTerminal => "WORKFLOW_TERMINAL",
            Self::CompensationRun => "COMPENSATION_RUN",
            Self::GovernanceDeny => "GOVERNANCE_DENY",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WORKFLOW_CREATED" => Some(Self::WorkflowCreated),
            "WORKFLOW_STARTED" => Some(Self::WorkflowStarted),
            "TASK_TRANSITION" => Some(Self::TaskTransition),
            "WORKFLOW_TERMINAL" => Some(Self::WorkflowTerminal),
            "COMPENSATION_RUN" => Some(Self::CompensationRun),
            "GOVERNANCE_DENY" => Some(Self::GovernanceDeny),
            "IDEMPOTENCY_CONFLICT" => Some(Self::IdempotencyConflict),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signed, chained audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Store-assigned sequence number, strictly increasing
    pub seq: i64,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub event: AuditEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Signature of the previous record for this workflow, or `GENESIS_HASH`
    pub prev_hash: String,
    pub signature: String,
}

impl AuditRecord {
    /// Canonical byte encoding of everything the signature covers.
    pub fn canonical_payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.seq,
            self.workflow_id,
            self.task_id.as_deref().unwrap_or(""),
            self.event.as_str(),
            self.from_state.as_deref().unwrap_or(""),
            self.to_state.as_deref().unwrap_or(""),
            self.timestamp.to_rfc3339(),
            self.prev_hash,
        )
    }
}

/// Build the next record in a workflow's chain and sign it.
#[allow(clippy::too_many_arguments)]
pub fn chain_append(
    key: &[u8],
    prev: Option<&AuditRecord>,
    seq: i64,
    workflow_id: &str,
    task_id: Option<&str>,
    event: AuditEvent,
    from_state: Option<&str>,
    to_state: Option<&str>,
) -> AuditRecord {
    let mut record = AuditRecord {
        seq,
        workflow_id: workflow_id.to_string(),
        task_id: task_id.map(str::to_string),
        event,
        from_state: from_state.map(str::to_string),
        to_state: to_state.map(str::to_string),
        timestamp: Utc::now(),
        prev_hash: prev
            .map(|r| r.signature.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string()),
        signature: String::new(),
    };
    record.signature = signature::sign(key, &record.canonical_payload());
    record
}

/// Walk a single workflow's records in order and verify the chain.
///
/// Checks each signature against the canonical payload, each `prev_hash`
/// against the previous signature, and that `seq` is strictly increasing.
pub fn verify_chain(key: &[u8], records: &[AuditRecord]) -> Result<(), IntegrityError> {
    let mut prev: Option<&AuditRecord> = None;
    for record in records {
        if !signature::verify(key, &record.canonical_payload(), &record.signature) {
            return Err(IntegrityError {
                seq: record.seq,
                reason: "signature mismatch".to_string(),
            });
        }
        match prev {
            None => {
                if record.prev_hash != GENESIS_HASH {
                    return Err(IntegrityError {
                        seq: record.seq,
                        reason: "first record does not chain from genesis".to_string(),
                    });
                }
            }
            Some(p) => {
                if record.prev_hash != p.signature {
                    return Err(IntegrityError {
                        seq: record.seq,
                        reason: "prev_hash does not match previous signature".to_string(),
                    });
                }
                if record.seq <= p.seq {
                    return Err(IntegrityError {
                        seq: record.seq,
                        reason: "sequence numbers are not strictly increasing".to_string(),
                    });
                }
            }
        }
        prev = Some(record);
    }
    Ok(())
}

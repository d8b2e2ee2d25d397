//! In-memory audit log for tests and ephemeral runs

use super::AuditLog;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use swarmlite_core::audit::{self, AuditEvent, AuditRecord};

/// In-memory implementation of `AuditLog`.
///
/// Records are kept per workflow; a global counter assigns sequence numbers
/// the way the durable store's autoincrement column does.
pub struct MemoryAuditLog {
    key: Vec<u8>,
    records: Mutex<HashMap<String, Vec<AuditRecord>>>,
    next_seq: Mutex<i64>,
}

impl MemoryAuditLog {
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            records: Mutex::new(HashMap::new()),
            next_seq: Mutex::new(0),
        }
    }

    /// Mutate a stored record in place (for tamper-detection tests).
    #[doc(hidden)]
    pub fn tamper(&self, workflow_id: &str, index: usize, mutate: impl FnOnce(&mut AuditRecord)) {
        let mut records = self.records.lock();
        if let Some(chain) = records.get_mut(workflow_id) {
            if let Some(record) = chain.get_mut(index) {
                mutate(record);
            }
        }
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(
        &self,
        workflow_id: &str,
        task_id: Option<&str>,
        event: AuditEvent,
        from_state: Option<&str>,
        to_state: Option<&str>,
    ) -> Result<AuditRecord> {
        let mut records = self.records.lock();
        let seq = {
            let mut next = self.next_seq.lock();
            *next += 1;
            *next
        };
        let chain = records.entry(workflow_id.to_string()).or_default();
        let record = audit::chain_append(
            &self.key,
            chain.last(),
            seq,
            workflow_id,
            task_id,
            event,
            from_state,
            to_state,
        );
        chain.push(record.clone());
        Ok(record)
    }

    async fn records_for(&self, workflow_id: &str) -> Result<Vec<AuditRecord>> {
        Ok(self
            .records
            .lock()
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn verify_chain(&self, workflow_id: &str) -> Result<()> {
        let records = self.records_for(workflow_id).await?;
        audit::verify_chain(&self.key, &records)?;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuditLog")
            .field("workflows", &self.records.lock().len())
            .finish()
    }
}

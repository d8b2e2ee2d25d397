//! SQLite audit log
//!
//! One append-only table with a global autoincrement `seq`; the hash chain
//! itself is scoped per workflow. Appends run in a transaction on a
//! single-connection pool, which serializes writers and keeps the chain
//! gap-free.

use super::AuditLog;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use swarmlite_core::audit::{self, AuditEvent, AuditRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id TEXT NOT NULL,
    task_id     TEXT,
    event       TEXT NOT NULL,
    from_state  TEXT,
    to_state    TEXT,
    timestamp   TEXT NOT NULL,
    prev_hash   TEXT NOT NULL,
    signature   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_workflow ON audit (workflow_id, seq);
";

/// SQLite-backed implementation of `AuditLog`.
pub struct SqliteAuditLog {
    pool: SqlitePool,
    key: Vec<u8>,
}

impl SqliteAuditLog {
    pub async fn open(path: impl AsRef<Path>, key: &[u8]) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::Store(format!("SQLite connection failed: {e}")))?;
        Self::with_pool(pool, key).await
    }

    /// Open an in-memory audit log (for testing).
    pub async fn in_memory(key: &[u8]) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EngineError::Store(format!("SQLite connection failed: {e}")))?;
        Self::with_pool(pool, key).await
    }

    async fn with_pool(pool: SqlitePool, key: &[u8]) -> Result<Self> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| EngineError::Store(format!("SQLite schema failed: {e}")))?;
        }
        Ok(Self {
            pool,
            key: key.to_vec(),
        })
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AuditRecord> {
        let event_raw: String = row.get("event");
        let event = AuditEvent::parse(&event_raw)
            .ok_or_else(|| EngineError::Store(format!("corrupt audit event: {event_raw}")))?;
        let timestamp_raw: String = row.get("timestamp");
        let timestamp = DateTime::parse_from_rfc3339(&timestamp_raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| EngineError::Store(format!("corrupt audit timestamp: {timestamp_raw}")))?;
        Ok(AuditRecord {
            seq: row.get("seq"),
            workflow_id: row.get("workflow_id"),
            task_id: row.get("task_id"),
            event,
            from_state: row.get("from_state"),
            to_state: row.get("to_state"),
            timestamp,
            prev_hash: row.get("prev_hash"),
            signature: row.get("signature"),
        })
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn append(
        &self,
        workflow_id: &str,
        task_id: Option<&str>,
        event: AuditEvent,
        from_state: Option<&str>,
        to_state: Option<&str>,
    ) -> Result<AuditRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::Store(format!("SQLite begin failed: {e}")))?;

        let head = sqlx::query(
            "SELECT * FROM audit WHERE workflow_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?;
        let head = head.map(|r| Self::record_from_row(&r)).transpose()?;

        let next_seq: i64 = sqlx::query("SELECT COALESCE(MAX(seq), 0) + 1 AS next FROM audit")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?
            .get("next");

        let record = audit::chain_append(
            &self.key,
            head.as_ref(),
            next_seq,
            workflow_id,
            task_id,
            event,
            from_state,
            to_state,
        );

        sqlx::query(
            "INSERT INTO audit
             (seq, workflow_id, task_id, event, from_state, to_state, timestamp, prev_hash, signature)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.seq)
        .bind(&record.workflow_id)
        .bind(&record.task_id)
        .bind(record.event.as_str())
        .bind(&record.from_state)
        .bind(&record.to_state)
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.prev_hash)
        .bind(&record.signature)
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite insert audit failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| EngineError::Store(format!("SQLite commit failed: {e}")))?;

        Ok(record)
    }

    async fn records_for(&self, workflow_id: &str) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query("SELECT * FROM audit WHERE workflow_id = ? ORDER BY seq")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn verify_chain(&self, workflow_id: &str) -> Result<()> {
        let records = self.records_for(workflow_id).await?;
        audit::verify_chain(&self.key, &records)?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAuditLog").finish_non_exhaustive()
    }
}

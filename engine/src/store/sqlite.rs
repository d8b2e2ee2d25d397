//! SQLite state store
//!
//! Durable single-node persistence. A single-connection pool serializes
//! writers, `put_*` returns only after the row is committed, and CAS runs as
//! a read-verify-update transaction so the row signature always matches the
//! stored status.
//!
//! # Schema
//!
//! Two tables: `workflows(workflow_id PK)` and
//! `tasks(PK(workflow_id, task_id))`. Every row carries an HMAC signature
//! over its canonical encoding; sensitive fields are sealed by `FieldCipher`
//! before they reach a row.

use super::{FieldCipher, StateStore};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use swarmlite_core::model::{Task, TaskStatus, Workflow, WorkflowStatus};
use swarmlite_core::signature;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workflows (
    workflow_id     TEXT PRIMARY KEY,
    definition_blob TEXT NOT NULL,
    status          TEXT NOT NULL,
    idempotency_key TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    signature       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    workflow_id TEXT NOT NULL,
    task_id     TEXT NOT NULL,
    status      TEXT NOT NULL,
    attempt     INTEGER NOT NULL,
    last_error  TEXT,
    started_at  TEXT,
    finished_at TEXT,
    signature   TEXT NOT NULL,
    PRIMARY KEY (workflow_id, task_id)
);
";

/// SQLite-backed implementation of `StateStore`.
pub struct SqliteStore {
    pool: SqlitePool,
    audit_key: Vec<u8>,
    cipher: Option<FieldCipher>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub async fn open(
        path: impl AsRef<Path>,
        audit_key: &[u8],
        encryption_key: Option<&[u8]>,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::Store(format!("SQLite connection failed: {e}")))?;
        Self::with_pool(pool, audit_key, encryption_key).await
    }

    /// Open an in-memory database (for testing).
    pub async fn in_memory(audit_key: &[u8], encryption_key: Option<&[u8]>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EngineError::Store(format!("SQLite connection failed: {e}")))?;
        Self::with_pool(pool, audit_key, encryption_key).await
    }

    async fn with_pool(
        pool: SqlitePool,
        audit_key: &[u8],
        encryption_key: Option<&[u8]>,
    ) -> Result<Self> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| EngineError::Store(format!("SQLite schema failed: {e}")))?;
        }
        Ok(Self {
            pool,
            audit_key: audit_key.to_vec(),
            cipher: encryption_key.map(FieldCipher::new),
        })
    }

    fn workflow_payload(
        workflow_id: &str,
        status: &str,
        idempotency_key: Option<&str>,
        updated_at: &str,
        blob: &str,
    ) -> String {
        format!(
            "wf|{workflow_id}|{status}|{}|{updated_at}|{blob}",
            idempotency_key.unwrap_or("")
        )
    }

    fn task_payload(
        workflow_id: &str,
        task_id: &str,
        status: &str,
        attempt: i64,
        last_error: Option<&str>,
        started_at: Option<&str>,
        finished_at: Option<&str>,
    ) -> String {
        format!(
            "task|{workflow_id}|{task_id}|{status}|{attempt}|{}|{}|{}",
            last_error.unwrap_or(""),
            started_at.unwrap_or(""),
            finished_at.unwrap_or("")
        )
    }

    fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| EngineError::Store(format!("corrupt {column} timestamp: {raw}")))
    }

    fn seal_if(&self, sensitive: bool, value: &str) -> Result<String> {
        match (&self.cipher, sensitive) {
            (Some(cipher), true) => cipher.seal(value),
            _ => Ok(value.to_string()),
        }
    }

    fn open_field(&self, value: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher.open(value),
            None if FieldCipher::is_sealed(value) => Err(EngineError::Store(
                "row is encrypted but no DB_ENCRYPTION_KEY is configured".to_string(),
            )),
            None => Ok(value.to_string()),
        }
    }

    /// Decode and verify a task row.
    ///
    /// Rows carry execution state only; `task_type`, `depends_on`, and
    /// `config` live in the workflow's definition blob and are filled in
    /// when `get_workflow` overlays rows onto it.
    fn task_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
        let task_id: String = row.get("task_id");
        let status_raw: String = row.get("status");
        let attempt: i64 = row.get("attempt");
        let last_error: Option<String> = row.get("last_error");
        let started_at: Option<String> = row.get("started_at");
        let finished_at: Option<String> = row.get("finished_at");
        let stored_signature: String = row.get("signature");

        let workflow_id: String = row.get("workflow_id");
        let payload = Self::task_payload(
            &workflow_id,
            &task_id,
            &status_raw,
            attempt,
            last_error.as_deref(),
            started_at.as_deref(),
            finished_at.as_deref(),
        );
        if !signature::verify(&self.audit_key, &payload, &stored_signature) {
            return Err(EngineError::Store(format!(
                "task row signature mismatch for '{workflow_id}/{task_id}'"
            )));
        }

        let status = TaskStatus::parse(&status_raw)
            .ok_or_else(|| EngineError::Store(format!("corrupt task status: {status_raw}")))?;

        let mut task = Task::new(task_id, "");
        task.status = status;
        task.attempt = attempt as u32;
        task.last_error = match last_error {
            Some(e) => Some(self.open_field(&e)?),
            None => None,
        };
        task.started_at = started_at
            .map(|t| Self::parse_timestamp("started_at", &t))
            .transpose()?;
        task.finished_at = finished_at
            .map(|t| Self::parse_timestamp("finished_at", &t))
            .transpose()?;
        Ok(task)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn put_workflow(&self, workflow: &Workflow) -> Result<()> {
        let blob = serde_json::to_string(workflow)?;
        let blob = self.seal_if(workflow.has_sensitive_tasks(), &blob)?;
        let status = workflow.status.as_str();
        let created_at = workflow.created_at.to_rfc3339();
        let updated_at = workflow.updated_at.to_rfc3339();
        let signature = signature::sign(
            &self.audit_key,
            &Self::workflow_payload(
                &workflow.workflow_id,
                status,
                workflow.idempotency_key.as_deref(),
                &updated_at,
                &blob,
            ),
        );

        sqlx::query(
            "INSERT OR REPLACE INTO workflows
             (workflow_id, definition_blob, status, idempotency_key, created_at, updated_at, signature)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.workflow_id)
        .bind(&blob)
        .bind(status)
        .bind(&workflow.idempotency_key)
        .bind(&created_at)
        .bind(&updated_at)
        .bind(&signature)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite insert workflow failed: {e}")))?;
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            "SELECT definition_blob, status, idempotency_key, created_at, updated_at, signature
             FROM workflows WHERE workflow_id = ?",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?;

        let Some(row) = row else { return Ok(None) };

        let blob: String = row.get("definition_blob");
        let status_raw: String = row.get("status");
        let idempotency_key: Option<String> = row.get("idempotency_key");
        let updated_at_raw: String = row.get("updated_at");
        let stored_signature: String = row.get("signature");

        let payload = Self::workflow_payload(
            workflow_id,
            &status_raw,
            idempotency_key.as_deref(),
            &updated_at_raw,
            &blob,
        );
        if !signature::verify(&self.audit_key, &payload, &stored_signature) {
            return Err(EngineError::Store(format!(
                "workflow row signature mismatch for '{workflow_id}'"
            )));
        }

        let mut workflow: Workflow = serde_json::from_str(&self.open_field(&blob)?)?;
        workflow.status = WorkflowStatus::parse(&status_raw)
            .ok_or_else(|| EngineError::Store(format!("corrupt workflow status: {status_raw}")))?;
        workflow.idempotency_key = idempotency_key;
        workflow.updated_at = Self::parse_timestamp("updated_at", &updated_at_raw)?;

        for task in self.list_tasks(workflow_id).await? {
            if let Some(slot) = workflow.tasks.get_mut(&task.task_id) {
                slot.status = task.status;
                slot.attempt = task.attempt;
                slot.last_error = task.last_error;
                slot.started_at = task.started_at;
                slot.finished_at = task.finished_at;
            }
        }
        Ok(Some(workflow))
    }

    async fn list_in_flight(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT workflow_id FROM workflows WHERE status = 'running' ORDER BY workflow_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?;
        Ok(rows.iter().map(|r| r.get("workflow_id")).collect())
    }

    async fn put_task(&self, workflow_id: &str, task: &Task) -> Result<()> {
        let status = task.status.as_str();
        let attempt = task.attempt as i64;
        let last_error = task
            .last_error
            .as_deref()
            .map(|e| self.seal_if(task.data_classification.is_sensitive(), e))
            .transpose()?;
        let started_at = task.started_at.map(|t| t.to_rfc3339());
        let finished_at = task.finished_at.map(|t| t.to_rfc3339());
        let signature = signature::sign(
            &self.audit_key,
            &Self::task_payload(
                workflow_id,
                &task.task_id,
                status,
                attempt,
                last_error.as_deref(),
                started_at.as_deref(),
                finished_at.as_deref(),
            ),
        );

        sqlx::query(
            "INSERT OR REPLACE INTO tasks
             (workflow_id, task_id, status, attempt, last_error, started_at, finished_at, signature)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workflow_id)
        .bind(&task.task_id)
        .bind(status)
        .bind(attempt)
        .bind(&last_error)
        .bind(&started_at)
        .bind(&finished_at)
        .bind(&signature)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite insert task failed: {e}")))?;
        Ok(())
    }

    async fn get_task(&self, workflow_id: &str, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE workflow_id = ? AND task_id = ?")
            .bind(workflow_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?;
        row.map(|r| self.task_from_row(&r)).transpose()
    }

    async fn list_tasks(&self, workflow_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE workflow_id = ? ORDER BY task_id")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?;
        rows.iter().map(|r| self.task_from_row(r)).collect()
    }

    async fn cas_task_status(
        &self,
        workflow_id: &str,
        task_id: &str,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::Store(format!("SQLite begin failed: {e}")))?;

        let row = sqlx::query(
            "SELECT attempt, last_error, started_at, finished_at FROM tasks
             WHERE workflow_id = ? AND task_id = ? AND status = ?",
        )
        .bind(workflow_id)
        .bind(task_id)
        .bind(expected.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite query failed: {e}")))?;

        let Some(row) = row else {
            // expectation no longer holds; the caller re-reads
            return Ok(false);
        };

        let attempt: i64 = row.get("attempt");
        let last_error: Option<String> = row.get("last_error");
        let started_at: Option<String> = row.get("started_at");
        let finished_at: Option<String> = row.get("finished_at");

        // recompute the signature over the new status so the row stays
        // verifiable even if the process dies before the follow-up put_task
        let signature = signature::sign(
            &self.audit_key,
            &Self::task_payload(
                workflow_id,
                task_id,
                new.as_str(),
                attempt,
                last_error.as_deref(),
                started_at.as_deref(),
                finished_at.as_deref(),
            ),
        );

        let updated = sqlx::query(
            "UPDATE tasks SET status = ?, signature = ?
             WHERE workflow_id = ? AND task_id = ? AND status = ?",
        )
        .bind(new.as_str())
        .bind(&signature)
        .bind(workflow_id)
        .bind(task_id)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::Store(format!("SQLite update failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| EngineError::Store(format!("SQLite commit failed: {e}")))?;

        Ok(updated.rows_affected() > 0)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("encrypted", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

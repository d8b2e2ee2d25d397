//! Test harness wiring a full engine against in-memory collaborators.

use crate::fixtures::{InvocationLog, ScriptedHandler};
use std::sync::Arc;
use std::time::Duration;
use swarmlite::audit::{AuditLog, MemoryAuditLog};
use swarmlite::governance::GovernanceGate;
use swarmlite::store::MemoryStore;
use swarmlite::{
    AllowAll, AuditRecord, GovernanceContext, KernelConfig, SchedulerConfig, WorkflowEngine,
    WorkflowSnapshot,
};

pub const AUDIT_KEY: &[u8] = b"an-audit-secret-key-of-32-bytes!";
pub const ENC_KEY: &[u8] = b"db-encryption-secret-of-32-bytes";

pub struct TestHarness {
    pub engine: WorkflowEngine,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub log: Arc<InvocationLog>,
    /// Scripted handler registered as kind `test`
    pub handler: Arc<ScriptedHandler>,
}

/// Route engine logs through the test writer; `RUST_LOG` filters as usual.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_gate(Arc::new(AllowAll))
    }

    pub fn with_gate(gate: Arc<dyn GovernanceGate>) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditLog::new(AUDIT_KEY));
        let log = Arc::new(InvocationLog::default());
        let handler = Arc::new(ScriptedHandler::new("test", Arc::clone(&log)));

        let registry = Arc::new(swarmlite::HandlerRegistry::new());
        registry
            .register(Arc::clone(&handler) as Arc<dyn swarmlite::TaskHandler>)
            .unwrap();

        let config = KernelConfig::new(AUDIT_KEY.to_vec())
            .unwrap()
            .with_db_encryption_key(ENC_KEY.to_vec())
            .unwrap()
            .with_scheduler(SchedulerConfig {
                max_parallel_tasks: 4,
                default_task_timeout: None,
                store_retry_attempts: 3,
                store_retry_backoff: Duration::from_millis(5),
            });

        let engine = WorkflowEngine::new(
            config,
            Arc::clone(&store) as Arc<dyn swarmlite::store::StateStore>,
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            gate,
            registry,
        );

        Self {
            engine,
            store,
            audit,
            log,
            handler,
        }
    }

    /// Submit a definition and drive it to its terminal state.
    pub async fn run_to_terminal(&self, definition: &str) -> WorkflowSnapshot {
        let id = self
            .engine
            .submit(definition, None, GovernanceContext::new("test-client", "e2e"))
            .await
            .expect("submit failed");
        self.engine.join(&id).await.expect("join failed");
        self.engine.status(&id).await.expect("status failed")
    }

    pub async fn events(&self, workflow_id: &str) -> Vec<AuditRecord> {
        self.audit.records_for(workflow_id).await.unwrap()
    }
}

/// Compact `event/task/from->to` rendering of an audit sequence.
pub fn render_events(records: &[AuditRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| {
            format!(
                "{}:{}:{}->{}",
                r.event.as_str(),
                r.task_id.as_deref().unwrap_or("-"),
                r.from_state.as_deref().unwrap_or("-"),
                r.to_state.as_deref().unwrap_or("-"),
            )
        })
        .collect()
}

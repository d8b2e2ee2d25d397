//! Scripted task handlers for scenario tests.
//!
//! `ScriptedHandler` registers under a configurable kind and plays back a
//! per-task queue of behaviors, one per attempt; once the queue drains every
//! further attempt succeeds. Every execute and compensate call is appended to
//! a shared `InvocationLog` so tests can assert exactly what ran, in what
//! order, and how often.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use swarmlite::{HandlerError, HandlerResult, TaskContext, TaskHandler};

/// One scripted outcome for a single attempt.
#[derive(Clone, Debug)]
pub enum Behavior {
    Ok,
    /// Sleep, then succeed (for parallelism and stop tests)
    SleepMs(u64),
    Transient(&'static str),
    Permanent(&'static str),
    /// Sleep unless cancelled first; cancellation reports a transient error
    HangUntilCancelled,
}

/// What a log entry records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Execute,
    Compensate,
}

#[derive(Clone, Debug)]
pub struct Invocation {
    pub task_id: String,
    pub attempt: u32,
    pub call: Call,
}

/// Shared record of every handler invocation.
#[derive(Default)]
pub struct InvocationLog {
    entries: Mutex<Vec<Invocation>>,
}

impl InvocationLog {
    pub fn record(&self, task_id: &str, attempt: u32, call: Call) {
        self.entries.lock().push(Invocation {
            task_id: task_id.to_string(),
            attempt,
            call,
        });
    }

    pub fn entries(&self) -> Vec<Invocation> {
        self.entries.lock().clone()
    }

    pub fn executions_of(&self, task_id: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|i| i.task_id == task_id && i.call == Call::Execute)
            .count()
    }

    pub fn compensations(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|i| i.call == Call::Compensate)
            .map(|i| i.task_id.clone())
            .collect()
    }
}

/// Handler whose behavior is scripted per task id.
pub struct ScriptedHandler {
    kind: String,
    log: Arc<InvocationLog>,
    behaviors: Mutex<HashMap<String, VecDeque<Behavior>>>,
    /// Compensation outcomes per task id; missing means success
    failing_compensations: Mutex<HashMap<String, &'static str>>,
}

impl ScriptedHandler {
    pub fn new(kind: impl Into<String>, log: Arc<InvocationLog>) -> Self {
        Self {
            kind: kind.into(),
            log,
            behaviors: Mutex::new(HashMap::new()),
            failing_compensations: Mutex::new(HashMap::new()),
        }
    }

    /// Queue behaviors for a task, consumed one per attempt.
    pub fn script(&self, task_id: &str, behaviors: impl IntoIterator<Item = Behavior>) {
        self.behaviors
            .lock()
            .insert(task_id.to_string(), behaviors.into_iter().collect());
    }

    /// Make compensation for a task fail with the given message.
    pub fn fail_compensation(&self, task_id: &str, message: &'static str) {
        self.failing_compensations
            .lock()
            .insert(task_id.to_string(), message);
    }

    fn next_behavior(&self, task_id: &str) -> Behavior {
        self.behaviors
            .lock()
            .get_mut(task_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Behavior::Ok)
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        _config: &Map<String, Value>,
    ) -> HandlerResult<Value> {
        self.log.record(&ctx.task_id, ctx.attempt, Call::Execute);

        match self.next_behavior(&ctx.task_id) {
            Behavior::Ok => Ok(json!({"task": ctx.task_id, "attempt": ctx.attempt})),
            Behavior::SleepMs(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({"task": ctx.task_id, "slept_ms": ms}))
            }
            Behavior::Transient(msg) => Err(HandlerError::Transient(msg.to_string())),
            Behavior::Permanent(msg) => Err(HandlerError::Permanent(msg.to_string())),
            Behavior::HangUntilCancelled => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        Ok(json!({"task": ctx.task_id}))
                    }
                    _ = ctx.cancellation().cancelled() => {
                        Err(HandlerError::Transient("cancelled".to_string()))
                    }
                }
            }
        }
    }

    async fn compensate(
        &self,
        ctx: &TaskContext,
        _config: &Map<String, Value>,
    ) -> HandlerResult<()> {
        self.log.record(&ctx.task_id, ctx.attempt, Call::Compensate);
        if let Some(message) = self.failing_compensations.lock().get(ctx.task_id.as_str()) {
            return Err(HandlerError::Permanent(message.to_string()));
        }
        Ok(())
    }

    fn supports_compensation(&self) -> bool {
        true
    }
}

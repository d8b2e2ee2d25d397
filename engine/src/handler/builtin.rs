//! Simulated built-in handlers
//!
//! Production deployments register real integrations; these simulated
//! handlers cover the stock task families (`python`, `http`, `database`,
//! `llm`) for tests, demos, and local runs. Outputs mirror what the real
//! integrations would report without touching the network.

use super::{HandlerError, HandlerResult, TaskContext, TaskHandler};
use crate::error::Result;
use crate::handler::HandlerRegistry;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// A registry pre-loaded with all built-in handlers.
pub fn builtin_registry() -> Result<Arc<HandlerRegistry>> {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(PythonHandler))?;
    registry.register(Arc::new(HttpHandler))?;
    registry.register(Arc::new(DatabaseHandler))?;
    registry.register(Arc::new(LlmHandler))?;
    Ok(Arc::new(registry))
}

fn params_of(config: &Map<String, Value>) -> Vec<String> {
    config
        .get("params")
        .and_then(|v| v.as_object())
        .map(|params| params.keys().cloned().collect())
        .unwrap_or_default()
}

/// Simulated dispatch of a named Python-style function.
pub struct PythonHandler;

#[async_trait]
impl TaskHandler for PythonHandler {
    fn kind(&self) -> &str {
        "python"
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        config: &Map<String, Value>,
    ) -> HandlerResult<Value> {
        let function = config
            .get("function")
            .and_then(|v| v.as_str())
            .unwrap_or("default_function");
        let params_used = params_of(config);

        debug!(task_id = %ctx.task_id, function, "executing python task");

        let result = match function {
            "clean_dataframe" => json!({
                "status": "cleaned",
                "function": function,
                "records_processed": 1000,
                "params_used": params_used,
            }),
            "validate_schema" => json!({
                "status": "validated",
                "function": function,
                "valid": true,
                "errors": [],
                "params_used": params_used,
            }),
            "transform_data" => json!({
                "status": "transformed",
                "function": function,
                "output_size": 500,
                "params_used": params_used,
            }),
            _ => json!({
                "status": "executed",
                "function": function,
                "params_received": params_used,
            }),
        };
        Ok(result)
    }

    async fn compensate(
        &self,
        ctx: &TaskContext,
        config: &Map<String, Value>,
    ) -> HandlerResult<()> {
        let function = config
            .get("function")
            .and_then(|v| v.as_str())
            .unwrap_or("default_function");
        debug!(task_id = %ctx.task_id, function, "reversing python task");
        Ok(())
    }

    fn supports_compensation(&self) -> bool {
        true
    }
}

/// Simulated HTTP call.
pub struct HttpHandler;

#[async_trait]
impl TaskHandler for HttpHandler {
    fn kind(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        config: &Map<String, Value>,
    ) -> HandlerResult<Value> {
        let url = config
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("https://httpbin.org/get");
        let method = config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET");
        Ok(json!({
            "status": "http_executed",
            "url": url,
            "method": method,
        }))
    }
}

/// Simulated database operation with a compensating delete.
pub struct DatabaseHandler;

#[async_trait]
impl TaskHandler for DatabaseHandler {
    fn kind(&self) -> &str {
        "database"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        config: &Map<String, Value>,
    ) -> HandlerResult<Value> {
        Ok(json!({
            "status": "database_executed",
            "config_keys": config.keys().collect::<Vec<_>>(),
        }))
    }

    async fn compensate(
        &self,
        ctx: &TaskContext,
        _config: &Map<String, Value>,
    ) -> HandlerResult<()> {
        debug!(task_id = %ctx.task_id, "reversing database writes");
        Ok(())
    }

    fn supports_compensation(&self) -> bool {
        true
    }
}

/// Simulated LLM invocation with the stock prompt guardrails.
///
/// The model allow list lives in the governance gate; the prompt length cap
/// and banned phrases are also rejected here as permanent errors.
pub struct LlmHandler;

const MAX_PROMPT_CHARS: usize = 2000;
const BANNED_PHRASES: &[&str] = &[
    "ignore previous instructions",
    "pretend you're not an ai",
    "reveal system prompt",
];

#[async_trait]
impl TaskHandler for LlmHandler {
    fn kind(&self) -> &str {
        "llm"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        config: &Map<String, Value>,
    ) -> HandlerResult<Value> {
        let prompt = config
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerError::Permanent("llm task requires a prompt".to_string()))?;

        if prompt.len() > MAX_PROMPT_CHARS {
            return Err(HandlerError::Permanent(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        let lowered = prompt.to_lowercase();
        for banned in BANNED_PHRASES {
            if lowered.contains(banned) {
                return Err(HandlerError::Permanent(format!(
                    "prompt contains banned phrase: '{banned}'"
                )));
            }
        }

        let model = config
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("gpt-4-turbo");
        Ok(json!({
            "response": "Simulated LLM response",
            "model": model,
            "confidence": 0.85,
        }))
    }
}

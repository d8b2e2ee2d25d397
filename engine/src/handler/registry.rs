//! Handler registry
//!
//! Maps handler names to implementations. Task dispatch resolves
//! `task.task_type`; compensation resolves the name the workflow registered
//! in `compensation_handlers`. Each name must be unique.

use super::TaskHandler;
use crate::error::{EngineError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of named task handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its `kind()`.
    pub fn register(&self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let kind = handler.kind().to_string();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&kind) {
            return Err(EngineError::InvalidConfiguration(format!(
                "handler '{kind}' is already registered; handler names must be unique"
            )));
        }
        handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(kind).cloned()
    }

    pub fn has(&self, kind: &str) -> bool {
        self.handlers.read().contains_key(kind)
    }

    /// All registered handler names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.kinds())
            .finish()
    }
}

//! Governance gate
//!
//! A pure decision function consulted once per task immediately before
//! promotion to `Running`. Deny is terminal for the task: it goes straight to
//! `Failed` with a `GovernanceDenied` reason, a `GOVERNANCE_DENY` audit event
//! is emitted, and the handler is never invoked.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::path::Path;
use swarmlite_core::model::{DataClassification, Task};

/// Opaque carrier of governance inputs from the submission surface.
#[derive(Clone, Debug, Default)]
pub struct GovernanceContext {
    /// `X-Client-ID` header of the submitter
    pub client_id: Option<String>,
    /// `X-Request-Source` header of the submitter
    pub request_source: Option<String>,
    /// Whether the workflow carries an idempotency key
    pub has_idempotency_key: bool,
}

impl GovernanceContext {
    pub fn new(client_id: impl Into<String>, request_source: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            request_source: Some(request_source.into()),
            has_idempotency_key: false,
        }
    }
}

/// Outcome of a governance check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Allow/deny decision consulted per task before dispatch.
pub trait GovernanceGate: Send + Sync {
    fn check(&self, task: &Task, ctx: &GovernanceContext) -> Decision;
}

/// Gate that allows everything; useful for tests and unregulated deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl GovernanceGate for AllowAll {
    fn check(&self, _task: &Task, _ctx: &GovernanceContext) -> Decision {
        Decision::Allow
    }
}

/// Policy rules loaded from the governance config file.
#[derive(Clone, Debug, Deserialize)]
pub struct PolicyRules {
    /// Whether phi-classified tasks may run at all
    #[serde(default)]
    pub phi_allowed: bool,
    /// Whether pii-classified tasks may run at all
    #[serde(default = "default_true")]
    pub pii_allowed: bool,
    /// Models an `llm` task may name in `config.model`
    #[serde(default)]
    pub llm_allowed_models: Vec<String>,
    /// Phrases that may not appear in any prompt
    #[serde(default)]
    pub banned_prompts: Vec<String>,
    /// Upper bound on prompt length
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Task types that require the workflow to carry an idempotency key
    #[serde(default)]
    pub idempotency_required_types: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_prompt_chars() -> usize {
    2000
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            phi_allowed: false,
            pii_allowed: true,
            llm_allowed_models: Vec::new(),
            banned_prompts: Vec::new(),
            max_prompt_chars: default_max_prompt_chars(),
            idempotency_required_types: Vec::new(),
        }
    }
}

/// Governance policy file: version header plus the rule set.
#[derive(Clone, Debug, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub policy_version: Option<String>,
    #[serde(default)]
    pub policy_owner: Option<String>,
    pub rules: PolicyRules,
}

/// Rule-driven implementation of `GovernanceGate`.
#[derive(Clone, Debug)]
pub struct PolicyGate {
    rules: PolicyRules,
}

impl PolicyGate {
    pub fn new(rules: PolicyRules) -> Self {
        Self { rules }
    }

    /// Load the policy document from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let doc: PolicyDocument = serde_yaml::from_str(&raw).map_err(|e| {
            EngineError::InvalidConfiguration(format!(
                "governance policy '{}' failed to parse: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::new(doc.rules))
    }

    pub fn rules(&self) -> &PolicyRules {
        &self.rules
    }

    fn check_prompt(&self, prompt: &str) -> Decision {
        if prompt.len() > self.rules.max_prompt_chars {
            return Decision::Deny(format!(
                "prompt exceeds {} characters",
                self.rules.max_prompt_chars
            ));
        }
        let lowered = prompt.to_lowercase();
        for banned in &self.rules.banned_prompts {
            if lowered.contains(&banned.to_lowercase()) {
                return Decision::Deny(format!("prompt contains banned phrase: '{banned}'"));
            }
        }
        Decision::Allow
    }
}

impl GovernanceGate for PolicyGate {
    fn check(&self, task: &Task, ctx: &GovernanceContext) -> Decision {
        match task.data_classification {
            DataClassification::Phi if !self.rules.phi_allowed => {
                return Decision::Deny("phi_not_allowed".to_string());
            }
            DataClassification::Pii if !self.rules.pii_allowed => {
                return Decision::Deny("pii_not_allowed".to_string());
            }
            _ => {}
        }

        if task.task_type == "llm" {
            let model = task.config.get("model").and_then(|v| v.as_str());
            match model {
                Some(model) if self.rules.llm_allowed_models.iter().any(|m| m == model) => {}
                Some(model) => {
                    return Decision::Deny(format!("model '{model}' is not in the allow list"));
                }
                None if self.rules.llm_allowed_models.is_empty() => {}
                None => return Decision::Deny("llm task names no model".to_string()),
            }
        }

        if let Some(prompt) = task.config.get("prompt").and_then(|v| v.as_str()) {
            let decision = self.check_prompt(prompt);
            if !decision.is_allow() {
                return decision;
            }
        }

        if self
            .rules
            .idempotency_required_types
            .iter()
            .any(|t| t == &task.task_type)
            && !ctx.has_idempotency_key
        {
            return Decision::Deny(format!(
                "idempotency key required for '{}' tasks",
                task.task_type
            ));
        }

        Decision::Allow
    }
}

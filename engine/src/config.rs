//! Kernel configuration
//!
//! All configuration is explicit: the engine takes a `KernelConfig` at
//! construction and collaborators are injected interfaces, never process
//! globals. `from_env` is the one place environment variables are read, and
//! it fails fast with descriptive errors.

use crate::error::{EngineError, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use swarmlite_core::signature::MIN_KEY_BYTES;

/// Environment variable names read by `KernelConfig::from_env`.
pub const ENV_AUDIT_SECRET_KEY: &str = "AUDIT_SECRET_KEY";
pub const ENV_DB_ENCRYPTION_KEY: &str = "DB_ENCRYPTION_KEY";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_GOVERNANCE_CONFIG_PATH: &str = "GOVERNANCE_CONFIG_PATH";

/// Tuning for the scheduler and its store interactions.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the process-wide task worker pool
    pub max_parallel_tasks: usize,
    /// Fallback per-attempt timeout when a task sets none
    pub default_task_timeout: Option<Duration>,
    /// Bounded retries for store operations before the scheduler gives up
    pub store_retry_attempts: u32,
    /// Initial backoff between store retries; doubles per attempt
    pub store_retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl SchedulerConfig {
    /// Default configuration matching documented capacity
    pub const DEFAULT: Self = Self {
        max_parallel_tasks: 20,
        default_task_timeout: None,
        store_retry_attempts: 5,
        store_retry_backoff: Duration::from_millis(200),
    };

    /// Low-resource configuration for development and tests
    pub const LOW_RESOURCE: Self = Self {
        max_parallel_tasks: 2,
        default_task_timeout: None,
        store_retry_attempts: 3,
        store_retry_backoff: Duration::from_millis(50),
    };

    /// Create a new configuration with validation
    pub fn new(
        max_parallel_tasks: usize,
        default_task_timeout: Option<Duration>,
        store_retry_attempts: u32,
        store_retry_backoff: Duration,
    ) -> Result<Self> {
        if max_parallel_tasks == 0 {
            return Err(EngineError::InvalidConfiguration(
                "max_parallel_tasks must be positive".to_string(),
            ));
        }
        Ok(Self {
            max_parallel_tasks,
            default_task_timeout,
            store_retry_attempts,
            store_retry_backoff,
        })
    }
}

/// Complete kernel configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// HMAC key for store rows and the audit chain; at least 32 bytes
    pub audit_secret_key: Vec<u8>,
    /// Key for at-rest encryption of sensitive fields; required once any
    /// workflow uses a non-public classification
    pub db_encryption_key: Option<Vec<u8>>,
    /// Location of the durable store, e.g. `sqlite://swarmlite.db`
    pub database_url: Option<String>,
    /// Governance policy file consumed by `PolicyGate`
    pub governance_config_path: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
}

impl KernelConfig {
    /// Create a configuration with the required audit key, validating length.
    pub fn new(audit_secret_key: impl Into<Vec<u8>>) -> Result<Self> {
        let audit_secret_key = audit_secret_key.into();
        if audit_secret_key.len() < MIN_KEY_BYTES {
            return Err(EngineError::InvalidConfiguration(format!(
                "{ENV_AUDIT_SECRET_KEY} must be at least {MIN_KEY_BYTES} bytes"
            )));
        }
        Ok(Self {
            audit_secret_key,
            db_encryption_key: None,
            database_url: None,
            governance_config_path: None,
            scheduler: SchedulerConfig::DEFAULT,
        })
    }

    /// Load configuration from the environment, failing fast on missing or
    /// too-short keys.
    pub fn from_env() -> Result<Self> {
        let audit_secret_key = std::env::var(ENV_AUDIT_SECRET_KEY).map_err(|_| {
            EngineError::InvalidConfiguration(format!(
                "missing required environment variable: {ENV_AUDIT_SECRET_KEY}"
            ))
        })?;
        let mut config = Self::new(audit_secret_key.into_bytes())?;

        if let Ok(key) = std::env::var(ENV_DB_ENCRYPTION_KEY) {
            config = config.with_db_encryption_key(key.into_bytes())?;
        }
        if let Ok(url) = std::env::var(ENV_DATABASE_URL) {
            config.database_url = Some(url);
        }
        if let Ok(path) = std::env::var(ENV_GOVERNANCE_CONFIG_PATH) {
            config.governance_config_path = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    pub fn with_db_encryption_key(mut self, key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.len() < MIN_KEY_BYTES {
            return Err(EngineError::InvalidConfiguration(format!(
                "{ENV_DB_ENCRYPTION_KEY} must be at least {MIN_KEY_BYTES} bytes"
            )));
        }
        self.db_encryption_key = Some(key);
        Ok(self)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_governance_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.governance_config_path = Some(path.into());
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Key-presence summary for the external health surface.
    pub fn compliance_report(&self) -> ComplianceReport {
        let data_encryption = self.db_encryption_key.is_some();
        let governance_policy = self.governance_config_path.is_some();
        ComplianceReport {
            audit_trail: true,
            data_encryption,
            governance_policy,
            compliant: data_encryption && governance_policy,
        }
    }
}

/// Summary of which compliance-relevant keys are configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub audit_trail: bool,
    pub data_encryption: bool,
    pub governance_policy: bool,
    pub compliant: bool,
}

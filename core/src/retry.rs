//! Retry policy and backoff computation
//!
//! The scheduler is the sole owner of time: handlers report transient or
//! permanent failure and the scheduler computes the delay before the next
//! attempt from this policy. Delay is measured from the end of the failed
//! attempt.

use crate::error::ValidationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-workflow retry policy.
///
/// `delay(attempt) = delay_seconds × (2^(attempt-1) if exponential_backoff
/// else 1) × (1 + U(-jitter_fraction, +jitter_fraction))`, clamped to ≥ 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first; must be ≥ 1
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    /// Double the base delay for each subsequent attempt
    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
    /// Symmetric jitter fraction in [0, 1] to spread retry storms
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_seconds() -> f64 {
    2.0
}

fn default_exponential_backoff() -> bool {
    true
}

fn default_jitter_fraction() -> f64 {
    0.1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay_seconds(),
            exponential_backoff: default_exponential_backoff(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.delay_seconds.is_finite() || self.delay_seconds < 0.0 {
            return Err(ValidationError::InvalidRetryPolicy(
                "delay_seconds must be a non-negative number".to_string(),
            ));
        }
        if !self.jitter_fraction.is_finite()
            || !(0.0..=1.0).contains(&self.jitter_fraction)
        {
            return Err(ValidationError::InvalidRetryPolicy(
                "jitter_fraction must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether another attempt may be started after `attempt` attempts have
    /// already been used.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = if self.exponential_backoff {
            self.delay_seconds * 2f64.powi(attempt as i32 - 1)
        } else {
            self.delay_seconds
        };
        let jitter = if self.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_fraction..=self.jitter_fraction)
        } else {
            0.0
        };
        Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0))
    }
}

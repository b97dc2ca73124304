//! Recovery component sections

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::classifier::ClassificationRule;

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upper bound on any single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(60),
        }
    }
}

/// `[circuit_breaker]`
///
/// Thresholds and open timeouts come from each classification; these
/// settings apply to every breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Lifetime of a failure counter since its last failure
    #[serde(with = "humantime_serde")]
    pub failure_ttl: Duration,

    /// Extra lifetime of open/half-open state beyond the open timeout
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Log state transitions
    pub enable_logging: bool,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_ttl: Duration::from_secs(5 * 60),
            recovery_timeout: Duration::from_secs(30),
            enable_logging: true,
        }
    }
}

impl CircuitBreakerSettings {
    /// Breaker configuration for one component
    pub fn breaker_config(&self, failure_threshold: u32, timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            timeout,
            recovery_timeout: self.recovery_timeout,
            failure_ttl: self.failure_ttl,
            enable_logging: self.enable_logging,
        }
    }
}

/// `[classifier]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Replaces the built-in rule table when non-empty
    pub rules: Vec<ClassificationRule>,
}

//! Top-level configuration and loading

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::classifier::{ClassificationRule, ErrorClassifier};
use crate::error::{WardenError, WardenResult};
use crate::escalation::EscalationConfig;
use crate::health::HealthConfig;

use super::{CircuitBreakerSettings, ClassifierConfig, ObservabilityConfig, RetryConfig};

/// Complete configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retry configuration
    pub retry: RetryConfig,

    /// Settings shared by every circuit breaker
    pub circuit_breaker: CircuitBreakerSettings,

    /// Escalation pattern detection
    pub escalation: EscalationConfig,

    /// Health scoring
    pub health: HealthConfig,

    /// Classification rule table
    pub classifier: ClassifierConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate the result
    pub fn from_file<P: AsRef<Path>>(path: P) -> WardenResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::configuration(
                "config_file",
                format!("Failed to read {}: {}", path.display(), e),
            )
        })?;
        debug!("Loaded configuration from {}", path.display());

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without overrides or validation
    pub fn from_toml_str(content: &str) -> WardenResult<Self> {
        toml::from_str(content).map_err(|e| {
            WardenError::configuration("toml_parser", format!("Failed to parse TOML: {}", e))
        })
    }

    pub fn to_toml_string(&self) -> WardenResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("WARDEN_LOG_LEVEL") {
            self.observability.logging.level = level;
        }
        if let Some(secs) = env_secs("WARDEN_RETRY_MAX_DELAY_SECS") {
            self.retry.max_delay = secs;
        }
        if let Some(secs) = env_secs("WARDEN_FAILURE_TTL_SECS") {
            self.circuit_breaker.failure_ttl = secs;
        }
        if let Some(secs) = env_secs("WARDEN_PATTERN_WINDOW_SECS") {
            self.escalation.pattern_window = secs;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> WardenResult<()> {
        if self.retry.max_delay.is_zero() {
            return Err(WardenError::configuration(
                "retry",
                "max_delay must be greater than zero",
            ));
        }

        if self.circuit_breaker.failure_ttl.is_zero() {
            return Err(WardenError::configuration(
                "circuit_breaker",
                "failure_ttl must be greater than zero",
            ));
        }

        if self.escalation.pattern_window.is_zero() {
            return Err(WardenError::configuration(
                "escalation",
                "pattern_window must be greater than zero",
            ));
        }
        if self.escalation.medium_threshold == 0
            || self.escalation.medium_threshold > self.escalation.high_threshold
        {
            return Err(WardenError::configuration(
                "escalation",
                format!(
                    "Thresholds must satisfy 0 < medium ({}) <= high ({})",
                    self.escalation.medium_threshold, self.escalation.high_threshold
                ),
            ));
        }

        if self.health.window.is_zero() {
            return Err(WardenError::configuration(
                "health",
                "window must be greater than zero",
            ));
        }

        if !self.observability.logging.is_valid_level() {
            return Err(WardenError::configuration(
                "observability",
                format!("Invalid log level: {}", self.observability.logging.level),
            ));
        }

        let mut names = HashSet::new();
        for rule in &self.classifier.rules {
            if !names.insert(rule.name.as_str()) {
                return Err(WardenError::configuration(
                    "classifier",
                    format!("Duplicate rule name: {}", rule.name),
                ));
            }
            if rule.matcher.is_empty() {
                return Err(WardenError::configuration(
                    "classifier",
                    format!("Rule '{}' has no match criteria", rule.name),
                ));
            }
        }

        Ok(())
    }

    /// Classifier over the configured rules, or the built-in table
    pub fn classifier(&self) -> ErrorClassifier {
        if self.classifier.rules.is_empty() {
            ErrorClassifier::new()
        } else {
            ErrorClassifier::with_rules(self.classifier.rules.clone())
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry.max_delay = delay;
        self
    }

    pub fn failure_ttl(mut self, ttl: Duration) -> Self {
        self.config.circuit_breaker.failure_ttl = ttl;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.circuit_breaker.recovery_timeout = timeout;
        self
    }

    pub fn pattern_window(mut self, window: Duration) -> Self {
        self.config.escalation.pattern_window = window;
        self
    }

    pub fn escalation_thresholds(mut self, medium: usize, high: usize) -> Self {
        self.config.escalation.medium_threshold = medium;
        self.config.escalation.high_threshold = high;
        self
    }

    pub fn health_window(mut self, window: Duration) -> Self {
        self.config.health.window = window;
        self
    }

    pub fn rule(mut self, rule: ClassificationRule) -> Self {
        self.config.classifier.rules.push(rule);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.observability.logging.level = level.into();
        self
    }

    pub fn build(self) -> WardenResult<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

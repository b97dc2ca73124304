//! Rule-driven error classification
//!
//! The classifier maps an `(error, layer, component)` triple to an
//! [`ErrorClassification`] by walking an ordered table of
//! [`ClassificationRule`]s. The first rule whose matcher accepts the input
//! wins, so table order is part of the contract: a specific rule must sit
//! above any generic rule that would otherwise shadow it.
//!
//! Rules are plain data and can be loaded from configuration:
//!
//! ```toml
//! [[classifier.rules]]
//! name = "payments"
//! matcher = { component_keywords = ["payment"] }
//! classification = { category = "external_service", severity = "error", is_recoverable = true, recovery_strategy = "fallback" }
//! ```
//!
//! Classification is pure: no I/O and no shared state.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::types::{
    ErrorCategory, ErrorClassification, ErrorContext, ErrorDescriptor, ErrorSeverity,
    RecoveryStrategy,
};

/// Predicate over `(type name, layer, component, lower-cased message)`
///
/// A matcher accepts the input when any populated criterion matches.
/// Keyword comparisons are case-insensitive substring checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleMatcher {
    pub message_keywords: Vec<String>,
    pub type_names: Vec<String>,
    pub layers: Vec<String>,
    pub component_keywords: Vec<String>,
}

impl RuleMatcher {
    pub fn is_empty(&self) -> bool {
        self.message_keywords.is_empty()
            && self.type_names.is_empty()
            && self.layers.is_empty()
            && self.component_keywords.is_empty()
    }

    fn matches(&self, input: &RuleInput<'_>) -> bool {
        self.message_keywords
            .iter()
            .any(|k| input.message.contains(&k.to_lowercase()))
            || self
                .type_names
                .iter()
                .any(|t| t.eq_ignore_ascii_case(input.type_name))
            || self.layers.iter().any(|l| l == input.layer)
            || self
                .component_keywords
                .iter()
                .any(|k| input.component.contains(&k.to_lowercase()))
    }
}

/// Classification produced when a rule matches
///
/// Unset strategy parameters take the [`ErrorClassification`] defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationTemplate {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub is_recoverable: bool,
    pub recovery_strategy: RecoveryStrategy,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub base_delay: Option<Duration>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub circuit_breaker_threshold: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub circuit_breaker_timeout: Option<Duration>,
}

impl ClassificationTemplate {
    pub fn new(
        category: ErrorCategory,
        severity: ErrorSeverity,
        is_recoverable: bool,
        recovery_strategy: RecoveryStrategy,
    ) -> Self {
        Self {
            category,
            severity,
            is_recoverable,
            recovery_strategy,
            max_retries: None,
            base_delay: None,
            backoff_multiplier: None,
            circuit_breaker_threshold: None,
            circuit_breaker_timeout: None,
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn circuit_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        self.circuit_breaker_threshold = Some(threshold);
        self.circuit_breaker_timeout = Some(timeout);
        self
    }

    pub fn build(&self) -> ErrorClassification {
        let mut classification = ErrorClassification::new(
            self.category,
            self.severity,
            self.is_recoverable,
            self.recovery_strategy,
        );
        if let Some(v) = self.max_retries {
            classification.max_retries = v;
        }
        if let Some(v) = self.base_delay {
            classification.base_delay = v;
        }
        if let Some(v) = self.backoff_multiplier {
            classification.backoff_multiplier = v;
        }
        if let Some(v) = self.circuit_breaker_threshold {
            classification.circuit_breaker_threshold = v;
        }
        if let Some(v) = self.circuit_breaker_timeout {
            classification.circuit_breaker_timeout = v;
        }
        classification
    }
}

/// One row of the classification table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub name: String,
    pub matcher: RuleMatcher,
    pub classification: ClassificationTemplate,
}

impl ClassificationRule {
    pub fn new(
        name: impl Into<String>,
        matcher: RuleMatcher,
        classification: ClassificationTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            matcher,
            classification,
        }
    }
}

struct RuleInput<'a> {
    type_name: &'a str,
    layer: &'a str,
    component: String,
    message: String,
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// The built-in table, in evaluation order
pub fn default_rules() -> Vec<ClassificationRule> {
    let database = ClassificationTemplate::new(
        ErrorCategory::Database,
        ErrorSeverity::Critical,
        true,
        RecoveryStrategy::CircuitBreaker,
    )
    .max_retries(2)
    .circuit_breaker(3, Duration::from_secs(30));

    vec![
        // Errors raised inside the database layer stay database errors even
        // when their message reads like a network failure.
        ClassificationRule::new(
            "database_layer",
            RuleMatcher {
                layers: keywords(&["database"]),
                ..Default::default()
            },
            database.clone(),
        ),
        ClassificationRule::new(
            "network",
            RuleMatcher {
                message_keywords: keywords(&["connection", "timeout", "unreachable", "dns"]),
                type_names: keywords(&["Elapsed"]),
                ..Default::default()
            },
            ClassificationTemplate::new(
                ErrorCategory::Network,
                ErrorSeverity::Warning,
                true,
                RecoveryStrategy::Retry,
            )
            .max_retries(3)
            .base_delay(Duration::from_secs(2)),
        ),
        ClassificationRule::new(
            "authentication",
            RuleMatcher {
                message_keywords: keywords(&[
                    "authentication",
                    "login",
                    "token",
                    "unauthorized",
                    "invalid credentials",
                ]),
                ..Default::default()
            },
            ClassificationTemplate::new(
                ErrorCategory::Authentication,
                ErrorSeverity::Error,
                true,
                RecoveryStrategy::Fallback,
            )
            .max_retries(1),
        ),
        ClassificationRule::new(
            "authorization",
            RuleMatcher {
                message_keywords: keywords(&[
                    "permission",
                    "forbidden",
                    "access denied",
                    "not allowed",
                ]),
                ..Default::default()
            },
            ClassificationTemplate::new(
                ErrorCategory::Authorization,
                ErrorSeverity::Error,
                false,
                RecoveryStrategy::Escalate,
            ),
        ),
        ClassificationRule::new(
            "validation",
            RuleMatcher {
                message_keywords: keywords(&["validation", "invalid", "required field", "malformed"]),
                ..Default::default()
            },
            ClassificationTemplate::new(
                ErrorCategory::Validation,
                ErrorSeverity::Warning,
                false,
                RecoveryStrategy::Escalate,
            ),
        ),
        ClassificationRule::new(
            "database",
            RuleMatcher {
                message_keywords: keywords(&["database", "sql", "deadlock", "connection pool"]),
                layers: keywords(&["database"]),
                ..Default::default()
            },
            database,
        ),
        ClassificationRule::new(
            "external_service",
            RuleMatcher {
                layers: keywords(&["external"]),
                component_keywords: keywords(&["api", "service", "client"]),
                ..Default::default()
            },
            ClassificationTemplate::new(
                ErrorCategory::ExternalService,
                ErrorSeverity::Error,
                true,
                RecoveryStrategy::CircuitBreaker,
            )
            .max_retries(3)
            .circuit_breaker(5, Duration::from_secs(60)),
        ),
        ClassificationRule::new(
            "resource",
            RuleMatcher {
                message_keywords: keywords(&["memory", "disk", "quota", "limit exceeded"]),
                ..Default::default()
            },
            ClassificationTemplate::new(
                ErrorCategory::Resource,
                ErrorSeverity::Critical,
                false,
                RecoveryStrategy::ManualIntervention,
            ),
        ),
        ClassificationRule::new(
            "configuration",
            RuleMatcher {
                message_keywords: keywords(&[
                    "configuration",
                    "config",
                    "setting",
                    "environment variable",
                ]),
                ..Default::default()
            },
            ClassificationTemplate::new(
                ErrorCategory::Configuration,
                ErrorSeverity::Error,
                false,
                RecoveryStrategy::ManualIntervention,
            ),
        ),
    ]
}

/// Ordered rule engine producing [`ErrorClassification`]s
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl ErrorClassifier {
    /// Classifier over the built-in table
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    /// Classifier over a caller-supplied table, evaluated in the given order
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Name of the first rule accepting the input, if any
    pub fn matching_rule(
        &self,
        error: &ErrorDescriptor,
        layer: &str,
        component: &str,
    ) -> Option<&ClassificationRule> {
        let input = RuleInput {
            type_name: &error.type_name,
            layer,
            component: component.to_lowercase(),
            message: error.message.to_lowercase(),
        };
        self.rules.iter().find(|rule| rule.matcher.matches(&input))
    }

    /// Classify an error raised at `layer`/`component`
    pub fn classify(
        &self,
        error: &ErrorDescriptor,
        layer: &str,
        component: &str,
        context: Option<&ErrorContext>,
    ) -> ErrorClassification {
        match self.matching_rule(error, layer, component) {
            Some(rule) => {
                debug!(
                    rule = %rule.name,
                    layer,
                    component,
                    correlation_id = ?context.map(|c| c.correlation_id),
                    "Classified {} as {}",
                    error.type_name,
                    rule.classification.category
                );
                rule.classification.build()
            }
            None => {
                debug!(
                    layer,
                    component,
                    correlation_id = ?context.map(|c| c.correlation_id),
                    "No classification rule matched {}, using default",
                    error.type_name
                );
                ErrorClassification::unclassified()
            }
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared domain types for classification and recovery
//!
//! Everything the classifier produces and the engine threads through a
//! recovery attempt lives here: the error taxonomy, the frozen
//! classification record, the per-invocation context and the call site.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Error categories driving notification routing and analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Authorization,
    Validation,
    Database,
    ExternalService,
    System,
    BusinessLogic,
    Configuration,
    Resource,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Database => "database",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::System => "system",
            ErrorCategory::BusinessLogic => "business_logic",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Resource => "resource",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a classified error, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Debug => "debug",
            ErrorSeverity::Info => "info",
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery strategy selected by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    CircuitBreaker,
    Escalate,
    Ignore,
    ManualIntervention,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::CircuitBreaker => "circuit_breaker",
            RecoveryStrategy::Escalate => "escalate",
            RecoveryStrategy::Ignore => "ignore",
            RecoveryStrategy::ManualIntervention => "manual_intervention",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frozen decision record produced by the classifier
///
/// Produced fresh for every classification. Only its field values are ever
/// persisted, embedded in the error record metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub is_recoverable: bool,
    pub recovery_strategy: RecoveryStrategy,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub circuit_breaker_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub circuit_breaker_timeout: Duration,
}

impl ErrorClassification {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
    pub const DEFAULT_CIRCUIT_BREAKER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Classification with default strategy parameters
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
            max_retries: Self::DEFAULT_MAX_RETRIES,
            base_delay: Self::DEFAULT_BASE_DELAY,
            backoff_multiplier: Self::DEFAULT_BACKOFF_MULTIPLIER,
            circuit_breaker_threshold: Self::DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_timeout: Self::DEFAULT_CIRCUIT_BREAKER_TIMEOUT,
        }
    }

    /// Used when no rule matches
    pub fn unclassified() -> Self {
        Self::new(
            ErrorCategory::System,
            ErrorSeverity::Error,
            false,
            RecoveryStrategy::Escalate,
        )
    }
}

/// Classifier input: the type name and message of a raised error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub type_name: String,
    pub message: String,
    /// Rendered `source()` chain, outermost first
    pub stack_trace: Option<String>,
}

impl ErrorDescriptor {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Describe any error value by its static type and display output
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        Self {
            type_name: short_type_name(std::any::type_name::<E>()).to_string(),
            message: error.to_string(),
            stack_trace: if chain.is_empty() {
                None
            } else {
                Some(chain.join("\n"))
            },
        }
    }
}

/// `my_crate::net::FetchError<T>` becomes `FetchError`
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Per-invocation context threaded through classification, recording and
/// escalation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub correlation_id: Uuid,
    pub user_id: Option<String>,
    pub request_path: Option<String>,
    pub request_method: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    /// New context with a fresh correlation id
    pub fn new() -> Self {
        Self::with_correlation_id(Uuid::new_v4())
    }

    pub fn with_correlation_id(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            user_id: None,
            request_path: None,
            request_method: None,
            ip_address: None,
            user_agent: None,
            metadata: HashMap::new(),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn request(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.request_method = Some(method.into());
        self.request_path = Some(path.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a failing operation lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    pub layer: String,
    pub component: String,
    pub operation: String,
}

impl CallSite {
    pub fn new(
        layer: impl Into<String>,
        component: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            layer: layer.into(),
            component: component.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}::{}", self.layer, self.component, self.operation)
    }
}

/// Successful outcome of a recovery attempt
///
/// The error that propagates when recovery does not succeed travels in the
/// `Err` side of the surrounding `Result`.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery<T> {
    /// A strategy produced a usable value
    Recovered(T),
    /// The error was absorbed without producing a value
    Ignored,
}

impl<T> Recovery<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Recovery::Recovered(value) => Some(value),
            Recovery::Ignored => None,
        }
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, Recovery::Recovered(_))
    }
}

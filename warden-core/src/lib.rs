//! Error classification and recovery engine
//!
//! Warden turns a failed operation into a decision: classify the error,
//! record it, then retry, fall back, trip a circuit breaker, escalate,
//! ignore it, or ask for manual intervention.
//!
//! ```no_run
//! use serde_json::Value;
//! use warden_core::{CallSite, Config, ErrorRecoveryEngine, RecoveryOverrides};
//!
//! # async fn fetch() -> Result<u32, std::io::Error> { Ok(1) }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ErrorRecoveryEngine::new(Config::default())?;
//! let site = CallSite::new("api", "inventory_client", "fetch");
//! let value = engine
//!     .protect(&site, None, Value::Null, &RecoveryOverrides::default(), fetch)
//!     .await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod retry;
pub mod sink;
pub mod store;
pub mod types;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitBreakerState,
    CircuitBreakerStatus,
};
pub use classifier::{default_rules, ClassificationRule, ClassificationTemplate, ErrorClassifier, RuleMatcher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigBuilder};
pub use engine::{EngineBuilder, ErrorRecoveryEngine, RecoveryOverrides, ERROR_FALLBACK_OPERATION};
pub use error::{BoxError, WardenError, WardenResult};
pub use escalation::{
    notification_fn, EscalationConfig, EscalationLevel, EscalationManager, EscalationPayload,
    NotificationHandler, TracingNotifier,
};
pub use fallback::{fallback_fn, Fallback, FallbackHandler, FallbackOutcome, FallbackRequest};
pub use health::{HealthConfig, HealthStatus, SystemHealth};
pub use metrics::{MetricsSnapshot, RecoveryMetrics};
pub use retry::RetryHandler;
pub use sink::{ErrorQuery, ErrorRecord, ErrorSink, InMemoryErrorSink, NewErrorRecord, RequestMetadata};
pub use store::{InMemoryStateStore, StateStore};
pub use types::{
    CallSite, ErrorCategory, ErrorClassification, ErrorContext, ErrorDescriptor, ErrorSeverity,
    Recovery, RecoveryStrategy,
};

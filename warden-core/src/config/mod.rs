//! Configuration management with TOML support
//!
//! This module provides the engine configuration:
//! - Loads from TOML files
//! - Supports environment variable overrides
//! - Validates configuration values
//!
//! # Example Configuration
//!
//! ```toml
//! [retry]
//! max_delay = "60s"
//!
//! [circuit_breaker]
//! failure_ttl = "5m"
//! recovery_timeout = "30s"
//!
//! [escalation]
//! pattern_window = "15m"
//! medium_threshold = 3
//! high_threshold = 5
//!
//! [health]
//! window = "1h"
//! critical_penalty = 20
//! critical_penalty_cap = 80
//! error_penalty = 5
//! error_penalty_cap = 20
//!
//! # Replaces the built-in rule table when present
//! [[classifier.rules]]
//! name = "payments"
//! matcher = { component_keywords = ["payment"] }
//! classification = { category = "external_service", severity = "error", is_recoverable = true, recovery_strategy = "fallback" }
//!
//! [observability.logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! Environment overrides: `WARDEN_LOG_LEVEL`, `WARDEN_RETRY_MAX_DELAY_SECS`,
//! `WARDEN_FAILURE_TTL_SECS`, `WARDEN_PATTERN_WINDOW_SECS`.

pub mod core;
pub mod observability;
pub mod recovery;

pub use self::core::{Config, ConfigBuilder};
pub use observability::{LogFormat, LoggingConfig, ObservabilityConfig};
pub use recovery::{CircuitBreakerSettings, ClassifierConfig, RetryConfig};

//! Circuit Breaker Pattern for Fault Tolerance
//!
//! The circuit breaker stops the engine from hammering a component that keeps
//! failing and probes for recovery after a cooldown.
//!
//! ## Pattern Implementation
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, failures are counted
//! - **Open**: Failing fast, callers go straight to fallbacks
//! - **Half-Open**: Cooldown elapsed, the next outcome decides
//!
//! ```text
//! closed --failures >= threshold--> open --timeout elapsed--> half_open
//!    ^                               ^                           |
//!    |                               +---------failure-----------+
//!    +----------------------------success------------------------+
//! ```
//!
//! ## Shared state
//!
//! State is not held in the breaker itself: it lives in a [`StateStore`]
//! under three keys per component, so every breaker instance for the same
//! component (in this process or another one sharing the store) sees the
//! same circuit. The failure counter is advanced with the store's atomic
//! increment and ages out after `failure_ttl`.
//!
//! The open → half-open transition is lazy: it happens on the first
//! [`CircuitBreaker::is_open`] call after the timeout, however late that call
//! comes, and every caller that observes the transition window is let
//! through. The open markers carry no TTL for that reason. Entering
//! half-open clears the failure counter and `opened_at`; a half-open marker
//! that sees no outcome within `recovery_timeout` expires, leaving a clean
//! closed circuit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{to_chrono, Clock};
use crate::error::{WardenError, WardenResult};
use crate::store::StateStore;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Normal operation
    Closed,
    /// Failing fast
    Open,
    /// Cooldown elapsed, waiting for the next outcome
    HalfOpen,
}

impl CircuitBreakerState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerState::Closed => "closed",
            CircuitBreakerState::Open => "open",
            CircuitBreakerState::HalfOpen => "half_open",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "closed" => Some(CircuitBreakerState::Closed),
            "open" => Some(CircuitBreakerState::Open),
            "half_open" => Some(CircuitBreakerState::HalfOpen),
            _ => None,
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to stay open before the next check moves to half-open
    pub timeout: Duration,
    /// How long half-open waits for an outcome before lapsing to closed
    pub recovery_timeout: Duration,
    /// Lifetime of the failure counter since the last failure
    pub failure_ttl: Duration,
    /// Enable logging of state transitions
    pub enable_logging: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            failure_ttl: Duration::from_secs(300),
            enable_logging: true,
        }
    }
}

/// Observability snapshot of one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub component: String,
    pub state: CircuitBreakerState,
    pub failures: u32,
    pub failure_threshold: u32,
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Store keys for one component
#[derive(Debug, Clone)]
struct StateKeys {
    state: String,
    failures: String,
    opened_at: String,
}

impl StateKeys {
    fn new(component: &str) -> Self {
        Self {
            state: format!("circuit_breaker:{}:state", component),
            failures: format!("circuit_breaker:{}:failures", component),
            opened_at: format!("circuit_breaker:{}:opened_at", component),
        }
    }
}

/// Per-component circuit breaker backed by a shared [`StateStore`]
#[derive(Clone)]
pub struct CircuitBreaker {
    component: String,
    config: CircuitBreakerConfig,
    keys: StateKeys,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("component", &self.component)
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a circuit breaker for `component`
    pub fn new(
        component: impl Into<String>,
        config: CircuitBreakerConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let component = component.into();
        Self {
            keys: StateKeys::new(&component),
            component,
            config,
            store,
            clock,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    async fn read_state(&self) -> WardenResult<CircuitBreakerState> {
        let state = self
            .store
            .get(&self.keys.state)
            .await?
            .and_then(|v| v.as_str().and_then(CircuitBreakerState::parse))
            .unwrap_or(CircuitBreakerState::Closed);
        Ok(state)
    }

    async fn read_opened_at(&self) -> WardenResult<Option<DateTime<Utc>>> {
        let Some(value) = self.store.get(&self.keys.opened_at).await? else {
            return Ok(None);
        };
        let raw = value.as_str().ok_or_else(|| {
            WardenError::invalid_input(&self.keys.opened_at, "expected an RFC 3339 timestamp")
        })?;
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| WardenError::serialization("parse opened_at", e))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    async fn read_failures(&self) -> WardenResult<u32> {
        let failures = self
            .store
            .get(&self.keys.failures)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(u32::try_from(failures).unwrap_or(u32::MAX))
    }

    async fn open(&self) -> WardenResult<()> {
        self.store
            .set(
                &self.keys.opened_at,
                Value::from(self.clock.now().to_rfc3339()),
                None,
            )
            .await?;
        self.store
            .set(
                &self.keys.state,
                Value::from(CircuitBreakerState::Open.as_str()),
                None,
            )
            .await
    }

    async fn half_open(&self) -> WardenResult<()> {
        self.store.delete(&self.keys.failures).await?;
        self.store.delete(&self.keys.opened_at).await?;
        self.store
            .set(
                &self.keys.state,
                Value::from(CircuitBreakerState::HalfOpen.as_str()),
                Some(self.config.recovery_timeout),
            )
            .await
    }

    async fn close(&self) -> WardenResult<()> {
        self.store.delete(&self.keys.state).await?;
        self.store.delete(&self.keys.failures).await?;
        self.store.delete(&self.keys.opened_at).await
    }

    /// Whether callers should skip the component
    ///
    /// An open circuit whose timeout has elapsed moves to half-open here and
    /// reports `false`.
    pub async fn is_open(&self) -> WardenResult<bool> {
        if self.read_state().await? != CircuitBreakerState::Open {
            return Ok(false);
        }

        if let Some(opened_at) = self.read_opened_at().await? {
            if self.clock.now() - opened_at > to_chrono(self.config.timeout) {
                self.half_open().await?;
                if self.config.enable_logging {
                    info!("Circuit breaker '{}' transitioning to half-open", self.component);
                }
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub async fn is_half_open(&self) -> WardenResult<bool> {
        Ok(self.read_state().await? == CircuitBreakerState::HalfOpen)
    }

    /// Current state without triggering the lazy half-open transition
    pub async fn state(&self) -> WardenResult<CircuitBreakerState> {
        self.read_state().await
    }

    /// Record a successful call
    pub async fn record_success(&self) -> WardenResult<()> {
        if self.is_half_open().await? {
            self.close().await?;
            if self.config.enable_logging {
                info!("Circuit breaker '{}' closing after successful probe", self.component);
            }
        } else {
            self.store
                .set(&self.keys.failures, Value::from(0), Some(self.config.failure_ttl))
                .await?;
        }
        Ok(())
    }

    /// Record a failed call
    ///
    /// Returns `true` when this call opened the circuit. On the counter path
    /// only the caller whose increment reaches the threshold opens it.
    pub async fn record_failure(&self) -> WardenResult<bool> {
        if self.is_half_open().await? {
            self.open().await?;
            if self.config.enable_logging {
                warn!(
                    "Circuit breaker '{}' reopening after failure in half-open state",
                    self.component
                );
            }
            return Ok(true);
        }

        let failures = self
            .store
            .increment(&self.keys.failures, self.config.failure_ttl)
            .await?;
        debug!(
            "Circuit breaker '{}': failure {}/{}",
            self.component, failures, self.config.failure_threshold
        );

        let threshold = i64::from(self.config.failure_threshold);
        let opens = failures == threshold
            || (failures > threshold && self.read_state().await? == CircuitBreakerState::Closed);
        if !opens {
            return Ok(false);
        }

        self.open().await?;
        if self.config.enable_logging {
            warn!(
                "Circuit breaker '{}' opening after {} failures",
                self.component, failures
            );
        }
        Ok(true)
    }

    /// Operator/test utility: count a failure as if a call had failed
    pub async fn force_failure(&self) -> WardenResult<bool> {
        if self.config.enable_logging {
            warn!("Circuit breaker '{}' failure forced", self.component);
        }
        self.record_failure().await
    }

    /// Clear all state for the component, closing the circuit
    pub async fn reset(&self) -> WardenResult<()> {
        self.close().await?;
        if self.config.enable_logging {
            info!("Circuit breaker '{}' reset", self.component);
        }
        Ok(())
    }

    /// Snapshot for observability
    pub async fn get_status(&self) -> WardenResult<CircuitBreakerStatus> {
        Ok(CircuitBreakerStatus {
            component: self.component.clone(),
            state: self.read_state().await?,
            failures: self.read_failures().await?,
            failure_threshold: self.config.failure_threshold,
            opened_at: self.read_opened_at().await?,
            timeout: self.config.timeout,
        })
    }
}

/// Circuit breaker builder for easier configuration
pub struct CircuitBreakerBuilder {
    component: String,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerBuilder {
    /// Create a new circuit breaker builder
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            config: CircuitBreakerConfig::default(),
        }
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the open-state timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the recovery timeout
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Set the failure counter lifetime
    pub fn failure_ttl(mut self, ttl: Duration) -> Self {
        self.config.failure_ttl = ttl;
        self
    }

    /// Enable or disable logging
    pub fn enable_logging(mut self, enable: bool) -> Self {
        self.config.enable_logging = enable;
        self
    }

    /// Build the circuit breaker
    pub fn build(self, store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> CircuitBreaker {
        CircuitBreaker::new(self.component, self.config, store, clock)
    }
}

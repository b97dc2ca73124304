//! Error recovery orchestration
//!
//! [`ErrorRecoveryEngine`] is the entry point callers use when an operation
//! fails. Every error goes through the same pipeline:
//!
//! ```text
//! classify --> persist record --> dispatch on recovery_strategy
//!                                   retry | circuit_breaker | fallback
//!                                   escalate | ignore | manual_intervention
//! ```
//!
//! The caller's error type is never wrapped. When nothing recovers, the
//! original error (or the last retry error) is handed back in `Err`.
//! Failures of the engine's own collaborators are logged, escalated, and
//! never replace the caller's error.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::{Future, Ready};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus};
use crate::classifier::ErrorClassifier;
use crate::clock::{to_chrono, Clock, SystemClock};
use crate::config::Config;
use crate::error::{WardenError, WardenResult};
use crate::escalation::{EscalationLevel, EscalationManager, NotificationHandler};
use crate::fallback::{Fallback, FallbackHandler, FallbackOutcome};
use crate::health::{count_by_severity, SystemHealth};
use crate::metrics::{names, RecoveryMetrics, RecoveryOutcome};
use crate::retry::RetryHandler;
use crate::sink::{ErrorQuery, ErrorRecord, ErrorSink, InMemoryErrorSink, NewErrorRecord, RequestMetadata};
use crate::store::{InMemoryStateStore, StateStore};
use crate::types::{
    CallSite, ErrorClassification, ErrorContext, ErrorDescriptor, Recovery, RecoveryStrategy,
};

/// Fallback operation name used by the circuit breaker strategy
pub const ERROR_FALLBACK_OPERATION: &str = "error_fallback";

/// Per-call replacements for the computed classification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryOverrides {
    pub strategy: Option<RecoveryStrategy>,
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_timeout: Option<Duration>,
}

impl RecoveryOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn circuit_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        self.circuit_breaker_threshold = Some(threshold);
        self.circuit_breaker_timeout = Some(timeout);
        self
    }

    pub fn apply(&self, classification: &mut ErrorClassification) {
        if let Some(strategy) = self.strategy {
            classification.recovery_strategy = strategy;
        }
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
    }
}

/// Result of running one strategy
enum Dispatch<T, E> {
    Recovered(T),
    Ignored,
    Propagate(E),
    /// The recovery machinery itself failed
    Failed { error: E, cause: WardenError },
}

/// The error record for the current call
struct HandledRecord {
    record: ErrorRecord,
    persisted: bool,
}

type NoOperation<T, E> = fn() -> Ready<Result<T, E>>;

/// Classifies errors and drives their recovery
pub struct ErrorRecoveryEngine {
    config: Config,
    classifier: ErrorClassifier,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    fallbacks: FallbackHandler,
    escalation: EscalationManager,
    sink: Arc<dyn ErrorSink>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    metrics: RecoveryMetrics,
}

impl ErrorRecoveryEngine {
    /// Engine with in-memory collaborators and the system clock
    pub fn new(config: Config) -> WardenResult<Self> {
        EngineBuilder::new().config(config).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &RecoveryMetrics {
        &self.metrics
    }

    pub fn fallbacks(&self) -> &FallbackHandler {
        &self.fallbacks
    }

    pub fn escalation(&self) -> &EscalationManager {
        &self.escalation
    }

    /// Classify without recording or recovering anything
    pub fn classify(
        &self,
        error: &ErrorDescriptor,
        layer: &str,
        component: &str,
    ) -> ErrorClassification {
        self.classifier.classify(error, layer, component, None)
    }

    pub fn register_fallback(
        &self,
        component: impl Into<String>,
        operation: impl Into<String>,
        fallback: Arc<dyn Fallback>,
        priority: i32,
    ) {
        self.fallbacks
            .register_fallback(component, operation, fallback, priority);
    }

    pub fn register_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        self.escalation.register_handler(handler);
    }

    /// Handle an error with no way to re-run the failed operation
    ///
    /// A `retry` classification therefore propagates the error.
    pub async fn handle_error<T, E>(
        &self,
        error: E,
        site: &CallSite,
        context: Option<&ErrorContext>,
        args: Value,
    ) -> Result<Recovery<T>, E>
    where
        T: DeserializeOwned,
        E: std::error::Error,
    {
        self.recover(
            error,
            site,
            context,
            args,
            &RecoveryOverrides::default(),
            None::<NoOperation<T, E>>,
        )
        .await
    }

    /// Handle an error, re-running `operation` if the strategy is `retry`
    pub async fn handle_error_with_retry<T, E, F, Fut>(
        &self,
        error: E,
        site: &CallSite,
        context: Option<&ErrorContext>,
        args: Value,
        operation: F,
    ) -> Result<Recovery<T>, E>
    where
        T: DeserializeOwned,
        E: std::error::Error,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.recover(
            error,
            site,
            context,
            args,
            &RecoveryOverrides::default(),
            Some(operation),
        )
        .await
    }

    /// Run `operation` and funnel its failure through the engine
    ///
    /// Returns `Ok(Some(value))` on success or recovery, `Ok(None)` when the
    /// error was ignored.
    pub async fn protect<T, E, F, Fut>(
        &self,
        site: &CallSite,
        context: Option<&ErrorContext>,
        args: Value,
        overrides: &RecoveryOverrides,
        mut operation: F,
    ) -> Result<Option<T>, E>
    where
        T: DeserializeOwned,
        E: std::error::Error,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match operation().await {
            Ok(value) => Ok(Some(value)),
            Err(error) => self
                .recover(error, site, context, args, overrides, Some(operation))
                .await
                .map(Recovery::into_value),
        }
    }

    async fn recover<T, E, F, Fut>(
        &self,
        error: E,
        site: &CallSite,
        context: Option<&ErrorContext>,
        args: Value,
        overrides: &RecoveryOverrides,
        operation: Option<F>,
    ) -> Result<Recovery<T>, E>
    where
        T: DeserializeOwned,
        E: std::error::Error,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let descriptor = ErrorDescriptor::from_error(&error);
        let mut classification =
            self.classifier
                .classify(&descriptor, &site.layer, &site.component, context);
        overrides.apply(&mut classification);
        self.metrics.record_classified(classification.category);

        let strategy = classification.recovery_strategy;
        let correlation_id = context.map(|c| c.correlation_id);
        info!(
            site = %site,
            category = %classification.category,
            strategy = %strategy,
            correlation_id = ?correlation_id,
            "Handling {}: {}",
            descriptor.type_name,
            descriptor.message
        );

        let handled = self
            .persist(&descriptor, &classification, site, context)
            .await;

        let dispatch = match strategy {
            RecoveryStrategy::Retry => {
                self.run_retry(error, &classification, site, operation)
                    .await
            }
            RecoveryStrategy::CircuitBreaker => {
                self.run_circuit_breaker(error, &classification, site, args, context)
                    .await
            }
            RecoveryStrategy::Fallback => {
                self.run_fallback(error, &site.component, &site.operation, args, context)
                    .await
            }
            RecoveryStrategy::Escalate => {
                self.escalate(&handled.record, &classification, context)
                    .await;
                Dispatch::Propagate(error)
            }
            RecoveryStrategy::Ignore => {
                info!(
                    site = %site,
                    correlation_id = ?correlation_id,
                    "Ignoring {}: {}",
                    descriptor.type_name,
                    descriptor.message
                );
                Dispatch::Ignored
            }
            RecoveryStrategy::ManualIntervention => {
                self.request_manual_intervention(&handled, &classification, site, context)
                    .await;
                Dispatch::Propagate(error)
            }
        };

        let result = match dispatch {
            Dispatch::Recovered(value) => {
                self.metrics
                    .record_recovery(strategy, RecoveryOutcome::Recovered);
                if handled.persisted {
                    if let Err(e) = self.sink.mark_resolved(handled.record.id).await {
                        warn!("Failed to mark error {} resolved: {}", handled.record.id, e);
                    }
                }
                info!(site = %site, strategy = %strategy, "Recovered from {}", descriptor.type_name);
                Ok(Recovery::Recovered(value))
            }
            Dispatch::Ignored => {
                self.metrics.record_recovery(strategy, RecoveryOutcome::Ignored);
                Ok(Recovery::Ignored)
            }
            Dispatch::Propagate(error) => {
                self.metrics
                    .record_recovery(strategy, RecoveryOutcome::Propagated);
                if !classification.is_recoverable
                    && !matches!(
                        strategy,
                        RecoveryStrategy::Escalate | RecoveryStrategy::ManualIntervention
                    )
                {
                    self.escalate(&handled.record, &classification, context)
                        .await;
                }
                debug!(site = %site, strategy = %strategy, "Propagating {}", descriptor.type_name);
                Err(error)
            }
            Dispatch::Failed { error, cause } => {
                self.metrics
                    .record_recovery(strategy, RecoveryOutcome::Propagated);
                self.metrics
                    .increment_counter(names::RECOVERY_MACHINERY_FAILURES);
                error!(
                    site = %site,
                    strategy = %strategy,
                    correlation_id = ?correlation_id,
                    collaborator = cause.is_collaborator_failure(),
                    "Recovery of {} failed: {}",
                    descriptor.type_name,
                    cause
                );
                self.escalate_recovery_failure(&handled.record, &classification, context)
                    .await;
                Err(error)
            }
        };

        self.metrics
            .record_duration(names::HANDLE_ERROR_DURATION, started.elapsed());
        result
    }

    /// Create the error record, falling back to an unsaved copy
    async fn persist(
        &self,
        descriptor: &ErrorDescriptor,
        classification: &ErrorClassification,
        site: &CallSite,
        context: Option<&ErrorContext>,
    ) -> HandledRecord {
        let new_record = NewErrorRecord {
            layer: site.layer.clone(),
            component: site.component.clone(),
            severity: classification.severity,
            error_type: descriptor.type_name.clone(),
            message: descriptor.message.clone(),
            stack_trace: descriptor.stack_trace.clone(),
            correlation_id: context.map_or_else(Uuid::new_v4, |c| c.correlation_id),
            user_id: context.and_then(|c| c.user_id.clone()),
            request: context.map(RequestMetadata::from_context).unwrap_or_default(),
            metadata: json!({
                "classification": classification,
                "operation": site.operation,
                "context": context.map(|c| &c.metadata),
            }),
        };

        match self.sink.create(new_record.clone()).await {
            Ok(record) => HandledRecord {
                record,
                persisted: true,
            },
            Err(e) => {
                self.metrics
                    .increment_counter(names::RECOVERY_MACHINERY_FAILURES);
                error!(site = %site, "Failed to persist error record: {}", e);
                HandledRecord {
                    record: ErrorRecord::unsaved(new_record, self.clock.now()),
                    persisted: false,
                }
            }
        }
    }

    async fn run_retry<T, E, F, Fut>(
        &self,
        error: E,
        classification: &ErrorClassification,
        site: &CallSite,
        operation: Option<F>,
    ) -> Dispatch<T, E>
    where
        E: std::error::Error,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(operation) = operation else {
            debug!(site = %site, "No operation to retry");
            return Dispatch::Propagate(error);
        };

        let handler = RetryHandler::from_classification(classification, self.config.retry.max_delay)
            .with_operation_name(site.to_string());
        match handler.execute_with_retry(operation).await {
            Ok(value) => Dispatch::Recovered(value),
            Err(last) => Dispatch::Propagate(last),
        }
    }

    async fn run_circuit_breaker<T, E>(
        &self,
        error: E,
        classification: &ErrorClassification,
        site: &CallSite,
        args: Value,
        context: Option<&ErrorContext>,
    ) -> Dispatch<T, E>
    where
        T: DeserializeOwned,
    {
        let breaker = self.breaker_for(
            &site.component,
            classification.circuit_breaker_threshold,
            classification.circuit_breaker_timeout,
        );

        match breaker.is_open().await {
            Ok(true) => {
                self.metrics
                    .increment_counter(names::CIRCUIT_BREAKER_SHORT_CIRCUITED);
                debug!("Circuit for '{}' is open, going to fallback", site.component);
            }
            Ok(false) => {
                if let Err(cause) = self.count_failure(&breaker).await {
                    return Dispatch::Failed { error, cause };
                }
            }
            Err(cause) => return Dispatch::Failed { error, cause },
        }

        self.run_fallback(error, &site.component, ERROR_FALLBACK_OPERATION, args, context)
            .await
    }

    async fn count_failure(&self, breaker: &CircuitBreaker) -> WardenResult<()> {
        if breaker.record_failure().await? {
            self.metrics
                .increment_counter(names::CIRCUIT_BREAKER_OPENED);
        }
        Ok(())
    }

    async fn run_fallback<T, E>(
        &self,
        error: E,
        component: &str,
        operation: &str,
        args: Value,
        context: Option<&ErrorContext>,
    ) -> Dispatch<T, E>
    where
        T: DeserializeOwned,
    {
        match self
            .fallbacks
            .execute_fallback(component, operation, args, context)
            .await
        {
            FallbackOutcome::Recovered {
                value, fallback, ..
            } => match serde_json::from_value(value) {
                Ok(value) => Dispatch::Recovered(value),
                Err(e) => Dispatch::Failed {
                    error,
                    cause: WardenError::serialization(
                        format!("convert value from fallback '{}'", fallback),
                        e,
                    ),
                },
            },
            FallbackOutcome::NotRecovered { .. } => Dispatch::Propagate(error),
        }
    }

    async fn request_manual_intervention(
        &self,
        handled: &HandledRecord,
        classification: &ErrorClassification,
        site: &CallSite,
        context: Option<&ErrorContext>,
    ) {
        if handled.persisted {
            if let Err(e) = self.sink.mark_manual_review(handled.record.id).await {
                error!(
                    "Failed to flag error {} for manual review: {}",
                    handled.record.id, e
                );
            }
        }

        let delivered = self
            .escalation
            .escalate_with_level(
                &handled.record,
                classification,
                EscalationLevel::High,
                context,
            )
            .await;
        self.metrics.record_escalation(EscalationLevel::High);

        error!(
            critical = true,
            site = %site,
            record_id = %handled.record.id,
            handlers_notified = delivered,
            "Manual intervention required: {}",
            handled.record.message
        );
    }

    async fn escalate(
        &self,
        record: &ErrorRecord,
        classification: &ErrorClassification,
        context: Option<&ErrorContext>,
    ) {
        match self
            .escalation
            .escalate_error(record, classification, context)
            .await
        {
            Ok(EscalationLevel::None) => {}
            Ok(level) => self.metrics.record_escalation(level),
            Err(e) => {
                self.metrics
                    .increment_counter(names::RECOVERY_MACHINERY_FAILURES);
                error!("Failed to escalate error {}: {}", record.id, e);
            }
        }
    }

    /// A broken recovery is reported at `medium` or above
    async fn escalate_recovery_failure(
        &self,
        record: &ErrorRecord,
        classification: &ErrorClassification,
        context: Option<&ErrorContext>,
    ) {
        let level = match self.escalation.determine_level(record, classification).await {
            Ok(level) => level.max(EscalationLevel::Medium),
            Err(e) => {
                warn!("Pattern lookup for error {} failed: {}", record.id, e);
                EscalationLevel::Medium
            }
        };
        self.escalation
            .escalate_with_level(record, classification, level, context)
            .await;
        self.metrics.record_escalation(level);
    }

    /// Registered breaker for `component`, created on first use
    fn breaker_for(&self, component: &str, threshold: u32, timeout: Duration) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(component.to_string())
            .or_insert_with(|| {
                debug!("Creating circuit breaker for '{}'", component);
                Arc::new(self.new_breaker(component, threshold, timeout))
            })
            .value()
            .clone()
    }

    fn new_breaker(&self, component: &str, threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            component,
            self.config
                .circuit_breaker
                .breaker_config(threshold, timeout),
            self.store.clone(),
            self.clock.clone(),
        )
    }

    /// Registered breaker, or a default-configured view of the stored state
    fn breaker_view(&self, component: &str) -> Arc<CircuitBreaker> {
        match self.breakers.get(component) {
            Some(breaker) => breaker.value().clone(),
            None => Arc::new(self.new_breaker(
                component,
                ErrorClassification::DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
                ErrorClassification::DEFAULT_CIRCUIT_BREAKER_TIMEOUT,
            )),
        }
    }

    pub async fn circuit_breaker_status(&self, component: &str) -> WardenResult<CircuitBreakerStatus> {
        self.breaker_view(component).get_status().await
    }

    /// Status of every breaker created by this engine
    pub async fn all_circuit_breaker_statuses(
        &self,
    ) -> WardenResult<BTreeMap<String, CircuitBreakerStatus>> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();

        let mut statuses = BTreeMap::new();
        for breaker in breakers {
            statuses.insert(breaker.component().to_string(), breaker.get_status().await?);
        }
        Ok(statuses)
    }

    pub async fn reset_circuit_breaker(&self, component: &str) -> WardenResult<()> {
        self.breaker_view(component).reset().await
    }

    pub async fn force_circuit_breaker_failure(&self, component: &str) -> WardenResult<()> {
        let breaker = self.breaker_for(
            component,
            ErrorClassification::DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            ErrorClassification::DEFAULT_CIRCUIT_BREAKER_TIMEOUT,
        );
        if breaker.force_failure().await? {
            self.metrics
                .increment_counter(names::CIRCUIT_BREAKER_OPENED);
        }
        Ok(())
    }

    /// Score recent errors and collect breaker states
    pub async fn get_system_health(&self) -> WardenResult<SystemHealth> {
        let now = self.clock.now();
        let since = now - to_chrono(self.config.health.window);
        let records = self.sink.query(&ErrorQuery::new().since(since)).await?;
        let recent_errors = count_by_severity(&records);
        let circuit_breakers = self
            .all_circuit_breaker_statuses()
            .await?
            .into_values()
            .collect();

        let health = SystemHealth::new(recent_errors, circuit_breakers, &self.config.health, now);
        debug!(
            "System health {} ({})",
            health.health_score, health.health_status
        );
        Ok(health)
    }
}

impl std::fmt::Debug for ErrorRecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecoveryEngine")
            .field("rules", &self.classifier.rules().len())
            .field("breakers", &self.breakers.len())
            .field("fallbacks", &self.fallbacks)
            .field("escalation", &self.escalation)
            .finish()
    }
}

/// Builder wiring the engine's collaborators
#[derive(Default)]
pub struct EngineBuilder {
    config: Config,
    classifier: Option<ErrorClassifier>,
    store: Option<Arc<dyn StateStore>>,
    sink: Option<Arc<dyn ErrorSink>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<RecoveryMetrics>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Override the classifier built from the configuration
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: RecoveryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> WardenResult<ErrorRecoveryEngine> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::with_clock(clock.clone())));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(InMemoryErrorSink::with_clock(clock.clone())));
        let classifier = self
            .classifier
            .unwrap_or_else(|| self.config.classifier());
        let escalation =
            EscalationManager::new(self.config.escalation.clone(), sink.clone(), clock.clone());

        Ok(ErrorRecoveryEngine {
            classifier,
            breakers: DashMap::new(),
            fallbacks: FallbackHandler::new(),
            escalation,
            sink,
            store,
            clock,
            metrics: self.metrics.unwrap_or_default(),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerState;
    use crate::clock::ManualClock;
    use crate::escalation::notification_fn;
    use crate::fallback::fallback_fn;
    use crate::types::{ErrorCategory, ErrorSeverity};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    #[error("{0}")]
    struct ServiceError(String);

    fn err(message: &str) -> ServiceError {
        ServiceError(message.to_string())
    }

    struct Harness {
        engine: ErrorRecoveryEngine,
        sink: Arc<InMemoryErrorSink>,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let clock = ManualClock::starting_now();
        let sink = Arc::new(InMemoryErrorSink::with_clock(Arc::new(clock.clone())));
        let engine = ErrorRecoveryEngine::builder()
            .clock(Arc::new(clock.clone()))
            .error_sink(sink.clone())
            .build()
            .unwrap();
        Harness {
            engine,
            sink,
            clock,
        }
    }

    #[tokio::test]
    async fn test_ignore_absorbs_error() {
        let h = harness();
        let site = CallSite::new("api", "search", "query");
        let overrides = RecoveryOverrides::new().strategy(RecoveryStrategy::Ignore);

        let result: Result<Option<u32>, ServiceError> = h
            .engine
            .protect(&site, None, Value::Null, &overrides, || async {
                Err(err("noisy"))
            })
            .await;

        assert_eq!(result, Ok(None));
        assert_eq!(h.sink.len(), 1);
        assert_eq!(h.engine.metrics().get_counter("recovery.ignore.ignored"), 1);
    }

    #[tokio::test]
    async fn test_retry_without_operation_propagates_original() {
        let h = harness();
        let site = CallSite::new("api", "external_service", "fetch");
        let result: Result<Recovery<u32>, ServiceError> = h
            .engine
            .handle_error(err("Connection timeout"), &site, None, Value::Null)
            .await;
        assert_eq!(result, Err(err("Connection timeout")));
    }

    #[tokio::test]
    async fn test_record_embeds_classification_and_is_resolved_on_recovery() {
        let h = harness();
        h.engine.register_fallback(
            "profile",
            "load",
            fallback_fn("cached", |_req| async { Ok(json!("cached profile")) }),
            1,
        );
        let site = CallSite::new("service", "profile", "load");
        let overrides = RecoveryOverrides::new().strategy(RecoveryStrategy::Fallback);
        let context = ErrorContext::new().user("u-1").request("GET", "/profile");

        let result: Result<Option<String>, ServiceError> = h
            .engine
            .protect(&site, Some(&context), Value::Null, &overrides, || async {
                Err(err("profile store offline"))
            })
            .await;
        assert_eq!(result, Ok(Some("cached profile".to_string())));

        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.resolved);
        assert_eq!(record.error_type, "ServiceError");
        assert_eq!(record.correlation_id, context.correlation_id);
        assert_eq!(record.user_id.as_deref(), Some("u-1"));
        assert_eq!(record.request.path.as_deref(), Some("/profile"));
        assert_eq!(record.metadata["operation"], "load");
        assert_eq!(record.metadata["classification"]["recovery_strategy"], "fallback");
    }

    #[tokio::test]
    async fn test_fallback_value_of_wrong_shape_escalates_original() {
        let h = harness();
        let notified = Arc::new(AtomicU32::new(0));
        let n = notified.clone();
        h.engine
            .register_notification_handler(notification_fn("pager", move |payload| {
                let n = n.clone();
                async move {
                    assert!(payload.escalation_level >= EscalationLevel::Medium);
                    n.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        h.engine.register_fallback(
            "profile",
            "load",
            fallback_fn("bad", |_req| async { Ok(json!({"not": "a number"})) }),
            1,
        );

        let site = CallSite::new("service", "profile", "load");
        let overrides = RecoveryOverrides::new().strategy(RecoveryStrategy::Fallback);
        let result: Result<Option<u64>, ServiceError> = h
            .engine
            .protect(&site, None, Value::Null, &overrides, || async {
                Err(err("profile store offline"))
            })
            .await;

        assert_eq!(result, Err(err("profile store offline")));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.engine
                .metrics()
                .get_counter(names::RECOVERY_MACHINERY_FAILURES),
            1
        );
    }

    #[tokio::test]
    async fn test_overrides_change_retry_budget() {
        let h = harness();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let site = CallSite::new("api", "external_service", "fetch");
        let overrides = RecoveryOverrides::new()
            .max_retries(1)
            .base_delay(Duration::from_millis(1));

        let result: Result<Option<u32>, ServiceError> = h
            .engine
            .protect(&site, None, Value::Null, &overrides, || {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                async move { Err(err(&format!("Connection timeout #{}", attempt))) }
            })
            .await;

        // One protected call plus two retry attempts
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(err("Connection timeout #2")));
    }

    #[tokio::test]
    async fn test_breaker_registry_creates_one_breaker_per_component() {
        let h = Arc::new(harness());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                h.engine.force_circuit_breaker_failure("ledger").await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(h.engine.breakers.len(), 1);
        let status = h.engine.circuit_breaker_status("ledger").await.unwrap();
        assert_eq!(status.state, CircuitBreakerState::Open);
        assert_eq!(
            h.engine.metrics().get_counter(names::CIRCUIT_BREAKER_OPENED),
            1
        );

        h.engine.reset_circuit_breaker("ledger").await.unwrap();
        let status = h.engine.circuit_breaker_status("ledger").await.unwrap();
        assert_eq!(status.state, CircuitBreakerState::Closed);
        assert_eq!(status.failures, 0);
    }

    #[tokio::test]
    async fn test_health_window_uses_clock() {
        let h = harness();
        let site = CallSite::new("database", "orders", "insert");
        for _ in 0..2 {
            let _: Result<Recovery<u32>, ServiceError> = h
                .engine
                .handle_error(err("deadlock detected"), &site, None, Value::Null)
                .await;
        }

        let health = h.engine.get_system_health().await.unwrap();
        assert_eq!(health.recent_errors.get(&ErrorSeverity::Critical), Some(&2));
        assert_eq!(health.health_score, 60);
        assert_eq!(health.circuit_breakers.len(), 1);

        h.clock.advance(Duration::from_secs(2 * 60 * 60));
        let health = h.engine.get_system_health().await.unwrap();
        assert_eq!(health.health_score, 100);
    }

    #[test]
    fn test_classify_is_exposed() {
        let h = harness();
        let classification = h.engine.classify(
            &ErrorDescriptor::new("Error", "unknown error"),
            "x",
            "y",
        );
        assert_eq!(classification.category, ErrorCategory::System);
        assert_eq!(classification.recovery_strategy, RecoveryStrategy::Escalate);
    }
}

//! Pattern-based error escalation
//!
//! The escalation manager decides how loudly to report an error:
//! - **Critical** severity always escalates at `critical`
//! - Repeats of the same `(layer, component, error_type)` inside the pattern
//!   window escalate at `medium` (3+) or `high` (5+)
//! - Remaining `error` severity escalates at `low`
//! - Anything else is not escalated
//!
//! Escalations fan out to every registered [`NotificationHandler`]. A
//! handler that fails is logged and does not stop the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{to_chrono, Clock};
use crate::error::{BoxError, WardenError, WardenResult};
use crate::sink::{ErrorQuery, ErrorRecord, ErrorSink};
use crate::types::{ErrorClassification, ErrorContext, ErrorSeverity};

/// How loudly an error is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl EscalationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationLevel::None => "none",
            EscalationLevel::Low => "low",
            EscalationLevel::Medium => "medium",
            EscalationLevel::High => "high",
            EscalationLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What notification handlers receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPayload {
    pub error_record: ErrorRecord,
    pub classification: ErrorClassification,
    pub escalation_level: EscalationLevel,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Receiver of escalations
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn notify(&self, payload: &EscalationPayload) -> Result<(), BoxError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "notification_handler"
    }
}

/// Handler that writes escalations to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationHandler for TracingNotifier {
    async fn notify(&self, payload: &EscalationPayload) -> Result<(), BoxError> {
        let record = &payload.error_record;
        match payload.escalation_level {
            EscalationLevel::Critical | EscalationLevel::High => error!(
                level = %payload.escalation_level,
                record_id = %record.id,
                "Escalated {} in {}/{}: {}",
                record.error_type,
                record.layer,
                record.component,
                record.message
            ),
            _ => warn!(
                level = %payload.escalation_level,
                record_id = %record.id,
                "Escalated {} in {}/{}: {}",
                record.error_type,
                record.layer,
                record.component,
                record.message
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// [`NotificationHandler`] built from an async closure
pub struct FnNotificationHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> NotificationHandler for FnNotificationHandler<F>
where
    F: Fn(EscalationPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn notify(&self, payload: &EscalationPayload) -> Result<(), BoxError> {
        (self.f)(payload.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap an async closure as a [`NotificationHandler`]
pub fn notification_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn NotificationHandler>
where
    F: Fn(EscalationPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(FnNotificationHandler {
        name: name.into(),
        f,
    })
}

/// Configuration for escalation decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// How far back repeated errors are counted
    #[serde(with = "humantime_serde")]
    pub pattern_window: Duration,
    /// Repeats needed for `medium`
    pub medium_threshold: usize,
    /// Repeats needed for `high`
    pub high_threshold: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            pattern_window: Duration::from_secs(15 * 60),
            medium_threshold: 3,
            high_threshold: 5,
        }
    }
}

/// Decides escalation levels and notifies handlers
pub struct EscalationManager {
    config: EscalationConfig,
    sink: Arc<dyn ErrorSink>,
    clock: Arc<dyn Clock>,
    handlers: RwLock<Vec<Arc<dyn NotificationHandler>>>,
}

impl EscalationManager {
    pub fn new(config: EscalationConfig, sink: Arc<dyn ErrorSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            sink,
            clock,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn register_handler(&self, handler: Arc<dyn NotificationHandler>) {
        debug!("Registering notification handler '{}'", handler.name());
        self.handlers.write().push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Work out the escalation level for a freshly recorded error
    pub async fn determine_level(
        &self,
        record: &ErrorRecord,
        classification: &ErrorClassification,
    ) -> WardenResult<EscalationLevel> {
        if classification.severity == ErrorSeverity::Critical {
            return Ok(EscalationLevel::Critical);
        }

        let since = self.clock.now() - to_chrono(self.config.pattern_window);
        let query = ErrorQuery::new()
            .layer(&record.layer)
            .component(&record.component)
            .error_type(&record.error_type)
            .since(since);
        let repeats = self.sink.query(&query).await?.len();

        let level = if repeats >= self.config.high_threshold {
            EscalationLevel::High
        } else if repeats >= self.config.medium_threshold {
            EscalationLevel::Medium
        } else if classification.severity == ErrorSeverity::Error {
            EscalationLevel::Low
        } else {
            EscalationLevel::None
        };

        debug!(
            "{} repeats of {} in {}/{} within {:?}: level {}",
            repeats, record.error_type, record.layer, record.component, self.config.pattern_window, level
        );
        Ok(level)
    }

    /// Decide the level and notify handlers when it is not `none`
    pub async fn escalate_error(
        &self,
        record: &ErrorRecord,
        classification: &ErrorClassification,
        context: Option<&ErrorContext>,
    ) -> WardenResult<EscalationLevel> {
        let level = self.determine_level(record, classification).await?;
        if level == EscalationLevel::None {
            debug!("Error {} not escalated", record.id);
            return Ok(level);
        }
        self.notify_handlers(record, classification, level, context).await;
        Ok(level)
    }

    /// Notify handlers at a fixed level, skipping pattern detection
    pub async fn escalate_with_level(
        &self,
        record: &ErrorRecord,
        classification: &ErrorClassification,
        level: EscalationLevel,
        context: Option<&ErrorContext>,
    ) -> usize {
        if level == EscalationLevel::None {
            return 0;
        }
        self.notify_handlers(record, classification, level, context).await
    }

    /// Returns how many handlers succeeded
    async fn notify_handlers(
        &self,
        record: &ErrorRecord,
        classification: &ErrorClassification,
        level: EscalationLevel,
        context: Option<&ErrorContext>,
    ) -> usize {
        let payload = EscalationPayload {
            error_record: record.clone(),
            classification: classification.clone(),
            escalation_level: level,
            timestamp: self.clock.now(),
            correlation_id: context.map(|c| c.correlation_id),
        };

        let handlers: Vec<_> = self.handlers.read().clone();
        info!(
            "Escalating error {} at level {} to {} handlers",
            record.id,
            level,
            handlers.len()
        );

        let mut delivered = 0;
        for handler in handlers {
            match handler.notify(&payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    let failure = WardenError::notification(handler.name(), e.to_string());
                    error!(record_id = %record.id, "{}", failure);
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for EscalationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationManager")
            .field("config", &self.config)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sink::{InMemoryErrorSink, NewErrorRecord, RequestMetadata};
    use crate::types::{ErrorCategory, RecoveryStrategy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    struct Fixture {
        manager: EscalationManager,
        sink: Arc<InMemoryErrorSink>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let sink = Arc::new(InMemoryErrorSink::with_clock(Arc::new(clock.clone())));
        let manager = EscalationManager::new(
            EscalationConfig::default(),
            sink.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            manager,
            sink,
            clock,
        }
    }

    async fn record(sink: &InMemoryErrorSink, component: &str) -> ErrorRecord {
        sink.create(NewErrorRecord {
            layer: "api".to_string(),
            component: component.to_string(),
            severity: ErrorSeverity::Warning,
            error_type: "FetchError".to_string(),
            message: "upstream hiccup".to_string(),
            stack_trace: None,
            correlation_id: Uuid::new_v4(),
            user_id: None,
            request: RequestMetadata::default(),
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap()
    }

    fn classification(severity: ErrorSeverity) -> ErrorClassification {
        ErrorClassification::new(ErrorCategory::Network, severity, true, RecoveryStrategy::Retry)
    }

    fn counting_handler(name: &str, calls: Arc<AtomicU32>) -> Arc<dyn NotificationHandler> {
        notification_fn(name, move |_payload| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_five_repeats_escalate_high_and_notify_each_handler_once() {
        let f = fixture();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        f.manager.register_handler(counting_handler("a", a.clone()));
        f.manager.register_handler(counting_handler("b", b.clone()));

        let mut last = None;
        for _ in 0..5 {
            last = Some(record(&f.sink, "search").await);
        }

        let level = f
            .manager
            .escalate_error(&last.unwrap(), &classification(ErrorSeverity::Warning), None)
            .await
            .unwrap();

        assert_eq!(level, EscalationLevel::High);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_three_repeats_escalate_medium() {
        let f = fixture();
        let mut last = None;
        for _ in 0..3 {
            last = Some(record(&f.sink, "search").await);
        }
        let level = f
            .manager
            .determine_level(&last.unwrap(), &classification(ErrorSeverity::Warning))
            .await
            .unwrap();
        assert_eq!(level, EscalationLevel::Medium);
    }

    #[tokio::test]
    async fn test_old_records_fall_out_of_window() {
        let f = fixture();
        for _ in 0..4 {
            record(&f.sink, "search").await;
        }
        f.clock.advance(Duration::from_secs(16 * 60));
        let fresh = record(&f.sink, "search").await;

        let level = f
            .manager
            .determine_level(&fresh, &classification(ErrorSeverity::Warning))
            .await
            .unwrap();
        assert_eq!(level, EscalationLevel::None);
    }

    #[tokio::test]
    async fn test_critical_and_error_severity_levels() {
        let f = fixture();
        let single = record(&f.sink, "billing").await;

        let critical = f
            .manager
            .determine_level(&single, &classification(ErrorSeverity::Critical))
            .await
            .unwrap();
        assert_eq!(critical, EscalationLevel::Critical);

        let low = f
            .manager
            .determine_level(&single, &classification(ErrorSeverity::Error))
            .await
            .unwrap();
        assert_eq!(low, EscalationLevel::Low);
    }

    #[tokio::test]
    async fn test_none_level_dispatches_nothing() {
        let f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        f.manager.register_handler(counting_handler("a", calls.clone()));

        let single = record(&f.sink, "billing").await;
        let level = f
            .manager
            .escalate_error(&single, &classification(ErrorSeverity::Info), None)
            .await
            .unwrap();
        assert_eq!(level, EscalationLevel::None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_handler_does_not_block_others() {
        let f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        f.manager.register_handler(notification_fn("broken", |_payload| async {
            Err::<(), BoxError>("smtp unreachable".into())
        }));
        f.manager.register_handler(counting_handler("pager", calls.clone()));
        f.manager.register_handler(Arc::new(TracingNotifier));

        let single = record(&f.sink, "billing").await;
        let delivered = f
            .manager
            .escalate_with_level(
                &single,
                &classification(ErrorSeverity::Error),
                EscalationLevel::High,
                Some(&ErrorContext::new()),
            )
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("Notification handler 'broken' failed"));
    }

    #[tokio::test]
    async fn test_payload_carries_level_and_correlation() {
        let f = fixture();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink_seen = seen.clone();
        f.manager.register_handler(notification_fn("capture", move |payload| {
            let seen = sink_seen.clone();
            async move {
                seen.write().push(payload);
                Ok(())
            }
        }));

        let context = ErrorContext::new();
        let single = record(&f.sink, "billing").await;
        f.manager
            .escalate_error(&single, &classification(ErrorSeverity::Critical), Some(&context))
            .await
            .unwrap();

        let seen = seen.read();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].escalation_level, EscalationLevel::Critical);
        assert_eq!(seen[0].correlation_id, Some(context.correlation_id));
        assert_eq!(seen[0].error_record.id, single.id);
    }
}

//! Retry with exponential backoff
//!
//! [`RetryHandler`] re-runs a failing operation up to `max_retries` extra
//! times, waiting `min(base_delay * multiplier^attempt, max_delay)` between
//! attempts. Waiting suspends the calling task; nothing is spawned. When
//! every attempt fails the last error is returned exactly as the operation
//! produced it.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::ErrorClassification;

/// Configuration and executor for retrying an operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryHandler {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Per-operation identifier for better observability
    pub operation_name: Option<String>,
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            operation_name: None,
        }
    }
}

impl RetryHandler {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_multiplier,
            max_delay,
            operation_name: None,
        }
    }

    /// Retry parameters taken from a classification
    pub fn from_classification(classification: &ErrorClassification, max_delay: Duration) -> Self {
        Self::new(
            classification.max_retries,
            classification.base_delay,
            classification.backoff_multiplier,
            max_delay,
        )
    }

    /// Set operation name for better observability
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Delay after failed attempt `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `operation` until it succeeds or attempts run out
    pub async fn execute_with_retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let name = self.operation_name.as_deref().unwrap_or("operation");
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} attempts", name, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= self.max_retries {
                        warn!(
                            "Attempt {}/{} for {} failed, giving up: {}",
                            attempt + 1,
                            self.max_attempts(),
                            name,
                            error
                        );
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "Attempt {}/{} for {} failed: {} (retrying in {:?})",
                        attempt + 1,
                        self.max_attempts(),
                        name,
                        error,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[derive(Debug, PartialEq, thiserror::Error)]
    enum FetchError {
        #[error("value error: {0}")]
        Value(String),
        #[error("attempt {0} failed")]
        Attempt(u32),
    }

    fn fast(max_retries: u32) -> RetryHandler {
        RetryHandler::new(
            max_retries,
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_successful_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = fast(3)
            .execute_with_retry(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FetchError>("ok")
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<(), FetchError> = fast(2)
            .execute_with_retry(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Value("x".to_string()))
                }
            })
            .await;

        assert_eq!(result, Err(FetchError::Value("x".to_string())));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_attempt_logs_count_against_total_attempts() {
        let result: Result<(), FetchError> = fast(2)
            .with_operation_name("fetch_quote")
            .execute_with_retry(|| async { Err(FetchError::Value("x".to_string())) })
            .await;

        assert!(result.is_err());
        assert!(logs_contain("Attempt 1/3 for fetch_quote failed"));
        assert!(logs_contain("Attempt 2/3 for fetch_quote failed"));
        assert!(logs_contain("Attempt 3/3 for fetch_quote failed, giving up"));
        assert!(!logs_contain("/2 for fetch_quote"));
    }

    #[tokio::test]
    async fn test_last_error_is_the_one_returned() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<(), FetchError> = fast(2)
            .execute_with_retry(|| {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                async move { Err(FetchError::Attempt(attempt)) }
            })
            .await;

        assert_eq!(result, Err(FetchError::Attempt(2)));
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = fast(3)
            .execute_with_retry(|| {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(FetchError::Attempt(attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let handler = RetryHandler::new(
            3,
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(3),
        );
        let start = tokio::time::Instant::now();
        let _: Result<(), FetchError> = handler
            .execute_with_retry(|| async { Err(FetchError::Attempt(0)) })
            .await;

        // 1s + 2s + 3s (capped from 4s)
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_millis(6_100));
    }

    #[test]
    fn test_delay_schedule() {
        let handler = RetryHandler::new(5, Duration::from_secs(2), 2.0, Duration::from_secs(10));
        assert_eq!(handler.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(handler.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(handler.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(handler.delay_for_attempt(3), Duration::from_secs(10));
        assert_eq!(handler.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    proptest! {
        #[test]
        fn prop_delays_never_decrease_or_exceed_cap(
            base_ms in 1u64..5_000,
            multiplier in 1.0f64..4.0,
            cap_ms in 1u64..120_000,
        ) {
            let handler = RetryHandler::new(
                10,
                Duration::from_millis(base_ms),
                multiplier,
                Duration::from_millis(cap_ms),
            );
            let mut previous = Duration::ZERO;
            for attempt in 0..10 {
                let delay = handler.delay_for_attempt(attempt);
                prop_assert!(delay <= handler.max_delay);
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}

//! Priority-ordered fallbacks per `(component, operation)`
//!
//! Fallbacks are registered up front and tried highest priority first. The
//! first fallback that returns `Ok` wins; one that fails is logged and the
//! next is tried. Equal priorities keep registration order.
//!
//! The outcome is explicit: [`FallbackOutcome::Recovered`] carries the
//! value (which may itself be `null`), [`FallbackOutcome::NotRecovered`]
//! means nothing produced a result.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::BoxError;
use crate::types::ErrorContext;

/// Everything a fallback gets to work with
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackRequest {
    pub component: String,
    pub operation: String,
    /// Arguments of the failed operation
    pub args: Value,
    pub context: Option<ErrorContext>,
}

/// Alternate code path for a failed operation
#[async_trait]
pub trait Fallback: Send + Sync {
    async fn call(&self, request: &FallbackRequest) -> Result<Value, BoxError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "fallback"
    }
}

/// [`Fallback`] built from an async closure
pub struct FnFallback<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Fallback for FnFallback<F>
where
    F: Fn(FallbackRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    async fn call(&self, request: &FallbackRequest) -> Result<Value, BoxError> {
        (self.f)(request.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap an async closure as a shareable [`Fallback`]
pub fn fallback_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Fallback>
where
    F: Fn(FallbackRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(FnFallback {
        name: name.into(),
        f,
    })
}

#[derive(Clone)]
struct FallbackEntry {
    fallback: Arc<dyn Fallback>,
    priority: i32,
}

/// Result of [`FallbackHandler::execute_fallback`]
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOutcome {
    Recovered {
        value: Value,
        fallback: String,
        priority: i32,
    },
    NotRecovered {
        /// How many fallbacks were tried and failed
        attempted: usize,
    },
}

impl FallbackOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, FallbackOutcome::Recovered { .. })
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            FallbackOutcome::Recovered { value, .. } => Some(value),
            FallbackOutcome::NotRecovered { .. } => None,
        }
    }
}

type FallbackKey = (String, String);

/// Registry and executor of fallbacks
#[derive(Default)]
pub struct FallbackHandler {
    fallbacks: RwLock<HashMap<FallbackKey, Vec<FallbackEntry>>>,
}

impl FallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fallback for `(component, operation)`
    pub fn register_fallback(
        &self,
        component: impl Into<String>,
        operation: impl Into<String>,
        fallback: Arc<dyn Fallback>,
        priority: i32,
    ) {
        let key = (component.into(), operation.into());
        debug!(
            "Registering fallback '{}' for {}::{} at priority {}",
            fallback.name(),
            key.0,
            key.1,
            priority
        );

        let mut fallbacks = self.fallbacks.write();
        let entries = fallbacks.entry(key).or_default();
        entries.push(FallbackEntry { fallback, priority });
        // sort_by is stable: equal priorities keep registration order
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn has_fallbacks(&self, component: &str, operation: &str) -> bool {
        self.fallback_count(component, operation) > 0
    }

    pub fn fallback_count(&self, component: &str, operation: &str) -> usize {
        self.fallbacks
            .read()
            .get(&(component.to_string(), operation.to_string()))
            .map_or(0, Vec::len)
    }

    /// Remove every fallback for `(component, operation)`
    pub fn clear(&self, component: &str, operation: &str) -> usize {
        self.fallbacks
            .write()
            .remove(&(component.to_string(), operation.to_string()))
            .map_or(0, |entries| entries.len())
    }

    /// Try the fallbacks for `(component, operation)` in priority order
    pub async fn execute_fallback(
        &self,
        component: &str,
        operation: &str,
        args: Value,
        context: Option<&ErrorContext>,
    ) -> FallbackOutcome {
        // Snapshot so no lock is held across awaits
        let entries = self
            .fallbacks
            .read()
            .get(&(component.to_string(), operation.to_string()))
            .cloned()
            .unwrap_or_default();

        if entries.is_empty() {
            debug!("No fallbacks registered for {}::{}", component, operation);
            return FallbackOutcome::NotRecovered { attempted: 0 };
        }

        let request = FallbackRequest {
            component: component.to_string(),
            operation: operation.to_string(),
            args,
            context: context.cloned(),
        };

        let mut attempted = 0;
        for entry in entries {
            match entry.fallback.call(&request).await {
                Ok(value) => {
                    info!(
                        correlation_id = ?context.map(|c| c.correlation_id),
                        "Fallback '{}' recovered {}::{}",
                        entry.fallback.name(),
                        component,
                        operation
                    );
                    return FallbackOutcome::Recovered {
                        value,
                        fallback: entry.fallback.name().to_string(),
                        priority: entry.priority,
                    };
                }
                Err(e) => {
                    attempted += 1;
                    warn!(
                        correlation_id = ?context.map(|c| c.correlation_id),
                        "Fallback '{}' for {}::{} failed: {}",
                        entry.fallback.name(),
                        component,
                        operation,
                        e
                    );
                }
            }
        }

        warn!(
            "All {} fallbacks failed for {}::{}",
            attempted, component, operation
        );
        FallbackOutcome::NotRecovered { attempted }
    }
}

impl std::fmt::Debug for FallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fallbacks = self.fallbacks.read();
        f.debug_struct("FallbackHandler")
            .field("keys", &fallbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

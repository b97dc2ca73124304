//! Error record persistence interface
//!
//! The engine creates error records but does not own their storage or their
//! query semantics. [`ErrorSink`] is the seam; [`InMemoryErrorSink`] backs
//! tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{WardenError, WardenResult};
use crate::types::{ErrorContext, ErrorSeverity};

/// Request details captured alongside an error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub path: Option<String>,
    pub method: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMetadata {
    pub fn from_context(context: &ErrorContext) -> Self {
        Self {
            path: context.request_path.clone(),
            method: context.request_method.clone(),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
        }
    }
}

/// Everything needed to create an error record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewErrorRecord {
    pub layer: String,
    pub component: String,
    pub severity: ErrorSeverity,
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub correlation_id: Uuid,
    pub user_id: Option<String>,
    pub request: RequestMetadata,
    pub metadata: serde_json::Value,
}

/// A persisted error entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub layer: String,
    pub component: String,
    pub severity: ErrorSeverity,
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub correlation_id: Uuid,
    pub user_id: Option<String>,
    pub request: RequestMetadata,
    pub resolved: bool,
    pub requires_manual_review: bool,
    pub metadata: serde_json::Value,
}

impl ErrorRecord {
    /// Record that never reached a sink, used when persisting fails
    pub fn unsaved(record: NewErrorRecord, created_at: DateTime<Utc>) -> Self {
        Self::from_new(Uuid::new_v4(), created_at, record)
    }

    fn from_new(id: Uuid, created_at: DateTime<Utc>, record: NewErrorRecord) -> Self {
        Self {
            id,
            created_at,
            layer: record.layer,
            component: record.component,
            severity: record.severity,
            error_type: record.error_type,
            message: record.message,
            stack_trace: record.stack_trace,
            correlation_id: record.correlation_id,
            user_id: record.user_id,
            request: record.request,
            resolved: false,
            requires_manual_review: false,
            metadata: record.metadata,
        }
    }
}

/// Filters for [`ErrorSink::query`]; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorQuery {
    pub layer: Option<String>,
    pub component: Option<String>,
    pub error_type: Option<String>,
    pub severity: Option<ErrorSeverity>,
    /// Inclusive lower bound on `created_at`
    pub since: Option<DateTime<Utc>>,
}

impl ErrorQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, record: &ErrorRecord) -> bool {
        self.layer.as_deref().map_or(true, |l| record.layer == l)
            && self.component.as_deref().map_or(true, |c| record.component == c)
            && self.error_type.as_deref().map_or(true, |t| record.error_type == t)
            && self.severity.map_or(true, |s| record.severity == s)
            && self.since.map_or(true, |since| record.created_at >= since)
    }
}

/// Storage and query of error records
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn create(&self, record: NewErrorRecord) -> WardenResult<ErrorRecord>;

    async fn query(&self, query: &ErrorQuery) -> WardenResult<Vec<ErrorRecord>>;

    async fn mark_manual_review(&self, id: Uuid) -> WardenResult<()>;

    async fn mark_resolved(&self, id: Uuid) -> WardenResult<()>;
}

/// Vector-backed [`ErrorSink`]
#[derive(Debug, Clone)]
pub struct InMemoryErrorSink {
    records: Arc<RwLock<Vec<ErrorRecord>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryErrorSink {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            clock,
        }
    }

    /// Snapshot of every stored record
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn update<F>(&self, id: Uuid, apply: F) -> WardenResult<()>
    where
        F: FnOnce(&mut ErrorRecord),
    {
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(WardenError::RecordNotFound { id })?;
        apply(record);
        Ok(())
    }
}

impl Default for InMemoryErrorSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ErrorSink for InMemoryErrorSink {
    async fn create(&self, record: NewErrorRecord) -> WardenResult<ErrorRecord> {
        let stored = ErrorRecord::from_new(Uuid::new_v4(), self.clock.now(), record);
        self.records.write().push(stored.clone());
        Ok(stored)
    }

    async fn query(&self, query: &ErrorQuery) -> WardenResult<Vec<ErrorRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn mark_manual_review(&self, id: Uuid) -> WardenResult<()> {
        self.update(id, |r| r.requires_manual_review = true)
    }

    async fn mark_resolved(&self, id: Uuid) -> WardenResult<()> {
        self.update(id, |r| r.resolved = true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn new_record(component: &str, severity: ErrorSeverity) -> NewErrorRecord {
        NewErrorRecord {
            layer: "api".to_string(),
            component: component.to_string(),
            severity,
            error_type: "IoError".to_string(),
            message: "boom".to_string(),
            stack_trace: None,
            correlation_id: Uuid::new_v4(),
            user_id: None,
            request: RequestMetadata::default(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_query_filters_by_fields_and_time() {
        let clock = ManualClock::starting_now();
        let sink = InMemoryErrorSink::with_clock(Arc::new(clock.clone()));

        sink.create(new_record("billing", ErrorSeverity::Error)).await.unwrap();
        clock.advance(Duration::from_secs(600));
        let cutoff = clock.now();
        sink.create(new_record("billing", ErrorSeverity::Critical)).await.unwrap();
        sink.create(new_record("search", ErrorSeverity::Error)).await.unwrap();

        let billing = sink
            .query(&ErrorQuery::new().component("billing"))
            .await
            .unwrap();
        assert_eq!(billing.len(), 2);

        let recent = sink.query(&ErrorQuery::new().since(cutoff)).await.unwrap();
        assert_eq!(recent.len(), 2);

        let critical = sink
            .query(&ErrorQuery::new().severity(ErrorSeverity::Critical))
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].component, "billing");
    }

    #[tokio::test]
    async fn test_mark_flags() {
        let sink = InMemoryErrorSink::new();
        let record = sink.create(new_record("billing", ErrorSeverity::Error)).await.unwrap();

        sink.mark_manual_review(record.id).await.unwrap();
        sink.mark_resolved(record.id).await.unwrap();

        let stored = &sink.records()[0];
        assert!(stored.requires_manual_review);
        assert!(stored.resolved);
    }

    #[tokio::test]
    async fn test_mark_unknown_record_fails() {
        let sink = InMemoryErrorSink::new();
        let err = sink.mark_resolved(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WardenError::RecordNotFound { .. }));
    }
}

//! Constructor methods for WardenError
//!
//! Factory methods that box sources and normalise the context strings so
//! call sites stay one line long.

use super::types::WardenError;

impl WardenError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use warden_core::error::WardenError;
    ///
    /// let err = WardenError::configuration("escalation.high_threshold", "must be positive");
    /// assert!(err.to_string().contains("escalation.high_threshold"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        WardenError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a state store error with a boxed source
    pub fn store<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        WardenError::Store {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create an error sink error with a boxed source
    pub fn sink<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        WardenError::Sink {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        WardenError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn notification(handler: impl Into<String>, message: impl Into<String>) -> Self {
        WardenError::Notification {
            handler: handler.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        WardenError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure came from an external collaborator
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            WardenError::Store { .. } | WardenError::Sink { .. } | WardenError::Notification { .. }
        )
    }
}

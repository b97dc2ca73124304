//! Core error types for Warden
//!
//! This module contains the main WardenError enum and the associated
//! result aliases. These errors describe failures of the recovery machinery
//! itself; errors raised by protected operations never get wrapped in them.

use thiserror::Error;

/// Boxed error used by fallback and notification callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for Warden infrastructure operations
///
/// # Error Categories
///
/// - **Collaborator Errors**: state store, error sink and notification failures
/// - **Logic Errors**: configuration and invalid input
/// - **Internal Errors**: serialization and IO
#[derive(Error, Debug)]
pub enum WardenError {
    // Collaborator Errors
    #[error("State store operation '{operation}' failed")]
    Store {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Error sink operation '{operation}' failed")]
    Sink {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Notification handler '{handler}' failed: {message}")]
    Notification { handler: String, message: String },

    #[error("Error record not found: {id}")]
    RecordNotFound { id: uuid::Uuid },

    // Configuration Errors
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    // Serialization & IO Errors
    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),
}

pub type Result<T> = std::result::Result<T, WardenError>;

/// Alias kept alongside `Result` for call sites that import both
pub type WardenResult<T> = std::result::Result<T, WardenError>;

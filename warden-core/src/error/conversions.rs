//! Error conversion implementations for WardenError
//!
//! From trait implementations for the external error types the crate
//! touches, so `?` works at every call site.

use super::types::WardenError;

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::IoError(Box::new(err))
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Serialization {
            operation: "json".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<toml::de::Error> for WardenError {
    fn from(err: toml::de::Error) -> Self {
        WardenError::ConfigurationError {
            component: "toml".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for WardenError {
    fn from(err: toml::ser::Error) -> Self {
        WardenError::Serialization {
            operation: "toml".to_string(),
            source: Box::new(err),
        }
    }
}

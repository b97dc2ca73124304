//! Error handling for the Warden recovery machinery
//!
//! Warden keeps two error channels apart:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────────┐
//! │  Caller errors (E)           │  Infrastructure errors           │
//! ├──────────────────────────────┼──────────────────────────────────┤
//! │ • raised by the protected    │ • state store failures           │
//! │   operation                  │ • error sink failures            │
//! │ • classified, never wrapped  │ • notification failures          │
//! │ • returned unchanged when    │ • configuration / serialization  │
//! │   recovery does not succeed  │ • logged, never replace E        │
//! └──────────────────────────────┴──────────────────────────────────┘
//! ```

pub mod constructors;
pub mod conversions;
pub mod types;

pub use types::{BoxError, Result, WardenError, WardenResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        fn read() -> WardenResult<String> {
            Ok(std::fs::read_to_string("/definitely/not/here/warden.toml")?)
        }

        match read() {
            Err(WardenError::IoError(_)) => {}
            other => panic!("Expected IoError, got {:?}", other),
        }
    }

    #[test]
    fn test_toml_error_conversion() {
        fn parse() -> WardenResult<toml::Value> {
            Ok(toml::from_str::<toml::Value>("this is = = not toml")?)
        }

        let err = parse().unwrap_err();
        assert!(matches!(err, WardenError::ConfigurationError { ref component, .. } if component == "toml"));
    }

    #[test]
    fn test_collaborator_failure_flag() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "down");
        assert!(WardenError::store("get", io).is_collaborator_failure());
        assert!(!WardenError::invalid_input("key", "bad").is_collaborator_failure());
        assert!(WardenError::notification("pager", "timeout").is_collaborator_failure());
    }
}

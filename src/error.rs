//! Error type for the fallible, non-hot-path APIs
//!
//! The capture path (enter/exit/discard/hints) never returns errors: imbalance
//! and runaway growth are logged and repaired in place. Only configuration
//! loading, attribute conversion and listener callbacks surface `TrazoError`.

use thiserror::Error;

/// Errors raised by configuration, attribute conversion and sink callbacks
#[derive(Error, Debug)]
pub enum TrazoError {
    #[error("Invalid attribute value for '{key}': {reason}")]
    InvalidAttribute { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize trace: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Listener '{listener}' failed: {reason}")]
    Listener { listener: String, reason: String },
}

impl TrazoError {
    /// Shorthand for listener failures raised by sinks and settings callbacks
    pub fn listener(listener: impl Into<String>, reason: impl Into<String>) -> Self {
        TrazoError::Listener {
            listener: listener.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrazoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_attribute_message() {
        let err = TrazoError::InvalidAttribute {
            key: "payload".to_string(),
            reason: "null is not storable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid attribute value for 'payload': null is not storable"
        );
    }

    #[test]
    fn test_listener_helper() {
        let err = TrazoError::listener("stdout", "broken pipe");
        assert!(matches!(err, TrazoError::Listener { .. }));
        assert!(err.to_string().contains("broken pipe"));
    }

    #[test]
    fn test_toml_error_converts() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("max_frames = ");
        let err: TrazoError = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("Failed to parse TOML"));
    }
}

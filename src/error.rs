//! Error types for the deferred runtime
//!
//! Rejections of a [`Deferred`](crate::Deferred) are carried by its own
//! generic reason type and never surface here. This enum covers failures of
//! the host machinery around it: configuration and the event loop.

use std::fmt;
use thiserror::Error;

/// Which part of the configuration could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// The document is not valid JSON or does not match the schema
    Parse,
    /// A field parsed but holds an unusable value
    Invalid,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorKind::Parse => write!(f, "Parse"),
            ConfigErrorKind::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Main error type for the deferred runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Event loop configuration could not be loaded
    #[error("ConfigError: {kind}: {message}")]
    ConfigError {
        kind: ConfigErrorKind,
        message: String,
    },

    /// IO error while reading configuration
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// A microtask checkpoint ran past its budget (runaway reaction chain)
    #[error("MicrotaskBudgetExceeded: ran {budget} microtasks, {remaining} still queued")]
    MicrotaskBudgetExceeded { budget: usize, remaining: usize },
}

impl Error {
    /// Create a configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigError {
            kind: ConfigErrorKind::Parse,
            message: message.into(),
        }
    }

    /// Create an invalid configuration value error
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Error::ConfigError {
            kind: ConfigErrorKind::Invalid,
            message: message.into(),
        }
    }
}

/// Result type alias for the deferred runtime
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = Error::config_parse("expected value at line 1");
        assert_eq!(
            err.to_string(),
            "ConfigError: Parse: expected value at line 1"
        );
    }

    #[test]
    fn test_budget_error_display() {
        let err = Error::MicrotaskBudgetExceeded {
            budget: 10,
            remaining: 3,
        };
        assert_eq!(
            err.to_string(),
            "MicrotaskBudgetExceeded: ran 10 microtasks, 3 still queued"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::IoError { .. }));
    }
}

//! Configuration-related errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// Config file not found at expected path
    #[error("Config not found: {path}")]
    NotFound {
        /// Filesystem path where config was expected
        path: String,
    },

    /// Config file parse error
    #[error("Config parse error: {message}")]
    ParseError {
        /// Description of the parse failure
        message: String,
    },

    /// Config validation error (invalid values)
    #[error("Config validation error for {field}: {message}")]
    ValidationError {
        /// Name of the field that failed validation
        field: String,
        /// Description of the validation failure
        message: String,
    },

    /// Config read/write error (permission denied, disk full, etc)
    #[error("Config io error: {message}")]
    IoError {
        /// Description of the io failure
        message: String,
    },
}

impl ConfigError {
    /// Create a parse error from a serde_json error.
    pub fn from_json_error(e: &serde_json::Error) -> Self {
        Self::ParseError { message: e.to_string() }
    }

    /// Create an io error from a std::io error.
    pub fn from_io_error(e: &std::io::Error) -> Self {
        Self::IoError { message: e.to_string() }
    }

    /// Flatten `validator` errors into the first failing field.
    pub fn from_validation(errors: &validator::ValidationErrors) -> Self {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .map(|e| e.message.as_ref().map_or_else(|| e.code.to_string(), ToString::to_string))
                    .unwrap_or_else(|| "invalid value".to_string());
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("config".to_string(), errors.to_string()));
        Self::ValidationError { field, message }
    }
}

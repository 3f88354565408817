//! Core error types for ESS infra.

use thiserror::Error;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A required configuration key was not supplied
    #[error("Missing required configuration value: {key}")]
    MissingConfig {
        /// Configuration key
        key: String,
    },

    /// A configuration value was supplied but is unusable
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Configuration sources could not be read or merged
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid encoding
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// What was validated
        field: String,
        /// Every violation, joined
        reason: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing item
        kind: String,
        /// Name or identifier looked up
        id: String,
    },

    /// Already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Kind of the duplicate item
        kind: String,
        /// Name or identifier that clashed
        id: String,
    },

    /// A deferred value refers to an attribute the engine has not realized
    #[error("Unresolved value: {resource}.{property}")]
    Unresolved {
        /// Logical resource name
        resource: String,
        /// Property on that resource
        property: String,
    },
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        // Position only; the decoder message can quote input.
        Self::InvalidEncoding {
            reason: format!(
                "JSON {:?} error at line {} column {}",
                err.classify(),
                err.line(),
                err.column()
            ),
        }
    }
}

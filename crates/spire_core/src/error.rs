//! Core error types for SPIRE.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Artifact bytes are not valid JSON or do not match the schema
    #[error("Parse error: {message}")]
    ParseError {
        /// Decoder message
        message: String,
    },

    /// Artifact parsed but violates a structural rule
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Invalid capability name
    #[error("Invalid capability: {reason}")]
    InvalidCapability {
        /// Why it was rejected
        reason: String,
    },

    /// Unknown operation name
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Duplicate entry
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Kind of entry
        kind: String,
        /// Entry name
        id: String,
    },

    /// Artifact file could not be read
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path being read
        path: String,
        /// OS error text
        message: String,
    },
}

impl CoreError {
    /// Build a validation error
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}

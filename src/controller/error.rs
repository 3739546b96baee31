//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

/// How the engine reacts to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The spec is structurally invalid. Reported in status, not retried
    /// until the spec changes.
    Validation,
    /// Expected to clear on its own. Retried with backoff, kept out of status.
    Transient,
    /// Persistent store failure (permission, quota, rejected object).
    /// Reported in status, not retried until the next change.
    Irrecoverable,
}

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A store call did not complete in time
    #[error("Timed out after {timeout:?}: {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Failure while converging one child object
    #[error("{child}: {source}")]
    Child {
        child: String,
        #[source]
        source: Box<Error>,
    },

    /// Several child operations failed in the same pass
    #[error("{} child operation(s) failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<Error>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Attach the child object name to an error.
    pub fn for_child(child: impl Into<String>, source: Error) -> Self {
        Error::Child {
            child: child.into(),
            source: Box::new(source),
        }
    }

    /// Classify this error.
    ///
    /// An aggregate takes the most severe kind among its members:
    /// validation over irrecoverable over transient.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::MissingField(_) => ErrorKind::Validation,
            Error::Store(e) if e.is_transient() => ErrorKind::Transient,
            Error::Store(_) => ErrorKind::Irrecoverable,
            Error::Timeout { .. } => ErrorKind::Transient,
            Error::Child { source, .. } => source.kind(),
            Error::Aggregate(errors) => {
                let kinds: Vec<ErrorKind> = errors.iter().map(Error::kind).collect();
                if kinds.contains(&ErrorKind::Validation) {
                    ErrorKind::Validation
                } else if kinds.contains(&ErrorKind::Irrecoverable) {
                    ErrorKind::Irrecoverable
                } else {
                    ErrorKind::Transient
                }
            }
            Error::Serialization(_) => ErrorKind::Irrecoverable,
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Store(e) => e.is_not_found(),
            Error::Child { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Short machine-readable reason for status conditions and events.
    pub fn reason(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "InvalidSpec",
            ErrorKind::Transient => "TransientStoreError",
            ErrorKind::Irrecoverable => "IrrecoverableStoreError",
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upgrade command failed to dispatch or exited non-zero
    #[error("Upgrade command failed on {pod}: {message}")]
    Execution { pod: String, message: String },

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Execution { .. } | Error::Transient(_) => true,
            Error::Validation(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }
}

impl From<crate::client::MemberError> for Error {
    fn from(err: crate::client::MemberError) -> Self {
        match err {
            crate::client::MemberError::Kube(e) => Error::Kube(e),
            other => Error::Transient(other.to_string()),
        }
    }
}

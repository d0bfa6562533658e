//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.
//! Nothing here ever aborts the controller process; every class is contained
//! per-object by the error policy.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The declared spec cannot be resolved into child objects.
    /// Retrying without a spec change cannot succeed.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is an optimistic-concurrency rejection.
    /// Always recoverable: requeue and refetch, never retry with stale state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        if self.is_conflict() {
            return true;
        }
        match self {
            Error::Kube(e) => {
                // Retry on rate limiting, server errors, and transport failures
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::InvalidSpec(_) | Error::MissingField(_) | Error::Serialization(_) => false,
        }
    }

    /// Requeue duration for this error with bounded exponential backoff.
    ///
    /// `retries` counts prior failed attempts for the same object; the delay
    /// doubles per attempt from `base` up to `cap`.
    pub fn requeue_after(&self, retries: u32, base: Duration, cap: Duration) -> Duration {
        if self.is_conflict() {
            // Conflicts resolve on the next fresh read; no need to back off far
            return base;
        }
        if self.is_retryable() {
            let exp = base.saturating_mul(2u32.saturating_pow(retries.min(16)));
            exp.min(cap)
        } else {
            // Non-retryable errors only resolve on a spec change; keep a slow
            // periodic retry as a safety net
            cap
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

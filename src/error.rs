//! Error taxonomy shared across components

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Failures the manager knows how to classify
///
/// Recoverable variants (`ServiceUnavailable`, `PullFailed`) are retried
/// locally with bounded attempts; the rest propagate to the caller.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The serving API did not answer (connect error, timeout, non-2xx probe)
    #[error("service unavailable at {url}: {reason}")]
    ServiceUnavailable { url: String, reason: String },

    /// The external pull command exited nonzero
    #[error("pull failed for '{model_id}': {reason}")]
    PullFailed { model_id: String, reason: String },

    /// Pull reported success but the model is not listed afterwards
    #[error("post-install verification failed for '{model_id}'")]
    VerificationFailed { model_id: String },

    /// Archive failed a hard integrity check
    #[error("archive corrupt: {path}: {reason}")]
    ArchiveCorrupt { path: PathBuf, reason: String },

    /// Advisory capacity shortfall; logged, never blocks an operation
    #[error("insufficient space: need ~{needed_bytes} bytes, {available_bytes} available")]
    InsufficientSpace {
        needed_bytes: u64,
        available_bytes: u64,
    },

    /// Destructive operation declined (no force flag / negative confirmation)
    #[error("aborted: {0}")]
    UserAborted(String),

    /// Unexpected HTTP status from the serving API
    #[error("api returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ManagerError {
    pub fn service_unavailable(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::ServiceUnavailable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn pull_failed(model_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::PullFailed {
            model_id: model_id.into(),
            reason: reason.to_string(),
        }
    }
}

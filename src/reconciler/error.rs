//! Error types for import reconciliation.

use crate::mapper::MapperError;
use crate::provider::ProviderError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors that end a single reconcile of an import request.
///
/// Retryable errors are re-queued with backoff by the controller; the rest
/// are already reflected in the request's conditions and only logged.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MapperError),

    /// The credentials secret referenced by the request does not exist.
    #[error("Credentials secret {0} not found")]
    MissingCredentials(String),

    /// The request itself is malformed (e.g. no or several source platforms).
    #[error("Invalid import request: {0}")]
    InvalidRequest(String),

    /// Mapping or attribute validation failed; recorded in the conditions.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A target object with the expected name belongs to something else.
    #[error("{0} is not owned by this import")]
    NotOwned(String),

    /// A warm import round failed; counted against the failure thresholds.
    #[error("Warm import stage failed: {0}")]
    WarmStage(String),

    /// Creating target objects failed and the follow-up cleanup failed too.
    #[error("{error} (cleanup: {cleanup})")]
    CleanupFailed {
        error: Box<ReconcileError>,
        cleanup: String,
    },
}

impl ReconcileError {
    /// Whether the controller should re-queue the request with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::ValidationFailed(_) | ReconcileError::InvalidRequest(_) => false,
            ReconcileError::CleanupFailed { error, .. } => error.is_retryable(),
            _ => true,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Store(e) if e.is_conflict() => "conflict",
            ReconcileError::Store(_) => "store",
            ReconcileError::Provider(_) => "provider",
            ReconcileError::Mapping(_) => "mapping",
            ReconcileError::MissingCredentials(_) => "missing_credentials",
            ReconcileError::InvalidRequest(_) => "invalid_request",
            ReconcileError::ValidationFailed(_) => "validation_failed",
            ReconcileError::NotOwned(_) => "not_owned",
            ReconcileError::WarmStage(_) => "warm_stage",
            ReconcileError::CleanupFailed { .. } => "cleanup_failed",
        }
    }
}

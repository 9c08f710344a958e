//! Error types for provider operations.

use thiserror::Error;

/// Errors that can occur while talking to a source platform.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Network connectivity error (DNS, connection refused, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded deadline.
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Credentials were rejected by the platform.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The VM, disk or snapshot does not exist on the platform.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Platform returned an error response (4xx, 5xx).
    #[error("Platform error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Platform response doesn't match the expected format.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credentials secret or provider setup is incomplete.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation needed a connection or a loaded VM that isn't there yet.
    #[error("Provider not ready: {0}")]
    NotConnected(&'static str),

    /// Operation not supported by this platform.
    #[error("Operation '{0}' not supported by this provider")]
    Unsupported(&'static str),

    /// One or more cleanup steps failed.
    #[error("Cleanup failed: {0}")]
    Cleanup(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(timeout_ms)
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

//! Controller configuration

use serde::{Deserialize, Serialize};

/// Worker pool, retry backoff and requeue pacing.
///
/// # Example
///
/// ```toml
/// [controller]
/// workers = 4
/// backoff_base_ms = 500
/// backoff_max_seconds = 300
/// requeue_slow_seconds = 30
/// requeue_fast_seconds = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of reconciles that may run concurrently.
    ///
    /// A single request is never reconciled by two workers at once.
    pub workers: usize,

    /// First retry delay after a failed reconcile, doubled per attempt.
    pub backoff_base_ms: u64,

    /// Upper bound for the retry delay.
    pub backoff_max_seconds: u64,

    /// Requeue delay while waiting on the importer or the VM runtime.
    pub requeue_slow_seconds: u64,

    /// Requeue delay when the next step should be ready right away.
    pub requeue_fast_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            backoff_base_ms: 500,
            backoff_max_seconds: 300,
            requeue_slow_seconds: 30,
            requeue_fast_seconds: 5,
        }
    }
}

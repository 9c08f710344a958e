//! Warm import configuration

use serde::{Deserialize, Serialize};

/// Failure thresholds and stage interval for warm imports.
///
/// A warm import fails once `failures` exceeds `max_failures` or
/// `consecutive_failures` exceeds `max_consecutive_failures`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmImportConfig {
    pub max_failures: u32,
    pub max_consecutive_failures: u32,
    /// Minutes between two checkpoint snapshots
    pub stage_interval_minutes: u64,
}

impl Default for WarmImportConfig {
    fn default() -> Self {
        Self {
            max_failures: 10,
            max_consecutive_failures: 5,
            stage_interval_minutes: 60,
        }
    }
}

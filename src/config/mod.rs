//! Configuration module for vmimport
//!
//! Provides layered configuration loading from files, environment variables, and defaults.
//!
//! # Configuration Precedence
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`VMIMPORT_*`)
//! 3. Configuration file (TOML)
//! 4. Default values (lowest priority)
//!
//! # Example
//!
//! ```rust
//! use vmimport::config::VmImportConfig;
//!
//! let config = VmImportConfig::default();
//! assert_eq!(config.controller.workers, 4);
//!
//! let toml = r#"
//! [warm_import]
//! stage_interval_minutes = 15
//! "#;
//! let config: VmImportConfig = toml::from_str(toml).unwrap();
//! assert_eq!(config.warm_import.stage_interval_minutes, 15);
//! assert_eq!(config.warm_import.max_failures, 10);
//! ```

pub mod controller;
pub mod error;
pub mod logging;
pub mod providers;
pub mod server;
pub mod validation;
pub mod warm_import;

pub use controller::ControllerConfig;
pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig, LOG_COMPONENTS};
pub use providers::ProvidersConfig;
pub use server::ServerConfig;
pub use validation::ValidationConfig;
pub use warm_import::WarmImportConfig;

use crate::validation::CheckActionTable;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unified configuration for the import controller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VmImportConfig {
    /// Probe and metrics endpoint
    pub server: ServerConfig,
    /// Worker pool and requeue pacing
    pub controller: ControllerConfig,
    /// Warm import thresholds
    pub warm_import: WarmImportConfig,
    /// Check action overrides
    pub validation: ValidationConfig,
    /// Source platform clients
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

impl VmImportConfig {
    /// Load configuration from a TOML file
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supports VMIMPORT_* environment variables for common settings.
    /// Invalid values are silently ignored (defaults are kept).
    pub fn with_env_overrides(mut self) -> Self {
        // Server settings
        if let Ok(port) = std::env::var("VMIMPORT_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(host) = std::env::var("VMIMPORT_HOST") {
            self.server.host = host;
        }

        // Logging settings
        if let Ok(level) = std::env::var("VMIMPORT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("VMIMPORT_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }

        // Controller and warm import
        if let Ok(workers) = std::env::var("VMIMPORT_WORKERS") {
            if let Ok(w) = workers.parse() {
                self.controller.workers = w;
            }
        }
        if let Ok(interval) = std::env::var("VMIMPORT_STAGE_INTERVAL_MINUTES") {
            if let Ok(i) = interval.parse() {
                self.warm_import.stage_interval_minutes = i;
            }
        }
        if let Ok(timeout) = std::env::var("VMIMPORT_PROVIDER_TIMEOUT_SECONDS") {
            if let Ok(t) = timeout.parse() {
                self.providers.request_timeout_seconds = t;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.enabled && self.server.port == 0 {
            return Err(ConfigError::validation(
                "server.port",
                "port must be non-zero",
            ));
        }

        if self.controller.workers == 0 {
            return Err(ConfigError::validation(
                "controller.workers",
                "at least one worker is required",
            ));
        }
        for (field, value) in [
            ("controller.backoff_base_ms", self.controller.backoff_base_ms),
            (
                "controller.backoff_max_seconds",
                self.controller.backoff_max_seconds,
            ),
            (
                "controller.requeue_slow_seconds",
                self.controller.requeue_slow_seconds,
            ),
            (
                "controller.requeue_fast_seconds",
                self.controller.requeue_fast_seconds,
            ),
            (
                "warm_import.stage_interval_minutes",
                self.warm_import.stage_interval_minutes,
            ),
            (
                "providers.request_timeout_seconds",
                self.providers.request_timeout_seconds,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::validation(field, "must be greater than zero"));
            }
        }

        self.logging
            .validate()
            .map_err(|message| ConfigError::validation("logging", message))?;
        self.check_actions()?;
        Ok(())
    }

    /// Built-in check action table with the configured overrides applied.
    pub fn check_actions(&self) -> Result<CheckActionTable, ConfigError> {
        CheckActionTable::with_overrides(&self.validation.overrides)
            .map_err(|message| ConfigError::validation("validation.overrides", message))
    }
}

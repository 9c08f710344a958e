//! Logging section: base level, output format and per-module levels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Modules that accept their own level under `[logging.component_levels]`.
pub const LOG_COMPONENTS: &[&str] = &[
    "api",
    "controller",
    "mapper",
    "mapping",
    "provider",
    "reconciler",
    "store",
    "validation",
];

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line records for a terminal
    #[default]
    Pretty,
    /// One JSON object per record for log collectors
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Level for the HTTP client stack talking to oVirt and vSphere.
    /// Connection pool chatter drowns out import progress below `warn`.
    pub http_level: String,
    /// Per-module levels, e.g. `reconciler = "debug"`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub component_levels: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            http_level: "warn".to_string(),
            component_levels: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Raise or lower one module's level.
    pub fn with_component(mut self, component: &str, level: &str) -> Self {
        self.component_levels
            .insert(component.to_string(), level.to_string());
        self
    }

    /// Reject unknown levels and module names.
    pub fn validate(&self) -> Result<(), String> {
        check_level("level", &self.level)?;
        check_level("http_level", &self.http_level)?;
        for (component, level) in &self.component_levels {
            if !LOG_COMPONENTS.contains(&component.as_str()) {
                return Err(format!(
                    "unknown component '{}' (expected one of: {})",
                    component,
                    LOG_COMPONENTS.join(", ")
                ));
            }
            check_level(component, level)?;
        }
        Ok(())
    }
}

fn check_level(field: &str, level: &str) -> Result<(), String> {
    if LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(format!("invalid level '{}' for {}", level, field))
    }
}

//! Structured logging setup
//!
//! Every module logs through `tracing` with structured fields (`import`,
//! `target_vm`, `data_volume`, ...). This module turns the logging section
//! of the configuration into an `EnvFilter` directive string.

/// Crates behind the provider HTTP clients, governed by `http_level`.
const HTTP_TARGETS: &[&str] = &["hyper_util", "reqwest"];

/// Build filter directives string from LoggingConfig
///
/// The base level comes first, then one `vmimport::<module>` directive per
/// configured component in name order, then the HTTP client crates.
///
/// # Examples
///
/// ```
/// use vmimport::config::LoggingConfig;
/// use vmimport::logging::build_filter_directives;
///
/// let config = LoggingConfig::default().with_component("reconciler", "debug");
///
/// assert_eq!(
///     build_filter_directives(&config),
///     "info,vmimport::reconciler=debug,hyper_util=warn,reqwest=warn"
/// );
/// ```
pub fn build_filter_directives(config: &crate::config::LoggingConfig) -> String {
    let mut directives = vec![config.level.to_lowercase()];
    directives.extend(
        config
            .component_levels
            .iter()
            .map(|(component, level)| format!("vmimport::{}={}", component, level.to_lowercase())),
    );
    directives.extend(
        HTTP_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, config.http_level.to_lowercase())),
    );
    directives.join(",")
}

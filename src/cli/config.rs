//! `vmimport config` handlers

use crate::cli::ConfigInitArgs;
use crate::config::VmImportConfig;
use std::fs;

const EXAMPLE_CONFIG: &str = include_str!("../../vmimport.example.toml");

/// Handle `vmimport config init`
///
/// Writes the annotated template, then loads it back so the summary shows
/// exactly what the controller will run with.
pub fn handle_config_init(args: &ConfigInitArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.stdout {
        print!("{}", EXAMPLE_CONFIG);
        return Ok(());
    }

    if args.output.exists() && !args.force {
        return Err(format!(
            "File already exists: {}. Use --force to overwrite.",
            args.output.display()
        )
        .into());
    }

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.output, EXAMPLE_CONFIG)?;

    let config = VmImportConfig::load(Some(args.output.as_path()))?;
    config.validate()?;

    println!("✓ Configuration file created: {}", args.output.display());
    for line in summarize(&config) {
        println!("  {}", line);
    }

    Ok(())
}

/// One line per setting an operator usually tunes first.
fn summarize(config: &VmImportConfig) -> Vec<String> {
    let warm = &config.warm_import;
    let mut lines = vec![
        format!("workers: {}", config.controller.workers),
        format!(
            "warm imports: stage every {} min, fail after {} failures ({} in a row)",
            warm.stage_interval_minutes, warm.max_failures, warm.max_consecutive_failures
        ),
    ];
    if config.server.enabled {
        lines.push(format!(
            "probes and metrics: http://{}:{}",
            config.server.host, config.server.port
        ));
    } else {
        lines.push("probes and metrics: disabled".to_string());
    }
    if !config.validation.overrides.is_empty() {
        lines.push(format!(
            "check overrides: {}",
            config.validation.overrides.len()
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::CheckAction;
    use std::path::PathBuf;

    fn init_args(output: PathBuf, force: bool) -> ConfigInitArgs {
        ConfigInitArgs {
            output,
            force,
            stdout: false,
        }
    }

    #[test]
    fn test_config_init_creates_nested_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_path = temp_dir.path().join("etc/vmimport/vmimport.toml");

        handle_config_init(&init_args(output_path.clone(), false)).unwrap();

        let config = VmImportConfig::load(Some(output_path.as_path())).unwrap();
        assert_eq!(config.controller.workers, 4);
        assert_eq!(config.warm_import.stage_interval_minutes, 60);
    }

    #[test]
    fn test_config_init_no_overwrite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_path = temp_dir.path().join("vmimport.toml");
        std::fs::write(&output_path, "existing").unwrap();

        assert!(handle_config_init(&init_args(output_path.clone(), false)).is_err());
        let content = std::fs::read_to_string(&output_path).unwrap();
        assert_eq!(content, "existing");
    }

    #[test]
    fn test_config_init_force_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_path = temp_dir.path().join("vmimport.toml");
        std::fs::write(&output_path, "old content").unwrap();

        handle_config_init(&init_args(output_path.clone(), true)).unwrap();
        let content = std::fs::read_to_string(&output_path).unwrap();
        assert!(content.contains("[warm_import]"));
    }

    #[test]
    fn test_summarize_defaults() {
        let lines = summarize(&VmImportConfig::default());
        assert_eq!(lines[0], "workers: 4");
        assert_eq!(
            lines[1],
            "warm imports: stage every 60 min, fail after 10 failures (5 in a row)"
        );
        assert_eq!(lines[2], "probes and metrics: http://0.0.0.0:8080");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_summarize_overrides_and_disabled_server() {
        let mut config = VmImportConfig::default();
        config.server.enabled = false;
        config
            .validation
            .overrides
            .insert("vm.usb".to_string(), CheckAction::Block);

        let lines = summarize(&config);
        assert!(lines.contains(&"probes and metrics: disabled".to_string()));
        assert!(lines.contains(&"check overrides: 1".to_string()));
    }
}

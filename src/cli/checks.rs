//! Checks command implementation

use crate::cli::output::{format_checks_json, format_checks_table, CheckView};
use crate::cli::ChecksArgs;
use crate::config::VmImportConfig;

/// Handle `vmimport checks` command
///
/// Prints every attribute check with the action it currently resolves to,
/// after applying the overrides of the configuration file (if it exists).
pub fn handle_checks(args: &ChecksArgs) -> Result<String, Box<dyn std::error::Error>> {
    let config = if args.config.exists() {
        VmImportConfig::load(Some(&args.config))?
    } else {
        VmImportConfig::default()
    };
    let table = config.check_actions()?;
    let views = CheckView::from_table(&table);

    if args.json {
        Ok(format_checks_json(&views)?)
    } else {
        Ok(format_checks_table(&views))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_checks_without_config_file() {
        let args = ChecksArgs {
            json: false,
            config: PathBuf::from("/nonexistent/vmimport.toml"),
        };
        let output = handle_checks(&args).unwrap();
        assert!(output.contains("vm.cpu.architecture"));
    }

    #[test]
    fn test_checks_apply_config_overrides() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            temp.path(),
            "[validation.overrides]\n\"vm.usb\" = \"block\"\n",
        )
        .unwrap();

        let args = ChecksArgs {
            json: true,
            config: temp.path().to_path_buf(),
        };
        let output = handle_checks(&args).unwrap();
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        let usb = json["checks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["id"] == "vm.usb")
            .unwrap();
        assert_eq!(usb["action"], "block");
        assert_eq!(usb["overridden"], true);
    }

    #[test]
    fn test_checks_reject_unknown_override() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            temp.path(),
            "[validation.overrides]\n\"vm.teleport\" = \"block\"\n",
        )
        .unwrap();

        let args = ChecksArgs {
            json: false,
            config: temp.path().to_path_buf(),
        };
        assert!(handle_checks(&args).is_err());
    }
}

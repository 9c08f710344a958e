//! Validation configuration

use crate::validation::CheckAction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-check action overrides applied on top of the built-in table.
///
/// # Example
///
/// ```toml
/// [validation.overrides]
/// "vm.usb" = "log"
/// "nic.port_mirroring" = "block"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub overrides: BTreeMap<String, CheckAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_overrides_parse() {
        let config: ValidationConfig = toml::from_str(
            r#"
            [overrides]
            "vm.usb" = "log"
            "#,
        )
        .unwrap();
        assert_eq!(config.overrides["vm.usb"], CheckAction::Log);
    }
}

//! Import phase classification used by gauges and the CLI summary.

use crate::conditions::find_condition;
use crate::resources::{ConditionStatus, ConditionType, VirtualMachineImport};
use serde::Serialize;
use std::fmt;

/// Coarse lifecycle phase of an import request, derived from its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    /// No condition recorded yet
    Pending,
    Processing,
    /// Validation blocked the import; a spec change restarts it
    Invalid,
    Succeeded,
    Failed,
}

impl ImportPhase {
    pub const ALL: [ImportPhase; 5] = [
        ImportPhase::Pending,
        ImportPhase::Processing,
        ImportPhase::Invalid,
        ImportPhase::Succeeded,
        ImportPhase::Failed,
    ];

    pub fn of(request: &VirtualMachineImport) -> Self {
        let conditions = &request.status.conditions;
        if let Some(succeeded) = find_condition(conditions, ConditionType::Succeeded) {
            return if succeeded.status == ConditionStatus::True {
                ImportPhase::Succeeded
            } else {
                ImportPhase::Failed
            };
        }
        match find_condition(conditions, ConditionType::Processing) {
            Some(processing) if processing.status == ConditionStatus::False => {
                ImportPhase::Invalid
            }
            Some(_) => ImportPhase::Processing,
            None => ImportPhase::Pending,
        }
    }

    /// Whether the controller will not act on the request again by itself.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ImportPhase::Invalid | ImportPhase::Succeeded | ImportPhase::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPhase::Pending => "pending",
            ImportPhase::Processing => "processing",
            ImportPhase::Invalid => "invalid",
            ImportPhase::Succeeded => "succeeded",
            ImportPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

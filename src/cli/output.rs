//! Output formatting helpers for CLI commands

use crate::conditions::find_condition;
use crate::metrics::ImportPhase;
use crate::resources::{ConditionType, VirtualMachineImport};
use crate::validation::{CheckAction, CheckActionTable};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Serialize;
use serde_json::json;

/// View model for one check table row
#[derive(Debug, Clone, Serialize)]
pub struct CheckView {
    pub id: &'static str,
    pub action: CheckAction,
    /// True when the configuration overrides the built-in action
    pub overridden: bool,
}

impl CheckView {
    pub fn from_table(table: &CheckActionTable) -> Vec<Self> {
        table
            .entries()
            .map(|(id, action)| CheckView {
                id: id.as_str(),
                action,
                overridden: action != id.default_action(),
            })
            .collect()
    }
}

/// View model for an import request in the run summary
#[derive(Debug, Clone, Serialize)]
pub struct ImportView {
    pub namespace: String,
    pub name: String,
    pub phase: ImportPhase,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_vm: Option<String>,
    /// Latest reason and message of the deciding condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&VirtualMachineImport> for ImportView {
    fn from(request: &VirtualMachineImport) -> Self {
        let conditions = &request.status.conditions;
        let condition = find_condition(conditions, ConditionType::Succeeded)
            .or_else(|| find_condition(conditions, ConditionType::Processing));
        Self {
            namespace: request.metadata.namespace.clone(),
            name: request.metadata.name.clone(),
            phase: ImportPhase::of(request),
            progress: request.status.progress,
            target_vm: request.status.target_vm_name.clone(),
            reason: condition.map(|c| c.reason.to_string()),
            message: condition
                .map(|c| c.message.clone())
                .filter(|m| !m.is_empty()),
        }
    }
}

fn colored_action(action: CheckAction) -> String {
    match action {
        CheckAction::Log => "log".dimmed().to_string(),
        CheckAction::Warn => "warn".yellow().to_string(),
        CheckAction::Block => "block".red().to_string(),
    }
}

fn colored_phase(phase: ImportPhase) -> String {
    match phase {
        ImportPhase::Pending => "Pending".dimmed().to_string(),
        ImportPhase::Processing => "Processing".cyan().to_string(),
        ImportPhase::Invalid => "Invalid".yellow().to_string(),
        ImportPhase::Succeeded => "Succeeded".green().to_string(),
        ImportPhase::Failed => "Failed".red().to_string(),
    }
}

/// Format the check table
pub fn format_checks_table(checks: &[CheckView]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Check", "Action", "Overridden"]);

    for check in checks {
        table.add_row(vec![
            Cell::new(check.id),
            Cell::new(colored_action(check.action)),
            Cell::new(if check.overridden { "yes" } else { "" }),
        ]);
    }

    table.to_string()
}

/// Format the check table as JSON
pub fn format_checks_json(checks: &[CheckView]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&json!({ "checks": checks }))
}

/// Format the run summary
pub fn format_imports_table(imports: &[ImportView]) -> String {
    if imports.is_empty() {
        return "No import requests found".to_string();
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Namespace", "Name", "Phase", "Progress", "Target VM", "Reason", "Message",
    ]);

    for import in imports {
        table.add_row(vec![
            Cell::new(&import.namespace),
            Cell::new(&import.name),
            Cell::new(colored_phase(import.phase)),
            Cell::new(format!("{}%", import.progress)),
            Cell::new(import.target_vm.as_deref().unwrap_or("-")),
            Cell::new(import.reason.as_deref().unwrap_or("-")),
            Cell::new(import.message.as_deref().unwrap_or("")),
        ]);
    }

    table.to_string()
}

/// Format the run summary as JSON
pub fn format_imports_json(imports: &[ImportView]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&json!({ "imports": imports }))
}

//! Validation and condition engine.
//!
//! Turns a loaded source VM plus its merged mapping into two conditions:
//! `Valid` (mapping completeness and target existence) and
//! `MappingRulesVerified` (attribute checks weighted by the action table).

pub mod checks;
pub mod mapping;

pub use checks::CheckId;
pub use mapping::{MappingFailure, MappingFailureKind};

use crate::provider::SourceVm;
use crate::resources::{
    Condition, ConditionReason, ConditionStatus, ConditionType, MappingConfiguration,
};
use crate::store::ObjectStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Separator used when folding several failure messages into one condition.
pub const MESSAGE_SEPARATOR: &str = ", ";

/// What a tripped check does to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckAction {
    /// Traced only
    Log,
    /// Surfaced as a warning; the request stays valid
    Warn,
    /// Invalidates the request
    Block,
}

impl fmt::Display for CheckAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckAction::Log => "log",
            CheckAction::Warn => "warn",
            CheckAction::Block => "block",
        })
    }
}

impl FromStr for CheckAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(CheckAction::Log),
            "warn" => Ok(CheckAction::Warn),
            "block" => Ok(CheckAction::Block),
            _ => Err(format!("Invalid check action: {}", s)),
        }
    }
}

/// A tripped attribute check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub check_id: CheckId,
    pub message: String,
}

/// Check id to action lookup, built once and shared by every reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckActionTable {
    actions: HashMap<CheckId, CheckAction>,
}

impl Default for CheckActionTable {
    fn default() -> Self {
        Self {
            actions: CheckId::ALL
                .iter()
                .map(|id| (*id, id.default_action()))
                .collect(),
        }
    }
}

impl CheckActionTable {
    /// Default table with configured overrides applied.
    ///
    /// # Errors
    ///
    /// Returns the offending key if an override names an unknown check.
    pub fn with_overrides(overrides: &BTreeMap<String, CheckAction>) -> Result<Self, String> {
        let mut table = Self::default();
        for (key, action) in overrides {
            let id: CheckId = key.parse()?;
            table.actions.insert(id, *action);
        }
        Ok(table)
    }

    pub fn action(&self, id: CheckId) -> CheckAction {
        self.actions
            .get(&id)
            .copied()
            .unwrap_or_else(|| id.default_action())
    }

    /// Every entry in table order.
    pub fn entries(&self) -> impl Iterator<Item = (CheckId, CheckAction)> + '_ {
        CheckId::ALL.iter().map(|id| (*id, self.action(*id)))
    }
}

/// The two conditions produced by one validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub mapping: Condition,
    pub rules: Condition,
}

impl ValidationReport {
    /// Invalid if either condition is false.
    pub fn is_valid(&self) -> bool {
        !self.mapping.is_false() && !self.rules.is_false()
    }

    pub fn into_conditions(self) -> Vec<Condition> {
        vec![self.mapping, self.rules]
    }
}

/// Aggregates mapping and attribute check results into conditions.
#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    actions: CheckActionTable,
}

impl ValidationEngine {
    pub fn new(actions: CheckActionTable) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &CheckActionTable {
        &self.actions
    }

    /// Run both validation passes against a loaded VM and its merged mapping.
    pub fn validate(
        &self,
        vm: &SourceVm,
        mappings: &MappingConfiguration,
        store: &ObjectStore,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> ValidationReport {
        let mut mapping_failures =
            mapping::validate_network_mappings(vm, mappings, store, namespace);
        mapping_failures.extend(mapping::validate_storage_mappings(vm, mappings, store));

        let rule_failures = checks::validate_source_vm(vm);

        ValidationReport {
            mapping: self.mapping_condition(&mapping_failures, now),
            rules: self.rules_condition(&rule_failures, now),
        }
    }

    /// Fold mapping failures into the `Valid` condition.
    pub fn mapping_condition(&self, failures: &[MappingFailure], now: DateTime<Utc>) -> Condition {
        if failures.is_empty() {
            return Condition::new(
                ConditionType::Valid,
                ConditionStatus::True,
                ConditionReason::ValidationCompleted,
                "Validating completed successfully",
                now,
            );
        }

        let message = failures
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join(MESSAGE_SEPARATOR);
        Condition::new(
            ConditionType::Valid,
            ConditionStatus::False,
            ConditionReason::IncompleteMappingRules,
            message,
            now,
        )
    }

    /// Fold attribute failures into the `MappingRulesVerified` condition.
    pub fn rules_condition(&self, failures: &[ValidationFailure], now: DateTime<Utc>) -> Condition {
        let mut blocking = Vec::new();
        let mut warnings = Vec::new();

        for failure in failures {
            match self.actions.action(failure.check_id) {
                CheckAction::Block => blocking.push(failure.message.as_str()),
                CheckAction::Warn => warnings.push(failure.message.as_str()),
                CheckAction::Log => tracing::debug!(
                    check = %failure.check_id,
                    message = %failure.message,
                    "Validation check reported"
                ),
            }
        }

        let (status, reason, message) = if !blocking.is_empty() {
            (
                ConditionStatus::False,
                ConditionReason::MappingRulesCheckingFailed,
                blocking.join(MESSAGE_SEPARATOR),
            )
        } else if !warnings.is_empty() {
            (
                ConditionStatus::True,
                ConditionReason::ReportedWarnings,
                warnings.join(MESSAGE_SEPARATOR),
            )
        } else {
            (
                ConditionStatus::True,
                ConditionReason::MappingRulesCheckingCompleted,
                String::new(),
            )
        };

        Condition::new(ConditionType::MappingRulesVerified, status, reason, message, now)
    }
}

#[cfg(test)]
mod tests;

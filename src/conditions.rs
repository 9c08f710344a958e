//! Condition store.
//!
//! Typed upsert and lookup over an import request's condition list. All
//! condition mutation goes through [`upsert_condition`], which keeps at most
//! one entry per condition type.

use crate::resources::{Condition, ConditionType};

/// Insert or update a condition by type.
///
/// - Unknown type: the condition is appended as-is.
/// - Known type: message, reason and heartbeat are always overwritten; status
///   and transition time only change when the status differs.
pub fn upsert_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        Some(existing) => {
            existing.message = new.message;
            existing.reason = new.reason;
            existing.last_heartbeat_time = new.last_heartbeat_time;
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time;
            }
        }
        None => conditions.push(new),
    }
}

/// Find the condition of the given type.
pub fn find_condition(
    conditions: &[Condition],
    condition_type: ConditionType,
) -> Option<&Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Whether the condition of the given type is present and true.
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type).is_some_and(Condition::is_true)
}

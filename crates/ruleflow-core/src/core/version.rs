// ruleflow-core/src/core/version.rs
// ============================================================================
// Module: Ruleflow Version History
// Description: Append-only rule version entries and field diffs.
// Purpose: Record every rule lifecycle transition as a full snapshot.
// Dependencies: crate::core::{rule, time}, serde
// ============================================================================

//! ## Overview
//! Every rule mutation appends a full-snapshot version entry. Diffs are
//! computed on demand by comparing the declared diff-field set between two
//! snapshots; rules are small, so structural sharing is not warranted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::rule::Rule;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Version Entries
// ============================================================================

/// Lifecycle transition kinds recorded in version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Initial registration.
    Registered,
    /// Document update.
    Updated,
    /// Enabled flag set.
    Enabled,
    /// Enabled flag cleared.
    Disabled,
    /// Rule removed from the registry.
    Unregistered,
    /// Snapshot restored from a prior version.
    RolledBack,
}

/// Append-only version history entry.
///
/// # Invariants
/// - `version` values for one rule are strictly increasing.
/// - `rolled_back_from` is present exactly when `change_type` is `rolled_back`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleVersionEntry {
    /// Version the entry records.
    pub version: u64,
    /// Full rule snapshot at this version.
    pub snapshot: Rule,
    /// When the transition happened.
    pub timestamp: Timestamp,
    /// Transition kind.
    pub change_type: ChangeType,
    /// Version the snapshot was restored from, for rollbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_from: Option<u64>,
}

// ============================================================================
// SECTION: Field Diffs
// ============================================================================

/// Fields compared when diffing two rule snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffField {
    /// Human-readable name.
    Name,
    /// Description.
    Description,
    /// Priority.
    Priority,
    /// Enabled flag.
    Enabled,
    /// Tag set.
    Tags,
    /// Group membership.
    Group,
    /// Trigger.
    Trigger,
    /// Condition list.
    Conditions,
    /// Action list.
    Actions,
}

/// One changed field between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    /// Which field changed.
    pub field: DiffField,
    /// Value before the change.
    pub before: Value,
    /// Value after the change.
    pub after: Value,
}

/// Computes the changed fields between two rule snapshots.
#[must_use]
pub fn diff_rules(before: &Rule, after: &Rule) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    push_diff(&mut diffs, DiffField::Name, &before.name, &after.name);
    push_diff(
        &mut diffs,
        DiffField::Description,
        &before.description,
        &after.description,
    );
    push_diff(
        &mut diffs,
        DiffField::Priority,
        &before.priority,
        &after.priority,
    );
    push_diff(
        &mut diffs,
        DiffField::Enabled,
        &before.enabled,
        &after.enabled,
    );
    push_diff(&mut diffs, DiffField::Tags, &before.tags, &after.tags);
    push_diff(&mut diffs, DiffField::Group, &before.group, &after.group);
    push_diff(
        &mut diffs,
        DiffField::Trigger,
        &before.trigger,
        &after.trigger,
    );
    push_diff(
        &mut diffs,
        DiffField::Conditions,
        &before.conditions,
        &after.conditions,
    );
    push_diff(
        &mut diffs,
        DiffField::Actions,
        &before.actions,
        &after.actions,
    );
    diffs
}

/// Appends a diff entry when the serialized field values differ.
fn push_diff<T>(diffs: &mut Vec<FieldDiff>, field: DiffField, before: &T, after: &T)
where
    T: Serialize,
{
    let before = serde_json::to_value(before).unwrap_or(Value::Null);
    let after = serde_json::to_value(after).unwrap_or(Value::Null);
    if before != after {
        diffs.push(FieldDiff {
            field,
            before,
            after,
        });
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        reason = "Test-only assertions are permitted."
    )]

    use serde_json::json;

    use super::DiffField;
    use super::diff_rules;
    use crate::core::rule::Rule;

    fn rule(priority: i64) -> Rule {
        serde_json::from_value(json!({
            "id": "r1",
            "name": "first",
            "priority": priority,
            "trigger": {"kind": "event", "topic": "a.b"}
        }))
        .unwrap()
    }

    #[test]
    fn identical_rules_have_no_diff() {
        assert!(diff_rules(&rule(1), &rule(1)).is_empty());
    }

    #[test]
    fn priority_change_is_reported() {
        let diffs = diff_rules(&rule(1), &rule(10));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, DiffField::Priority);
        assert_eq!(diffs[0].before, json!(1));
        assert_eq!(diffs[0].after, json!(10));
    }
}

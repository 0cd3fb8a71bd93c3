// ruleflow-core/src/runtime/registry.rs
// ============================================================================
// Module: Ruleflow Rule Registry
// Description: Rule lifecycle, groups, version history, and persistence.
// Purpose: Validate-then-commit rule mutations with append-only history.
// Dependencies: crate::core, crate::interfaces, regex
// ============================================================================

//! ## Overview
//! The registry owns rule records and groups. Every mutation validates
//! before committing: on failure no state changes. Successful mutations bump
//! the rule version, append a full-snapshot history entry, and persist
//! through the storage adapter when one is configured. Rollback applies a
//! prior snapshot as an update and records the version it left.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use ruleflow_match::Pattern;
use tracing::warn;

use crate::core::ChangeType;
use crate::core::EngineError;
use crate::core::FACT_SEPARATOR;
use crate::core::FieldDiff;
use crate::core::Group;
use crate::core::GroupId;
use crate::core::Rule;
use crate::core::RuleId;
use crate::core::RuleVersionEntry;
use crate::core::SharedClock;
use crate::core::TOPIC_SEPARATOR;
use crate::core::Timestamp;
use crate::core::Trigger;
use crate::core::ValidationWarning;
use crate::core::diff_rules;
use crate::interfaces::StorageAdapter;

// ============================================================================
// SECTION: Rule Records
// ============================================================================

/// Firing statistics kept per rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleStats {
    /// Number of firings since registration.
    pub fire_count: u64,
    /// Time of the most recent firing.
    pub last_fired: Option<Timestamp>,
}

/// Registered rule with its compiled artifacts.
pub struct RuleRecord {
    /// The rule document.
    pub rule: Rule,
    /// Regexes compiled once at registration, keyed by pattern text.
    pub regexes: BTreeMap<String, Regex>,
    /// Trigger pattern parsed for capture extraction; absent for temporal.
    pub trigger_pattern: Option<Pattern>,
    /// Registration order used for priority tie-breaks.
    pub registration_order: u64,
    /// Firing statistics.
    pub stats: RuleStats,
}

// ============================================================================
// SECTION: Rule Registry
// ============================================================================

/// Rule registry owned by the engine.
pub struct RuleRegistry {
    /// Rule records keyed by rule id.
    rules: BTreeMap<RuleId, RuleRecord>,
    /// Groups keyed by group id.
    groups: BTreeMap<GroupId, Group>,
    /// Append-only version history keyed by rule id.
    history: BTreeMap<RuleId, Vec<RuleVersionEntry>>,
    /// Next registration order.
    next_order: u64,
    /// Injected time source for lifecycle stamps.
    clock: SharedClock,
    /// Optional persistence adapter.
    adapter: Option<Arc<dyn StorageAdapter>>,
    /// Storage key for the rule set document.
    persistence_key: String,
}

impl RuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(clock: SharedClock, persistence_key: impl Into<String>) -> Self {
        Self {
            rules: BTreeMap::new(),
            groups: BTreeMap::new(),
            history: BTreeMap::new(),
            next_order: 1,
            clock,
            adapter: None,
            persistence_key: persistence_key.into(),
        }
    }

    /// Attaches a persistence adapter.
    pub fn set_adapter(&mut self, adapter: Arc<dyn StorageAdapter>) {
        self.adapter = Some(adapter);
    }

    /// Loads persisted rules and history, replacing in-memory state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when the adapter fails and
    /// [`EngineError::Validation`] when a stored document no longer parses.
    pub fn load(&mut self) -> Result<(), EngineError> {
        let Some(adapter) = self.adapter.clone() else {
            return Ok(());
        };
        let Some(state) = adapter.load(&self.persistence_key)? else {
            return Ok(());
        };

        let rules: Vec<Rule> = serde_json::from_value(state)
            .map_err(|error| EngineError::Validation(error.to_string()))?;
        self.rules.clear();
        for rule in rules {
            let record = self.next_record(rule)?;
            self.rules.insert(record.rule.id.clone(), record);
        }

        for key in adapter.list_keys("versions:")? {
            let Some(state) = adapter.load(&key)? else {
                continue;
            };
            let entries: Vec<RuleVersionEntry> = serde_json::from_value(state)
                .map_err(|error| EngineError::Validation(error.to_string()))?;
            let rule_id = RuleId::new(key.trim_start_matches("versions:"));
            self.history.insert(rule_id, entries);
        }
        Ok(())
    }

    /// Validates a rule document without mutating state.
    ///
    /// # Errors
    ///
    /// Returns the validation failure the document would be rejected with.
    pub fn validate(&self, rule: &Rule) -> Result<Vec<ValidationWarning>, EngineError> {
        Ok(rule.validate()?)
    }

    /// Registers a new rule at version 1.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Conflict`] on duplicate ids and
    /// [`EngineError::Validation`] on malformed documents.
    pub fn register(&mut self, mut rule: Rule) -> Result<Rule, EngineError> {
        if self.rules.contains_key(&rule.id) {
            return Err(EngineError::Conflict(format!(
                "rule {} is already registered",
                rule.id
            )));
        }
        rule.validate()?;

        let now = self.clock.now();
        rule.version = 1;
        rule.created_at = now;
        rule.updated_at = now;

        let record = self.next_record(rule)?;
        let snapshot = record.rule.clone();
        self.rules.insert(snapshot.id.clone(), record);
        self.append_entry(&snapshot, ChangeType::Registered, None)?;
        self.persist_rules()?;
        Ok(snapshot)
    }

    /// Updates an existing rule, bumping its version.
    ///
    /// When `expected_version` is provided, the update is rejected unless it
    /// matches the current version.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`], [`EngineError::Conflict`], or
    /// [`EngineError::Validation`].
    pub fn update(
        &mut self,
        mut rule: Rule,
        expected_version: Option<u64>,
    ) -> Result<Rule, EngineError> {
        let Some(existing) = self.rules.get(&rule.id) else {
            return Err(EngineError::NotFound(format!("rule {}", rule.id)));
        };
        let current_version = existing.rule.version;
        if let Some(expected) = expected_version {
            if expected != current_version {
                return Err(EngineError::Conflict(format!(
                    "rule {} is at version {current_version}, expected {expected}",
                    rule.id
                )));
            }
        }
        rule.validate()?;

        rule.version = current_version + 1;
        rule.created_at = existing.rule.created_at;
        rule.updated_at = self.clock.now();
        self.replace_record(rule.clone())?;
        self.append_entry(&rule, ChangeType::Updated, None)?;
        self.persist_rules()?;
        Ok(rule)
    }

    /// Removes a rule, appending an unregistration entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule does not exist.
    pub fn unregister(&mut self, rule_id: &RuleId) -> Result<Rule, EngineError> {
        let Some(record) = self.rules.remove(rule_id) else {
            return Err(EngineError::NotFound(format!("rule {rule_id}")));
        };
        let mut snapshot = record.rule;
        snapshot.version += 1;
        snapshot.updated_at = self.clock.now();
        self.append_entry(&snapshot, ChangeType::Unregistered, None)?;
        self.persist_rules()?;
        Ok(snapshot)
    }

    /// Sets the enabled flag, appending an entry when the flag changes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule does not exist.
    pub fn set_enabled(&mut self, rule_id: &RuleId, enabled: bool) -> Result<Rule, EngineError> {
        let Some(record) = self.rules.get_mut(rule_id) else {
            return Err(EngineError::NotFound(format!("rule {rule_id}")));
        };
        if record.rule.enabled == enabled {
            return Ok(record.rule.clone());
        }
        record.rule.enabled = enabled;
        record.rule.version += 1;
        record.rule.updated_at = self.clock.now();
        let snapshot = record.rule.clone();
        let change = if enabled {
            ChangeType::Enabled
        } else {
            ChangeType::Disabled
        };
        self.append_entry(&snapshot, change, None)?;
        self.persist_rules()?;
        Ok(snapshot)
    }

    /// Restores a prior version's snapshot as the active rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule or version is missing.
    pub fn rollback(&mut self, rule_id: &RuleId, version: u64) -> Result<Rule, EngineError> {
        let Some(current) = self.rules.get(rule_id) else {
            return Err(EngineError::NotFound(format!("rule {rule_id}")));
        };
        let current_version = current.rule.version;
        let created_at = current.rule.created_at;

        let target = self
            .history
            .get(rule_id)
            .and_then(|entries| {
                entries.iter().find(|entry| entry.version == version)
            })
            .ok_or_else(|| {
                EngineError::NotFound(format!("rule {rule_id} version {version}"))
            })?;

        let mut restored = target.snapshot.clone();
        restored.version = current_version + 1;
        restored.created_at = created_at;
        restored.updated_at = self.clock.now();
        self.replace_record(restored.clone())?;
        self.append_entry(&restored, ChangeType::RolledBack, Some(current_version))?;
        self.persist_rules()?;
        Ok(restored)
    }

    /// Returns a snapshot of the rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule does not exist.
    pub fn get(&self, rule_id: &RuleId) -> Result<Rule, EngineError> {
        self.rules
            .get(rule_id)
            .map(|record| record.rule.clone())
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id}")))
    }

    /// Returns snapshots of every rule in id order.
    #[must_use]
    pub fn list(&self) -> Vec<Rule> {
        self.rules.values().map(|record| record.rule.clone()).collect()
    }

    /// Returns the record for a rule, when registered.
    #[must_use]
    pub fn record(&self, rule_id: &RuleId) -> Option<&RuleRecord> {
        self.rules.get(rule_id)
    }

    /// Iterates every registered rule.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values().map(|record| &record.rule)
    }

    /// Returns the version history for a rule, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule has no history.
    pub fn history(&self, rule_id: &RuleId) -> Result<Vec<RuleVersionEntry>, EngineError> {
        self.history
            .get(rule_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id}")))
    }

    /// Diffs two recorded versions over the declared diff-field set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when either version is missing.
    pub fn diff(
        &self,
        rule_id: &RuleId,
        from: u64,
        to: u64,
    ) -> Result<Vec<FieldDiff>, EngineError> {
        let entries = self.history(rule_id)?;
        let find = |version: u64| {
            entries
                .iter()
                .find(|entry| entry.version == version)
                .ok_or_else(|| {
                    EngineError::NotFound(format!("rule {rule_id} version {version}"))
                })
        };
        Ok(diff_rules(&find(from)?.snapshot, &find(to)?.snapshot))
    }

    /// Exports snapshots of the active rule set.
    #[must_use]
    pub fn export(&self) -> Vec<Rule> {
        self.list()
    }

    /// Bulk-registers a rule set, validating every document first.
    ///
    /// # Errors
    ///
    /// Returns the first validation or conflict failure; on failure no state
    /// mutates.
    pub fn import(&mut self, rules: Vec<Rule>) -> Result<Vec<Rule>, EngineError> {
        let mut seen = BTreeMap::new();
        for rule in &rules {
            rule.validate()?;
            if self.rules.contains_key(&rule.id) || seen.insert(rule.id.clone(), ()).is_some() {
                return Err(EngineError::Conflict(format!(
                    "rule {} is already registered",
                    rule.id
                )));
            }
        }
        rules.into_iter().map(|rule| self.register(rule)).collect()
    }

    /// Records one firing for a rule.
    pub fn record_fired(&mut self, rule_id: &RuleId, now: Timestamp) {
        if let Some(record) = self.rules.get_mut(rule_id) {
            record.stats.fire_count += 1;
            record.stats.last_fired = Some(now);
        }
    }

    /// Returns firing statistics for a rule.
    #[must_use]
    pub fn stats(&self, rule_id: &RuleId) -> Option<RuleStats> {
        self.rules.get(rule_id).map(|record| record.stats)
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Creates or replaces a group.
    pub fn set_group(&mut self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    /// Sets a group's enabled flag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the group does not exist.
    pub fn set_group_enabled(
        &mut self,
        group_id: &GroupId,
        enabled: bool,
    ) -> Result<Group, EngineError> {
        let Some(group) = self.groups.get_mut(group_id) else {
            return Err(EngineError::NotFound(format!("group {group_id}")));
        };
        group.enabled = enabled;
        Ok(group.clone())
    }

    /// Returns snapshots of every group in id order.
    #[must_use]
    pub fn groups(&self) -> Vec<Group> {
        self.groups.values().cloned().collect()
    }

    /// Returns true when the rule and its group (if any) are enabled.
    #[must_use]
    pub fn is_effectively_enabled(&self, rule: &Rule) -> bool {
        if !rule.enabled {
            return false;
        }
        match &rule.group {
            Some(group_id) => self
                .groups
                .get(group_id)
                .is_none_or(|group| group.enabled),
            None => true,
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Builds a record at the next registration order.
    fn next_record(&mut self, rule: Rule) -> Result<RuleRecord, EngineError> {
        let record = build_record(rule, self.next_order)?;
        self.next_order += 1;
        Ok(record)
    }

    /// Replaces a record's rule, preserving order and statistics.
    fn replace_record(&mut self, rule: Rule) -> Result<(), EngineError> {
        let Some(existing) = self.rules.remove(&rule.id) else {
            return Err(EngineError::NotFound(format!("rule {}", rule.id)));
        };
        let mut record = build_record(rule, existing.registration_order)?;
        record.stats = existing.stats;
        self.rules.insert(record.rule.id.clone(), record);
        Ok(())
    }

    /// Appends a version entry and persists the rule's history.
    fn append_entry(
        &mut self,
        snapshot: &Rule,
        change_type: ChangeType,
        rolled_back_from: Option<u64>,
    ) -> Result<(), EngineError> {
        let entry = RuleVersionEntry {
            version: snapshot.version,
            snapshot: snapshot.clone(),
            timestamp: self.clock.now(),
            change_type,
            rolled_back_from,
        };
        let entries = self.history.entry(snapshot.id.clone()).or_default();
        entries.push(entry);

        if let Some(adapter) = &self.adapter {
            let state = serde_json::to_value(&*entries)
                .map_err(|error| EngineError::Internal(error.to_string()))?;
            adapter.save(&format!("versions:{}", snapshot.id), &state)?;
        }
        Ok(())
    }

    /// Persists the active rule set, when an adapter is configured.
    fn persist_rules(&self) -> Result<(), EngineError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let state = serde_json::to_value(self.list())
            .map_err(|error| EngineError::Internal(error.to_string()))?;
        adapter.save(&self.persistence_key, &state)?;
        Ok(())
    }

    /// Persists everything; used at shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when a write fails.
    pub fn persist_all(&self) -> Result<(), EngineError> {
        self.persist_rules()?;
        if let Some(adapter) = &self.adapter {
            for (rule_id, entries) in &self.history {
                let state = serde_json::to_value(entries)
                    .map_err(|error| EngineError::Internal(error.to_string()))?;
                if let Err(error) = adapter.save(&format!("versions:{rule_id}"), &state) {
                    warn!(rule = %rule_id, %error, "failed to persist version history");
                }
            }
        }
        Ok(())
    }
}

/// Builds a record, compiling regexes and the trigger pattern.
fn build_record(rule: Rule, registration_order: u64) -> Result<RuleRecord, EngineError> {
    let mut regexes = BTreeMap::new();
    for pattern in rule.regex_patterns() {
        let compiled = Regex::new(&pattern).map_err(|error| {
            EngineError::Internal(format!("validated regex failed to compile: {error}"))
        })?;
        regexes.insert(pattern, compiled);
    }

    let trigger_pattern = match &rule.trigger {
        Trigger::Event { topic } => Some(parse_trigger(topic, TOPIC_SEPARATOR)?),
        Trigger::Fact { pattern } => Some(parse_trigger(pattern, FACT_SEPARATOR)?),
        Trigger::Timer { name } => Some(parse_trigger(name, FACT_SEPARATOR)?),
        Trigger::Temporal { .. } => None,
    };

    Ok(RuleRecord {
        rule,
        regexes,
        trigger_pattern,
        registration_order,
        stats: RuleStats::default(),
    })
}

/// Parses an already validated trigger pattern.
fn parse_trigger(raw: &str, separator: char) -> Result<Pattern, EngineError> {
    Pattern::parse(raw, separator).map_err(|error| {
        EngineError::Internal(format!("validated trigger pattern failed to parse: {error}"))
    })
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

    use std::sync::Arc;

    use serde_json::json;

    use super::RuleRegistry;
    use crate::core::ChangeType;
    use crate::core::EngineError;
    use crate::core::Group;
    use crate::core::GroupId;
    use crate::core::ManualClock;
    use crate::core::Rule;
    use crate::core::RuleId;
    use crate::core::Timestamp;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(
            Arc::new(ManualClock::starting_at(Timestamp::from_millis(1_000))),
            "rules",
        )
    }

    fn rule(id: &str, priority: i64) -> Rule {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("rule {id}"),
            "priority": priority,
            "trigger": {"kind": "event", "topic": "orders.created"}
        }))
        .unwrap()
    }

    #[test]
    fn register_assigns_version_one() {
        let mut registry = registry();
        let registered = registry.register(rule("r1", 0)).unwrap();
        assert_eq!(registered.version, 1);
        assert_eq!(registry.get(&RuleId::new("r1")).unwrap(), registered);
        let history = registry.history(&RuleId::new("r1")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, ChangeType::Registered);
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let mut registry = registry();
        registry.register(rule("r1", 0)).unwrap();
        assert!(matches!(
            registry.register(rule("r1", 0)),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn update_bumps_version_and_checks_expectations() {
        let mut registry = registry();
        registry.register(rule("r1", 0)).unwrap();
        let updated = registry.update(rule("r1", 10), Some(1)).unwrap();
        assert_eq!(updated.version, 2);
        assert!(matches!(
            registry.update(rule("r1", 20), Some(1)),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn rollback_restores_the_snapshot_and_tags_the_source() {
        let mut registry = registry();
        registry.register(rule("r1", 1)).unwrap();
        registry.update(rule("r1", 10), None).unwrap();
        let restored = registry.rollback(&RuleId::new("r1"), 1).unwrap();
        assert_eq!(restored.priority, 1);
        assert_eq!(restored.version, 3);

        let history = registry.history(&RuleId::new("r1")).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].change_type, ChangeType::RolledBack);
        assert_eq!(history[2].rolled_back_from, Some(2));
    }

    #[test]
    fn rollback_to_current_appends_one_entry_without_field_changes() {
        let mut registry = registry();
        registry.register(rule("r1", 1)).unwrap();
        registry.rollback(&RuleId::new("r1"), 1).unwrap();
        let diffs = registry.diff(&RuleId::new("r1"), 1, 2).unwrap();
        assert!(diffs.is_empty());
        assert_eq!(registry.history(&RuleId::new("r1")).unwrap().len(), 2);
    }

    #[test]
    fn versions_are_append_only_and_strictly_monotonic() {
        let mut registry = registry();
        registry.register(rule("r1", 0)).unwrap();
        registry.update(rule("r1", 1), None).unwrap();
        registry.set_enabled(&RuleId::new("r1"), false).unwrap();
        registry.set_enabled(&RuleId::new("r1"), true).unwrap();
        let history = registry.history(&RuleId::new("r1")).unwrap();
        let versions: Vec<u64> = history.iter().map(|entry| entry.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn group_disable_overrides_rule_enabled() {
        let mut registry = registry();
        let mut member = rule("r1", 0);
        member.group = Some(GroupId::new("g"));
        registry.register(member).unwrap();
        registry.set_group(Group {
            id: GroupId::new("g"),
            name: "group".to_string(),
            enabled: true,
        });

        let active = registry.get(&RuleId::new("r1")).unwrap();
        assert!(registry.is_effectively_enabled(&active));
        registry
            .set_group_enabled(&GroupId::new("g"), false)
            .unwrap();
        assert!(!registry.is_effectively_enabled(&active));
    }

    #[test]
    fn export_then_import_round_trips() {
        let mut original = registry();
        original.register(rule("r1", 1)).unwrap();
        original.register(rule("r2", 2)).unwrap();
        let exported = original.export();

        let mut fresh = registry();
        let imported = fresh.import(exported.clone()).unwrap();
        assert_eq!(imported.len(), 2);
        let normalize = |mut rules: Vec<Rule>| {
            for rule in &mut rules {
                rule.version = 0;
                rule.created_at = Timestamp::from_millis(0);
                rule.updated_at = Timestamp::from_millis(0);
            }
            rules
        };
        assert_eq!(normalize(exported), normalize(fresh.export()));
    }
}

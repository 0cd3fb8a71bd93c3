// ruleflow-core/src/runtime/pattern_index.rs
// ============================================================================
// Module: Ruleflow Trigger Index
// Description: Inverted index from trigger keys to candidate rules.
// Purpose: Resolve notifications to interested rules sub-linearly.
// Dependencies: crate::core, ruleflow-match
// ============================================================================

//! ## Overview
//! Each trigger kind indexes separately: event triggers by topic prefix,
//! fact triggers by key prefix, timer triggers by exact name with a scan
//! bucket for wildcard names, and temporal triggers by the union of topics
//! their patterns reference. Rebuilds are incremental on rule mutations; a
//! full rebuild happens only on startup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use ruleflow_match::Pattern;
use ruleflow_match::PatternIndex;

use crate::core::EngineError;
use crate::core::FACT_SEPARATOR;
use crate::core::Rule;
use crate::core::RuleId;
use crate::core::TOPIC_SEPARATOR;
use crate::core::Trigger;

// ============================================================================
// SECTION: Trigger Index
// ============================================================================

/// Inverted trigger index owned by the engine.
pub struct TriggerIndex {
    /// Event-trigger patterns over topics.
    events: PatternIndex<RuleId>,
    /// Fact-trigger patterns over keys.
    facts: PatternIndex<RuleId>,
    /// Timer triggers with exact names.
    timers_exact: BTreeMap<String, BTreeSet<RuleId>>,
    /// Timer triggers with wildcard names; scanned on lookup.
    timer_patterns: Vec<(Pattern, RuleId)>,
    /// Temporal-trigger topic patterns.
    temporal: PatternIndex<RuleId>,
}

impl TriggerIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: PatternIndex::new(TOPIC_SEPARATOR),
            facts: PatternIndex::new(FACT_SEPARATOR),
            timers_exact: BTreeMap::new(),
            timer_patterns: Vec::new(),
            temporal: PatternIndex::new(TOPIC_SEPARATOR),
        }
    }

    /// Indexes a rule's trigger.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] when a pattern that passed
    /// validation no longer parses; this indicates an invariant violation.
    pub fn add_rule(&mut self, rule: &Rule) -> Result<(), EngineError> {
        match &rule.trigger {
            Trigger::Event { topic } => {
                let pattern = parse_indexed(topic, TOPIC_SEPARATOR)?;
                self.events.insert(pattern, rule.id.clone());
            }
            Trigger::Fact { pattern } => {
                let pattern = parse_indexed(pattern, FACT_SEPARATOR)?;
                self.facts.insert(pattern, rule.id.clone());
            }
            Trigger::Timer { name } => {
                let pattern = parse_indexed(name, FACT_SEPARATOR)?;
                if pattern.is_exact() {
                    self.timers_exact
                        .entry(name.clone())
                        .or_default()
                        .insert(rule.id.clone());
                } else {
                    self.timer_patterns.push((pattern, rule.id.clone()));
                }
            }
            Trigger::Temporal { pattern } => {
                for topic in pattern.topics() {
                    let topic = parse_indexed(topic, TOPIC_SEPARATOR)?;
                    self.temporal.insert(topic, rule.id.clone());
                }
            }
        }
        Ok(())
    }

    /// Removes every index entry owned by the rule.
    pub fn remove_rule(&mut self, rule_id: &RuleId) {
        self.events.remove_owner(rule_id);
        self.facts.remove_owner(rule_id);
        self.timers_exact.retain(|_, owners| {
            owners.remove(rule_id);
            !owners.is_empty()
        });
        self.timer_patterns.retain(|(_, owner)| owner != rule_id);
        self.temporal.remove_owner(rule_id);
    }

    /// Rebuilds the index from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] when a stored rule fails to index.
    pub fn rebuild<'rules>(
        &mut self,
        rules: impl Iterator<Item = &'rules Rule>,
    ) -> Result<(), EngineError> {
        self.events.clear();
        self.facts.clear();
        self.timers_exact.clear();
        self.timer_patterns.clear();
        self.temporal.clear();
        for rule in rules {
            self.add_rule(rule)?;
        }
        Ok(())
    }

    /// Returns candidate rules for an event topic.
    #[must_use]
    pub fn candidates_for_event(&self, topic: &str) -> BTreeSet<RuleId> {
        self.events.candidates(topic)
    }

    /// Returns candidate rules for a fact key.
    #[must_use]
    pub fn candidates_for_fact(&self, key: &str) -> BTreeSet<RuleId> {
        self.facts.candidates(key)
    }

    /// Returns candidate rules for a timer name.
    #[must_use]
    pub fn candidates_for_timer(&self, name: &str) -> BTreeSet<RuleId> {
        let mut owners = self
            .timers_exact
            .get(name)
            .cloned()
            .unwrap_or_default();
        for (pattern, owner) in &self.timer_patterns {
            if pattern.matches(name) {
                owners.insert(owner.clone());
            }
        }
        owners
    }

    /// Returns temporal rules interested in an event topic.
    #[must_use]
    pub fn temporal_candidates(&self, topic: &str) -> BTreeSet<RuleId> {
        self.temporal.candidates(topic)
    }
}

impl Default for TriggerIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses an already validated pattern for indexing.
fn parse_indexed(raw: &str, separator: char) -> Result<Pattern, EngineError> {
    Pattern::parse(raw, separator).map_err(|error| {
        EngineError::Internal(format!("validated pattern failed to parse: {error}"))
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

    use serde_json::json;

    use super::TriggerIndex;
    use crate::core::Rule;
    use crate::core::RuleId;

    fn rule(id: &str, trigger: serde_json::Value) -> Rule {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "trigger": trigger
        }))
        .unwrap()
    }

    #[test]
    fn each_trigger_kind_indexes_separately() {
        let mut index = TriggerIndex::new();
        index
            .add_rule(&rule("e", json!({"kind": "event", "topic": "orders.*"})))
            .unwrap();
        index
            .add_rule(&rule("f", json!({"kind": "fact", "pattern": "customer:*:score"})))
            .unwrap();
        index
            .add_rule(&rule("t", json!({"kind": "timer", "name": "nightly"})))
            .unwrap();
        index
            .add_rule(&rule(
                "s",
                json!({"kind": "temporal", "pattern": {
                    "kind": "count",
                    "event": {"topic": "login.failed"},
                    "threshold": 3,
                    "withinMs": 60_000
                }}),
            ))
            .unwrap();

        assert!(index.candidates_for_event("orders.created").contains(&RuleId::new("e")));
        assert!(index.candidates_for_fact("customer:1:score").contains(&RuleId::new("f")));
        assert!(index.candidates_for_timer("nightly").contains(&RuleId::new("t")));
        assert!(index.temporal_candidates("login.failed").contains(&RuleId::new("s")));
        assert!(index.candidates_for_event("login.failed").is_empty());
    }

    #[test]
    fn wildcard_timer_names_fall_into_the_scan_bucket() {
        let mut index = TriggerIndex::new();
        index
            .add_rule(&rule("t", json!({"kind": "timer", "name": "order:*:deadline"})))
            .unwrap();
        assert!(
            index
                .candidates_for_timer("order:42:deadline")
                .contains(&RuleId::new("t"))
        );
        assert!(index.candidates_for_timer("order:deadline").is_empty());
    }

    #[test]
    fn remove_rule_clears_every_bucket() {
        let mut index = TriggerIndex::new();
        let indexed = rule("e", json!({"kind": "event", "topic": "a.*"}));
        index.add_rule(&indexed).unwrap();
        index.remove_rule(&indexed.id);
        assert!(index.candidates_for_event("a.b").is_empty());
    }
}

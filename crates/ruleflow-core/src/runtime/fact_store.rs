// ruleflow-core/src/runtime/fact_store.rs
// ============================================================================
// Module: Ruleflow Fact Store
// Description: Versioned key/value store with wildcard pattern queries.
// Purpose: Own fact state and produce change records for the scheduler.
// Dependencies: crate::core, ruleflow-match
// ============================================================================

//! ## Overview
//! The fact store owns all fact records. Mutations stamp the injected clock,
//! bump per-key versions, and return a [`FactChange`] the scheduler turns
//! into a dispatch notification. Deletion removes the record entirely so a
//! later set restarts its version at 1. Iteration order is deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use ruleflow_match::Pattern;
use serde_json::Value;

use crate::core::EngineError;
use crate::core::FACT_SEPARATOR;
use crate::core::Fact;
use crate::core::FactChange;
use crate::core::SharedClock;

// ============================================================================
// SECTION: Fact Store
// ============================================================================

/// Versioned fact store owned by the engine.
pub struct FactStore {
    /// Fact records keyed by fact key.
    facts: BTreeMap<String, Fact>,
    /// Injected time source for `updated_at` stamps.
    clock: SharedClock,
}

impl FactStore {
    /// Creates an empty fact store using the injected clock.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            facts: BTreeMap::new(),
            clock,
        }
    }

    /// Returns the fact stored under the key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Fact> {
        self.facts.get(key)
    }

    /// Sets a fact, creating version 1 or bumping the existing version.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the key is empty.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(Fact, FactChange), EngineError> {
        if key.is_empty() {
            return Err(EngineError::Validation(
                "fact key must not be empty".to_string(),
            ));
        }

        let old_value = self.facts.get(key).map(|fact| fact.value.clone());
        let version = self.facts.get(key).map_or(1, |fact| fact.version + 1);
        let fact = Fact {
            key: key.to_string(),
            value: value.clone(),
            updated_at: self.clock.now(),
            version,
        };
        self.facts.insert(key.to_string(), fact.clone());

        let change = FactChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
            version,
        };
        Ok((fact, change))
    }

    /// Deletes a fact, returning the change record when the key existed.
    pub fn delete(&mut self, key: &str) -> Option<FactChange> {
        self.facts.remove(key).map(|removed| FactChange {
            key: key.to_string(),
            old_value: Some(removed.value),
            new_value: None,
            version: removed.version,
        })
    }

    /// Returns snapshots of every stored fact in key order.
    #[must_use]
    pub fn all(&self) -> Vec<Fact> {
        self.facts.values().cloned().collect()
    }

    /// Returns snapshots of facts whose keys match the pattern.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the pattern is malformed.
    pub fn query(&self, pattern: &str) -> Result<Vec<Fact>, EngineError> {
        let pattern = Pattern::parse(pattern, FACT_SEPARATOR)
            .map_err(|error| EngineError::Validation(error.to_string()))?;
        if pattern.is_exact() {
            return Ok(self.facts.get(pattern.as_str()).cloned().into_iter().collect());
        }
        Ok(self
            .facts
            .values()
            .filter(|fact| pattern.matches(&fact.key))
            .cloned()
            .collect())
    }

    /// Returns the value of the first fact matching the pattern, in key order.
    #[must_use]
    pub fn first_match(&self, pattern: &Pattern) -> Option<&Fact> {
        if pattern.is_exact() {
            return self.facts.get(pattern.as_str());
        }
        self.facts.values().find(|fact| pattern.matches(&fact.key))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

// ruleflow-core/src/core/observe.rs
// ============================================================================
// Module: Ruleflow Observations
// Description: Observability hook records and metrics snapshots.
// Purpose: Name the closed set of dispatch observations fed to sinks.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! The dispatcher emits a closed set of observations covering rule matching,
//! firing, durations, action outcomes, timeouts, and aborted causation
//! chains. Sinks receive them one at a time; the engine also keeps cheap
//! counters readable as a snapshot, with per-rule labels capped by config.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RuleId;

// ============================================================================
// SECTION: Observations
// ============================================================================

/// One dispatch observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Observation {
    /// A rule's trigger and conditions matched.
    RuleMatched {
        /// Matching rule.
        rule_id: RuleId,
    },
    /// A rule's actions executed.
    RuleFired {
        /// Fired rule.
        rule_id: RuleId,
    },
    /// Wall-clock duration of one rule evaluation and firing.
    RuleEvaluationDuration {
        /// Evaluated rule.
        rule_id: RuleId,
        /// Elapsed milliseconds.
        millis: u64,
    },
    /// An action completed successfully.
    ActionExecuted {
        /// Owning rule.
        rule_id: RuleId,
        /// Action kind label.
        action: String,
    },
    /// An action failed; dispatch continued.
    ActionFailed {
        /// Owning rule.
        rule_id: RuleId,
        /// Action kind label.
        action: String,
        /// Failure description.
        message: String,
    },
    /// A rule exceeded its evaluation budget.
    RuleTimeout {
        /// Offending rule.
        rule_id: RuleId,
        /// Elapsed milliseconds.
        millis: u64,
    },
    /// A dispatch chain exceeded the causation-depth bound and was aborted.
    CausationDepthExceeded {
        /// Depth the chain reached.
        depth: u32,
    },
}

impl Observation {
    /// Returns the stable dotted observation name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RuleMatched { .. } => "rule.matched",
            Self::RuleFired { .. } => "rule.fired",
            Self::RuleEvaluationDuration { .. } => "rule.evaluation.duration",
            Self::ActionExecuted { .. } => "action.executed",
            Self::ActionFailed { .. } => "action.failed",
            Self::RuleTimeout { .. } => "rule.timeout",
            Self::CausationDepthExceeded { .. } => "rule.causation.exceeded",
        }
    }

    /// Returns the rule the observation concerns, when any.
    #[must_use]
    pub const fn rule_id(&self) -> Option<&RuleId> {
        match self {
            Self::RuleMatched { rule_id }
            | Self::RuleFired { rule_id }
            | Self::RuleEvaluationDuration { rule_id, .. }
            | Self::ActionExecuted { rule_id, .. }
            | Self::ActionFailed { rule_id, .. }
            | Self::RuleTimeout { rule_id, .. } => Some(rule_id),
            Self::CausationDepthExceeded { .. } => None,
        }
    }
}

// ============================================================================
// SECTION: Metrics Snapshot
// ============================================================================

/// Point-in-time counter snapshot readable from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Engine name the counters belong to.
    pub engine: String,
    /// Counters keyed by observation name.
    pub counters: BTreeMap<String, u64>,
    /// Per-rule firing counters, present when per-rule metrics are enabled.
    pub fired_by_rule: BTreeMap<String, u64>,
}

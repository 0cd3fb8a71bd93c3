// ruleflow-core/src/core/notification.rs
// ============================================================================
// Module: Ruleflow Notifications
// Description: Internal dispatch-queue entries and external stream records.
// Purpose: Define the message shapes flowing through and out of the engine.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Internal notifications are the serialising currency of the dispatcher:
//! every event, fact change, timer fire, and temporal match becomes one queue
//! entry processed to completion before the next. External subscribers see a
//! flattened stream record delivered only after the dispatch cycle finishes,
//! so they always observe post-action state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::event::Event;
use crate::core::fact::FactChange;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::RuleId;
use crate::core::time::Timestamp;
use crate::core::timer::TimerFire;

// ============================================================================
// SECTION: Internal Notifications
// ============================================================================

/// Internal dispatch-queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An event entered the engine.
    EventEmitted(Event),
    /// A fact mutation committed.
    FactChanged(FactChange),
    /// A timer expired.
    TimerFired(TimerFire),
    /// A temporal pattern completed.
    TemporalMatched(TemporalMatch),
}

/// Temporal pattern kinds, used in match records and stream payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemporalKind {
    /// Ordered sequence completion.
    Sequence,
    /// Absence deadline expiry.
    Absence,
    /// Count threshold crossing.
    Count,
    /// Aggregate threshold crossing.
    Aggregate,
}

/// Completed temporal pattern match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalMatch {
    /// Rule owning the pattern.
    pub rule_id: RuleId,
    /// Grouping key the match occurred under; empty for the global key.
    pub group_key: String,
    /// Pattern kind.
    pub kind: TemporalKind,
    /// Events involved in the match: all matched events for sequences, the
    /// initiating event for absences, the latest event for counts and
    /// aggregates.
    pub events: Vec<Event>,
    /// Count or aggregate value at the moment of the match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Correlation inherited from the first involved event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

// ============================================================================
// SECTION: External Stream Records
// ============================================================================

/// External stream record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    /// An event completed dispatch.
    #[serde(rename = "event")]
    Event,
    /// A fact mutation completed dispatch.
    #[serde(rename = "fact.changed")]
    FactChanged,
    /// A timer fire completed dispatch.
    #[serde(rename = "timer.fired")]
    TimerFired,
    /// A rule fired.
    #[serde(rename = "rule.fired")]
    RuleFired,
    /// A rule matched.
    #[serde(rename = "rule.matched")]
    RuleMatched,
}

/// Record delivered to external stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamNotification {
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: StreamKind,
    /// Kind-specific payload.
    pub payload: Value,
    /// When the record was produced.
    pub timestamp: Timestamp,
}

// ruleflow-core/src/core/timer.rs
// ============================================================================
// Module: Ruleflow Timers
// Description: Named timer records and fire notifications.
// Purpose: Define armed timer state and the payload delivered on expiry.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Timers are named one-shot or recurring armings. Re-arming an existing
//! name replaces the prior arming. The stored context snapshot travels with
//! the fire notification so triggered rules see the binding that armed them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::RuleId;
use crate::core::identifiers::TimerName;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Timer Record
// ============================================================================

/// Armed timer record.
///
/// # Invariants
/// - `name` is unique while armed.
/// - `armed_seq` preserves arming order for simultaneous fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    /// Timer name.
    pub name: TimerName,
    /// Scheduled fire time.
    pub fire_at: Timestamp,
    /// Re-arm interval for recurring timers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// Rule that armed the timer, when armed by an action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    /// Context snapshot restored into the firing binding.
    #[serde(default)]
    pub context: Value,
    /// Arming sequence used to break fire-time ties.
    pub armed_seq: u64,
}

// ============================================================================
// SECTION: Timer Fire Notification
// ============================================================================

/// Notification produced when a timer expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerFire {
    /// Name of the fired timer.
    pub name: TimerName,
    /// The fire time the arming scheduled.
    pub scheduled_for: Timestamp,
    /// Context snapshot stored at arming.
    #[serde(default)]
    pub context: Value,
    /// Rule that armed the timer, when armed by an action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
}

// ruleflow-core/src/core/fact.rs
// ============================================================================
// Module: Ruleflow Facts
// Description: Versioned fact records and change notifications.
// Purpose: Define the fact shape and the change record fed to the scheduler.
// Dependencies: crate::core::time, serde
// ============================================================================

//! ## Overview
//! Facts are versioned key/value records. Every successful mutation produces
//! a [`FactChange`] handed to the engine scheduler; deletion removes the
//! record entirely so a later set restarts its version at 1.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Fact Record
// ============================================================================

/// Versioned fact record.
///
/// # Invariants
/// - `version` starts at 1 on creation and increments on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    /// Colon-segmented fact key.
    pub key: String,
    /// Fact value.
    pub value: Value,
    /// Timestamp of the last mutation.
    pub updated_at: Timestamp,
    /// Per-key monotonic version counter.
    pub version: u64,
}

// ============================================================================
// SECTION: Fact Change Notification
// ============================================================================

/// Change record produced by a fact mutation.
///
/// # Invariants
/// - `new_value` is `None` exactly when the mutation was a deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactChange {
    /// Mutated fact key.
    pub key: String,
    /// Value before the mutation, when the key existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after the mutation, absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Version of the record the mutation produced or removed.
    pub version: u64,
}

// ruleflow-core/src/core/event.rs
// ============================================================================
// Module: Ruleflow Events
// Description: Immutable event records flowing through the engine.
// Purpose: Define the event shape with correlation and causation metadata.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Events are immutable once emitted. The event bus assigns the identifier
//! and timestamp; correlation identifiers tag causally related chains and are
//! inherited through `causation_id` links when actions emit further events.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::EventId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Record
// ============================================================================

/// Immutable event record.
///
/// # Invariants
/// - `id` is unique per engine and never reused.
/// - `causation_id`, when present, references a previously emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Engine-assigned event identifier.
    pub id: EventId,
    /// Dot-segmented event topic.
    pub topic: String,
    /// Event payload object.
    pub data: Value,
    /// Emission timestamp.
    pub timestamp: Timestamp,
    /// Correlation identifier shared across a causal chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Identifier of the event that caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,
    /// Optional origin label supplied by the emitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

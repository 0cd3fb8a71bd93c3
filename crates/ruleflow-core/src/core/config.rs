// ruleflow-core/src/core/config.rs
// ============================================================================
// Module: Ruleflow Engine Configuration
// Description: Recognised engine options with documented defaults.
// Purpose: Configure dispatch limits, retries, persistence keys, and metrics.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Engine behavior is configured up front and never changes at runtime.
//! Storage adapters are wired through the engine builder rather than the
//! config, which keeps this struct serializable for transports that accept
//! configuration documents.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Engine Configuration
// ============================================================================

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Engine identifier used in observation labels.
    pub name: String,
    /// Storage key for rule persistence.
    #[serde(default = "default_persistence_key")]
    pub persistence_key: String,
    /// Cadence of the durable-timer due check, in milliseconds.
    #[serde(default = "default_timer_check_interval_ms")]
    pub timer_check_interval_ms: u64,
    /// Causation-depth bound aborting runaway dispatch chains.
    #[serde(default = "default_max_causation_depth")]
    pub max_causation_depth: u32,
    /// Per-rule evaluation budget, in milliseconds.
    #[serde(default = "default_rule_timeout_ms")]
    pub default_rule_timeout_ms: u64,
    /// Webhook retry policy.
    #[serde(default)]
    pub webhook_retry: WebhookRetryConfig,
    /// Cadence of the temporal window sweep, in milliseconds.
    #[serde(default = "default_temporal_cleanup_interval_ms")]
    pub temporal_cleanup_interval_ms: u64,
    /// Metrics labeling options.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Capacity of the bounded ingress channel feeding the dispatcher.
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    /// Default shutdown behavior.
    #[serde(default)]
    pub stop_mode: StopMode,
}

impl EngineConfig {
    /// Creates a configuration with the documented defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistence_key: default_persistence_key(),
            timer_check_interval_ms: default_timer_check_interval_ms(),
            max_causation_depth: default_max_causation_depth(),
            default_rule_timeout_ms: default_rule_timeout_ms(),
            webhook_retry: WebhookRetryConfig::default(),
            temporal_cleanup_interval_ms: default_temporal_cleanup_interval_ms(),
            metrics: MetricsConfig::default(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            stop_mode: StopMode::default(),
        }
    }
}

/// Serde default for the rule persistence key.
fn default_persistence_key() -> String {
    "rules".to_string()
}

/// Serde default for the timer due-check cadence.
const fn default_timer_check_interval_ms() -> u64 {
    1_000
}

/// Serde default for the causation-depth bound.
const fn default_max_causation_depth() -> u32 {
    32
}

/// Serde default for the per-rule evaluation budget.
const fn default_rule_timeout_ms() -> u64 {
    5_000
}

/// Serde default for the temporal sweep cadence.
const fn default_temporal_cleanup_interval_ms() -> u64 {
    1_000
}

/// Serde default for the ingress channel capacity.
const fn default_dispatch_queue_capacity() -> usize {
    1_024
}

// ============================================================================
// SECTION: Webhook Retry Policy
// ============================================================================

/// Webhook retry policy with exponential backoff and jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRetryConfig {
    /// Total delivery attempts.
    pub attempts: u32,
    /// Base backoff delay, in milliseconds.
    pub base_ms: u64,
    /// Backoff multiplier applied per attempt.
    pub factor: f64,
    /// Jitter applied to each delay, as a ± ratio.
    pub jitter_ratio: f64,
    /// Per-request timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for WebhookRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_ms: 200,
            factor: 2.0,
            jitter_ratio: 0.25,
            timeout_ms: 10_000,
        }
    }
}

// ============================================================================
// SECTION: Metrics Options
// ============================================================================

/// Metrics labeling options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Track per-rule firing counters.
    pub per_rule_metrics: bool,
    /// Upper bound on distinct rule labels.
    pub max_labeled_rules: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            per_rule_metrics: false,
            max_labeled_rules: 100,
        }
    }
}

// ============================================================================
// SECTION: Stop Modes
// ============================================================================

/// Shutdown behavior for the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopMode {
    /// Finish queued work, then stop.
    #[default]
    DrainThenStop,
    /// Stop immediately, abandoning queued work.
    StopNow,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

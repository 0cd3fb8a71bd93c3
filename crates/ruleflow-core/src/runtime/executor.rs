// ruleflow-core/src/runtime/executor.rs
// ============================================================================
// Module: Ruleflow Action Executor
// Description: Sequential action execution with template expansion.
// Purpose: Turn action lists into store effects and delivery jobs.
// Dependencies: crate::core, crate::interfaces, rand, url
// ============================================================================

//! ## Overview
//! Actions run sequentially in declared order within one firing. Each action
//! is template-expanded against the binding scope first. The executor never
//! mutates stores directly: it emits effect records the scheduler applies,
//! which keeps the engine, stores, and executor free of re-entrant calls.
//! Per-action failures are captured in the firing record and do not stop
//! later actions unless the rule opts in.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::Rng;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::core::Action;
use crate::core::LogLevel;
use crate::core::Rule;
use crate::core::RuleId;
use crate::core::TimerName;
use crate::core::WebhookRetryConfig;
use crate::core::template;
use crate::interfaces::WebhookRequest;

// ============================================================================
// SECTION: Outcomes And Effects
// ============================================================================

/// Result of one action within a firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Position of the action in the rule's action list.
    pub index: usize,
    /// Stable action kind label.
    pub action: &'static str,
    /// Whether the action expanded and staged successfully.
    pub success: bool,
    /// Failure description, when unsuccessful.
    pub error: Option<String>,
}

/// Store effect staged by an action, applied by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEffect {
    /// Set a fact.
    SetFact {
        /// Expanded fact key.
        key: String,
        /// Expanded fact value.
        value: Value,
    },
    /// Delete a fact.
    DeleteFact {
        /// Expanded fact key.
        key: String,
    },
    /// Emit an event.
    EmitEvent {
        /// Expanded topic.
        topic: String,
        /// Expanded payload.
        data: Value,
    },
    /// Arm a timer.
    StartTimer {
        /// Expanded timer name.
        name: TimerName,
        /// Delay until the fire.
        duration_ms: u64,
        /// Re-arm after each fire.
        recurring: bool,
    },
    /// Cancel a timer.
    CancelTimer {
        /// Expanded timer name.
        name: TimerName,
    },
    /// Deliver a webhook outside the dispatch loop.
    Webhook(WebhookJob),
}

/// Webhook delivery job handed to the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookJob {
    /// Rule that staged the delivery.
    pub rule_id: RuleId,
    /// Fully expanded request.
    pub request: WebhookRequest,
}

// ============================================================================
// SECTION: Action Executor
// ============================================================================

/// Stateless executor configured with the webhook retry policy.
pub struct ActionExecutor {
    /// Retry policy copied into staged webhook jobs.
    retry: WebhookRetryConfig,
}

impl ActionExecutor {
    /// Creates an executor with the provided retry policy.
    #[must_use]
    pub const fn new(retry: WebhookRetryConfig) -> Self {
        Self { retry }
    }

    /// Executes a rule's actions against the binding scope.
    ///
    /// Returns per-action outcomes and the staged effects in action order.
    #[must_use]
    pub fn execute(
        &self,
        rule: &Rule,
        scope: &Value,
        captures: &[String],
    ) -> (Vec<ActionOutcome>, Vec<ActionEffect>) {
        let mut outcomes = Vec::with_capacity(rule.actions.len());
        let mut effects = Vec::new();

        for (index, action) in rule.actions.iter().enumerate() {
            let staged = self.stage(action, scope, captures);
            let outcome = match staged {
                Ok(effect) => {
                    if let Some(effect) = effect {
                        effects.push(effect);
                    }
                    ActionOutcome {
                        index,
                        action: action.kind(),
                        success: true,
                        error: None,
                    }
                }
                Err(message) => ActionOutcome {
                    index,
                    action: action.kind(),
                    success: false,
                    error: Some(message),
                },
            };
            let failed = !outcome.success;
            outcomes.push(outcome);
            if failed && rule.options.stop_on_action_error {
                break;
            }
        }

        (outcomes, effects)
    }

    /// Expands and stages one action.
    fn stage(
        &self,
        action: &Action,
        scope: &Value,
        captures: &[String],
    ) -> Result<Option<ActionEffect>, String> {
        match action {
            Action::SetFact { key, value } => {
                let key = expand_required(key, scope, captures, "fact key")?;
                Ok(Some(ActionEffect::SetFact {
                    key,
                    value: template::expand_value(value, scope, captures),
                }))
            }
            Action::DeleteFact { key } => {
                let key = expand_required(key, scope, captures, "fact key")?;
                Ok(Some(ActionEffect::DeleteFact { key }))
            }
            Action::EmitEvent { topic, data } => {
                let topic = expand_required(topic, scope, captures, "event topic")?;
                Ok(Some(ActionEffect::EmitEvent {
                    topic,
                    data: template::expand_value(data, scope, captures),
                }))
            }
            Action::StartTimer {
                name,
                duration_ms,
                recurring,
            } => {
                let name = expand_required(name, scope, captures, "timer name")?;
                Ok(Some(ActionEffect::StartTimer {
                    name: TimerName::new(name),
                    duration_ms: *duration_ms,
                    recurring: *recurring,
                }))
            }
            Action::CancelTimer { name } => {
                let name = expand_required(name, scope, captures, "timer name")?;
                Ok(Some(ActionEffect::CancelTimer {
                    name: TimerName::new(name),
                }))
            }
            Action::CallWebhook {
                url,
                method,
                headers,
                body,
            } => {
                let expanded_url = expand_required(url, scope, captures, "webhook url")?;
                url::Url::parse(&expanded_url)
                    .map_err(|error| format!("webhook url {expanded_url:?} is invalid: {error}"))?;
                let headers = headers
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.clone(),
                            template::expand_str(value, scope, captures),
                        )
                    })
                    .collect();
                let body = body
                    .as_ref()
                    .map(|body| template::expand_value(body, scope, captures));
                Ok(Some(ActionEffect::Webhook(WebhookJob {
                    rule_id: rule_id_from_scope(scope),
                    request: WebhookRequest {
                        url: expanded_url,
                        method: *method,
                        headers,
                        body,
                        timeout_ms: self.retry.timeout_ms,
                    },
                })))
            }
            Action::Log { level, message } => {
                let message = template::expand_str(message, scope, captures);
                emit_log(*level, &message);
                Ok(None)
            }
        }
    }
}

/// Expands a template and rejects empty results for required fields.
fn expand_required(
    text: &str,
    scope: &Value,
    captures: &[String],
    field: &str,
) -> Result<String, String> {
    let expanded = template::expand_str(text, scope, captures);
    if expanded.is_empty() {
        return Err(format!("{field} expanded to an empty string"));
    }
    Ok(expanded)
}

/// Reads the rule identifier back out of the binding scope.
fn rule_id_from_scope(scope: &Value) -> RuleId {
    template::resolve_path(scope, "rule.id")
        .and_then(Value::as_str)
        .map_or_else(|| RuleId::new("unknown"), RuleId::new)
}

/// Emits a log action at the requested level.
fn emit_log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => trace!(target: "ruleflow::action", "{message}"),
        LogLevel::Debug => debug!(target: "ruleflow::action", "{message}"),
        LogLevel::Info => info!(target: "ruleflow::action", "{message}"),
        LogLevel::Warn => warn!(target: "ruleflow::action", "{message}"),
        LogLevel::Error => error!(target: "ruleflow::action", "{message}"),
    }
}

// ============================================================================
// SECTION: Retry Backoff
// ============================================================================

/// Computes the jittered backoff delays between webhook attempts.
///
/// Returns `attempts - 1` delays in milliseconds.
#[must_use]
pub fn backoff_delays(retry: &WebhookRetryConfig, rng: &mut impl Rng) -> Vec<u64> {
    let attempts = retry.attempts.max(1);
    let mut delays = Vec::with_capacity(attempts as usize - 1);
    let mut delay = retry.base_ms as f64;
    for _ in 1 .. attempts {
        let jitter = if retry.jitter_ratio > 0.0 {
            rng.gen_range(-retry.jitter_ratio ..= retry.jitter_ratio)
        } else {
            0.0
        };
        let jittered = (delay * (1.0 + jitter)).max(0.0);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "Delays are clamped non-negative and far below u64 range."
        )]
        delays.push(jittered.round() as u64);
        delay *= retry.factor;
    }
    delays
}

// ============================================================================
// SECTION: Tests
// ============================================================================

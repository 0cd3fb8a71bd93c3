// ruleflow-core/src/core/rule.rs
// ============================================================================
// Module: Ruleflow Rule Specification
// Description: Rule, trigger, temporal pattern, and action definitions.
// Purpose: Define canonical rule documents with validation helpers.
// Dependencies: crate::core::{condition, identifiers, time}, ruleflow-match, serde, regex, url
// ============================================================================

//! ## Overview
//! Rules pair exactly one trigger with an ordered condition list and an
//! ordered action list. Rule documents are untrusted input: registration
//! validates the trigger grammar, the condition operator arity, regex
//! compilation, and action fields before any state mutates. Template
//! references that cannot resolve in principle surface as warnings rather
//! than errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use ruleflow_match::Pattern;
use ruleflow_match::PatternError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::condition::Condition;
use crate::core::condition::ConditionLeaf;
use crate::core::condition::ConditionValue;
use crate::core::condition::GroupOperator;
use crate::core::condition::Operator;
use crate::core::identifiers::GroupId;
use crate::core::identifiers::RuleId;
use crate::core::template;
use crate::core::time::Timestamp;

/// Separator used by fact keys and timer names.
pub const FACT_SEPARATOR: char = ':';

/// Separator used by event topics.
pub const TOPIC_SEPARATOR: char = '.';

// ============================================================================
// SECTION: Rule Document
// ============================================================================

/// Canonical rule document.
///
/// # Invariants
/// - `id` is unique process-wide.
/// - `version` increments on every mutation and never resets.
/// - Disabled rules never fire but remain indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule identifier.
    pub id: RuleId,
    /// Human-readable rule name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Evaluation priority; higher fires first.
    #[serde(default)]
    pub priority: i64,
    /// Whether the rule may fire.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Monotonic version assigned by the registry.
    #[serde(default)]
    pub version: u64,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Optional group membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    /// The single trigger.
    pub trigger: Trigger,
    /// Ordered condition list; empty evaluates to true.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Ordered action list.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Execution options.
    #[serde(default)]
    pub options: RuleOptions,
    /// Creation timestamp assigned by the registry.
    #[serde(default = "Timestamp::default_epoch")]
    pub created_at: Timestamp,
    /// Last-mutation timestamp assigned by the registry.
    #[serde(default = "Timestamp::default_epoch")]
    pub updated_at: Timestamp,
}

/// Serde default for `enabled`.
const fn default_enabled() -> bool {
    true
}

/// Per-rule execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOptions {
    /// Stop executing remaining actions after the first failure.
    #[serde(default)]
    pub stop_on_action_error: bool,
}

// ============================================================================
// SECTION: Triggers
// ============================================================================

/// Rule trigger variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Trigger {
    /// Fires on events whose topic matches the pattern.
    Event {
        /// Dot-segmented topic pattern; `*` matches one segment.
        topic: String,
    },
    /// Fires on fact changes whose key matches the pattern.
    Fact {
        /// Colon-segmented key pattern; `*` matches one segment.
        pattern: String,
    },
    /// Fires on timer expirations whose name matches.
    Timer {
        /// Exact timer name or colon-segmented pattern.
        name: String,
    },
    /// Fires on temporal pattern completion.
    Temporal {
        /// Windowed temporal pattern.
        pattern: TemporalPattern,
    },
}

// ============================================================================
// SECTION: Temporal Patterns
// ============================================================================

/// Event matcher used inside temporal patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPattern {
    /// Dot-segmented topic pattern.
    pub topic: String,
    /// Optional equality filter over event data fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<BTreeMap<String, Value>>,
}

/// Count threshold operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CountOp {
    /// Count reached or exceeded the threshold.
    #[default]
    #[serde(rename = ">=")]
    Gte,
    /// Count strictly exceeded the threshold.
    #[serde(rename = ">")]
    Gt,
    /// Count equals the threshold exactly.
    #[serde(rename = "==")]
    Eq,
}

/// Rolling aggregators for windowed aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregator {
    /// Sum of the field over the window.
    Sum,
    /// Mean of the field over the window.
    Avg,
    /// Minimum of the field over the window.
    Min,
    /// Maximum of the field over the window.
    Max,
    /// Number of matching events in the window.
    Count,
}

/// Threshold comparison operators for aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// Aggregate strictly above the threshold.
    #[serde(rename = ">")]
    Gt,
    /// Aggregate at or above the threshold.
    #[serde(rename = ">=")]
    Gte,
    /// Aggregate strictly below the threshold.
    #[serde(rename = "<")]
    Lt,
    /// Aggregate at or below the threshold.
    #[serde(rename = "<=")]
    Lte,
    /// Aggregate equals the threshold.
    #[serde(rename = "==")]
    Eq,
    /// Aggregate differs from the threshold.
    #[serde(rename = "!=")]
    Ne,
}

/// Windowed temporal pattern variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TemporalPattern {
    /// Ordered event sequence completing within the window.
    #[serde(rename_all = "camelCase")]
    Sequence {
        /// Patterns matched in order; each first-step match opens an instance.
        events: Vec<EventPattern>,
        /// Window measured from the first matched event.
        within_ms: u64,
        /// Optional event-data field keying independent automatons.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
    /// Expected event failing to arrive within the window.
    #[serde(rename_all = "camelCase")]
    Absence {
        /// The event whose absence fires the pattern.
        event: EventPattern,
        /// Deadline window.
        within_ms: u64,
        /// Optional initiating event arming the deadline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<EventPattern>,
        /// Optional event-data field keying independent deadlines.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
    /// Sliding count crossing a threshold.
    #[serde(rename_all = "camelCase")]
    Count {
        /// Counted event pattern.
        event: EventPattern,
        /// Threshold the count is compared against.
        threshold: u64,
        /// Sliding window length.
        within_ms: u64,
        /// Threshold operator; defaults to `>=`.
        #[serde(default)]
        op: CountOp,
        /// Fire on every satisfying event instead of once per window.
        #[serde(default)]
        repeat: bool,
        /// Optional event-data field keying independent windows.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
    /// Rolling aggregate crossing a threshold.
    #[serde(rename_all = "camelCase")]
    Aggregate {
        /// Aggregated event pattern.
        event: EventPattern,
        /// Dotted path of the aggregated data field.
        field: String,
        /// Rolling aggregator.
        aggregator: Aggregator,
        /// Threshold operator.
        op: CompareOp,
        /// Threshold value.
        value: f64,
        /// Sliding window length.
        within_ms: u64,
        /// Optional event-data field keying independent windows.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_by: Option<String>,
    },
}

impl TemporalPattern {
    /// Returns the union of topic patterns referenced by the pattern.
    #[must_use]
    pub fn topics(&self) -> Vec<&str> {
        match self {
            Self::Sequence { events, .. } => {
                events.iter().map(|event| event.topic.as_str()).collect()
            }
            Self::Absence { event, after, .. } => {
                let mut topics = vec![event.topic.as_str()];
                if let Some(after) = after {
                    topics.push(after.topic.as_str());
                }
                topics
            }
            Self::Count { event, .. } | Self::Aggregate { event, .. } => {
                vec![event.topic.as_str()]
            }
        }
    }

    /// Returns the window length in milliseconds.
    #[must_use]
    pub const fn window_ms(&self) -> u64 {
        match self {
            Self::Sequence { within_ms, .. }
            | Self::Absence { within_ms, .. }
            | Self::Count { within_ms, .. }
            | Self::Aggregate { within_ms, .. } => *within_ms,
        }
    }

    /// Returns the grouping field, when configured.
    #[must_use]
    pub fn group_by(&self) -> Option<&str> {
        match self {
            Self::Sequence { group_by, .. }
            | Self::Absence { group_by, .. }
            | Self::Count { group_by, .. }
            | Self::Aggregate { group_by, .. } => group_by.as_deref(),
        }
    }
}

// ============================================================================
// SECTION: Actions
// ============================================================================

/// HTTP methods accepted by webhook actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP GET.
    Get,
    /// HTTP POST.
    Post,
    /// HTTP PUT.
    Put,
    /// HTTP PATCH.
    Patch,
    /// HTTP DELETE.
    Delete,
}

/// Log levels accepted by the log action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level detail.
    Trace,
    /// Debug-level detail.
    Debug,
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// Closed action set executed on rule firing.
///
/// All string fields accept `{{path}}` template expansion and `$n` wildcard
/// captures from the trigger match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Action {
    /// Sets a fact, creating or bumping its version.
    SetFact {
        /// Target fact key.
        key: String,
        /// Value to store; string leaves are template-expanded.
        value: Value,
    },
    /// Deletes a fact.
    DeleteFact {
        /// Target fact key.
        key: String,
    },
    /// Emits a new event into the dispatch queue.
    EmitEvent {
        /// Target topic.
        topic: String,
        /// Event payload; string leaves are template-expanded.
        data: Value,
    },
    /// Arms a named timer, replacing any prior arming.
    #[serde(rename_all = "camelCase")]
    StartTimer {
        /// Timer name.
        name: String,
        /// Delay until the fire, in milliseconds.
        duration_ms: u64,
        /// Re-arm after each fire.
        #[serde(default)]
        recurring: bool,
    },
    /// Cancels a named timer.
    CancelTimer {
        /// Timer name.
        name: String,
    },
    /// Delivers a payload to an external HTTP endpoint with retries.
    CallWebhook {
        /// Target URL.
        url: String,
        /// HTTP method.
        method: HttpMethod,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        /// Optional JSON body; string leaves are template-expanded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    /// Writes a structured log line.
    Log {
        /// Log level.
        level: LogLevel,
        /// Message template.
        message: String,
    },
}

impl Action {
    /// Returns the stable kind label used in observations and records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SetFact { .. } => "setFact",
            Self::DeleteFact { .. } => "deleteFact",
            Self::EmitEvent { .. } => "emitEvent",
            Self::StartTimer { .. } => "startTimer",
            Self::CancelTimer { .. } => "cancelTimer",
            Self::CallWebhook { .. } => "callWebhook",
            Self::Log { .. } => "log",
        }
    }
}

// ============================================================================
// SECTION: Groups
// ============================================================================

/// Rule group toggling member rules collectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group identifier.
    pub id: GroupId,
    /// Human-readable group name.
    pub name: String,
    /// Whether member rules may fire.
    pub enabled: bool,
}

// ============================================================================
// SECTION: Validation Errors
// ============================================================================

/// Rule document validation errors.
#[derive(Debug, Error)]
pub enum RuleSpecError {
    /// Rule identifier was empty.
    #[error("rule id must not be empty")]
    EmptyRuleId,
    /// Rule name was empty.
    #[error("rule name must not be empty")]
    EmptyRuleName,
    /// A trigger field was empty.
    #[error("trigger {field} must not be empty")]
    EmptyTriggerField {
        /// Offending trigger field.
        field: &'static str,
    },
    /// A pattern failed to parse.
    #[error("invalid pattern in {context}: {source}")]
    InvalidPattern {
        /// Where the pattern appeared.
        context: String,
        /// Underlying grammar error.
        source: PatternError,
    },
    /// A temporal sequence listed no events.
    #[error("temporal sequence must list at least one event")]
    EmptySequence,
    /// A temporal window was zero.
    #[error("temporal window must be greater than zero")]
    ZeroWindow,
    /// A count threshold was zero.
    #[error("count threshold must be greater than zero")]
    ZeroThreshold,
    /// An aggregate field path was empty.
    #[error("aggregate field must not be empty")]
    EmptyAggregateField,
    /// A unary operator carried a comparison value.
    #[error("operator {operator:?} does not accept a value")]
    UnaryValue {
        /// Offending operator.
        operator: Operator,
    },
    /// A binary operator was missing its comparison value.
    #[error("operator {operator:?} requires a value")]
    MissingValue {
        /// Offending operator.
        operator: Operator,
    },
    /// A `not` group did not have exactly one child.
    #[error("not group requires exactly one child, found {children}")]
    NotArity {
        /// Number of children found.
        children: usize,
    },
    /// An `in`/`notIn`/`between` value had the wrong shape.
    #[error("operator {operator:?} requires {expected}")]
    InvalidOperandShape {
        /// Offending operator.
        operator: Operator,
        /// Expected value shape.
        expected: &'static str,
    },
    /// A regex value failed to compile.
    #[error("regex {pattern:?} failed to compile: {reason}")]
    InvalidRegex {
        /// Offending pattern text.
        pattern: String,
        /// Compiler error text.
        reason: String,
    },
    /// A webhook URL failed to parse.
    #[error("webhook url {url:?} is invalid: {reason}")]
    InvalidWebhookUrl {
        /// Offending URL text.
        url: String,
        /// Parser error text.
        reason: String,
    },
    /// An action field was empty.
    #[error("action {action} field {field} must not be empty")]
    EmptyActionField {
        /// Action kind label.
        action: &'static str,
        /// Offending field.
        field: &'static str,
    },
    /// A timer action used a zero duration.
    #[error("startTimer duration must be greater than zero")]
    ZeroTimerDuration,
}

/// Non-fatal validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    /// Location of the finding.
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Binding-scope roots template references may legitimately start from.
const TEMPLATE_ROOTS: &[&str] = &[
    "event",
    "fact",
    "timer",
    "temporal",
    "context",
    "rule",
    "topic",
    "correlationId",
];

impl Rule {
    /// Validates the rule document.
    ///
    /// Returns the non-fatal warnings on success. No engine state may be
    /// mutated before this passes.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSpecError`] when the document violates the grammar.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>, RuleSpecError> {
        if self.id.as_str().is_empty() {
            return Err(RuleSpecError::EmptyRuleId);
        }
        if self.name.is_empty() {
            return Err(RuleSpecError::EmptyRuleName);
        }

        validate_trigger(&self.trigger)?;
        for condition in &self.conditions {
            validate_condition(condition)?;
        }
        for action in &self.actions {
            validate_action(action)?;
        }

        Ok(self.template_warnings())
    }

    /// Collects regex patterns used by `matches` leaves, for one-time compilation.
    #[must_use]
    pub fn regex_patterns(&self) -> Vec<String> {
        let mut patterns = Vec::new();
        for condition in &self.conditions {
            collect_regex_patterns(condition, &mut patterns);
        }
        patterns
    }

    /// Collects warnings for template references with unknown roots.
    fn template_warnings(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        for (index, action) in self.actions.iter().enumerate() {
            for reference in action_template_refs(action) {
                let root = reference.split('.').next().unwrap_or_default();
                if !TEMPLATE_ROOTS.contains(&root) {
                    warnings.push(ValidationWarning {
                        path: format!("actions[{index}]"),
                        message: format!(
                            "template reference {{{{{reference}}}}} does not start from a known binding root"
                        ),
                    });
                }
            }
        }
        warnings
    }
}

/// Validates trigger fields and pattern grammar.
fn validate_trigger(trigger: &Trigger) -> Result<(), RuleSpecError> {
    match trigger {
        Trigger::Event { topic } => {
            if topic.is_empty() {
                return Err(RuleSpecError::EmptyTriggerField { field: "topic" });
            }
            parse_pattern(topic, TOPIC_SEPARATOR, "trigger topic")?;
        }
        Trigger::Fact { pattern } => {
            if pattern.is_empty() {
                return Err(RuleSpecError::EmptyTriggerField { field: "pattern" });
            }
            parse_pattern(pattern, FACT_SEPARATOR, "trigger fact pattern")?;
        }
        Trigger::Timer { name } => {
            if name.is_empty() {
                return Err(RuleSpecError::EmptyTriggerField { field: "name" });
            }
            parse_pattern(name, FACT_SEPARATOR, "trigger timer name")?;
        }
        Trigger::Temporal { pattern } => validate_temporal(pattern)?,
    }
    Ok(())
}

/// Validates temporal pattern shape and referenced topics.
fn validate_temporal(pattern: &TemporalPattern) -> Result<(), RuleSpecError> {
    if pattern.window_ms() == 0 {
        return Err(RuleSpecError::ZeroWindow);
    }
    match pattern {
        TemporalPattern::Sequence { events, .. } => {
            if events.is_empty() {
                return Err(RuleSpecError::EmptySequence);
            }
        }
        TemporalPattern::Count { threshold, .. } => {
            if *threshold == 0 {
                return Err(RuleSpecError::ZeroThreshold);
            }
        }
        TemporalPattern::Aggregate { field, .. } => {
            if field.is_empty() {
                return Err(RuleSpecError::EmptyAggregateField);
            }
        }
        TemporalPattern::Absence { .. } => {}
    }
    for topic in pattern.topics() {
        if topic.is_empty() {
            return Err(RuleSpecError::EmptyTriggerField { field: "topic" });
        }
        parse_pattern(topic, TOPIC_SEPARATOR, "temporal topic")?;
    }
    Ok(())
}

/// Validates one condition subtree.
fn validate_condition(condition: &Condition) -> Result<(), RuleSpecError> {
    match condition {
        Condition::Group(group) => {
            if group.operator == GroupOperator::Not && group.conditions.len() != 1 {
                return Err(RuleSpecError::NotArity {
                    children: group.conditions.len(),
                });
            }
            for child in &group.conditions {
                validate_condition(child)?;
            }
            Ok(())
        }
        Condition::Leaf(leaf) => validate_leaf(leaf),
    }
}

/// Validates operator arity and operand shapes for a leaf.
fn validate_leaf(leaf: &ConditionLeaf) -> Result<(), RuleSpecError> {
    if leaf.operator.is_unary() {
        if leaf.value.is_some() {
            return Err(RuleSpecError::UnaryValue {
                operator: leaf.operator,
            });
        }
        return Ok(());
    }

    let Some(value) = &leaf.value else {
        return Err(RuleSpecError::MissingValue {
            operator: leaf.operator,
        });
    };

    let ConditionValue::Literal(literal) = value else {
        // Reference shapes are only checkable at evaluation time.
        return Ok(());
    };

    match leaf.operator {
        Operator::In | Operator::NotIn => {
            if !literal.is_array() {
                return Err(RuleSpecError::InvalidOperandShape {
                    operator: leaf.operator,
                    expected: "an array value",
                });
            }
        }
        Operator::Between => {
            let shape_ok = literal
                .as_array()
                .is_some_and(|range| range.len() == 2);
            if !shape_ok {
                return Err(RuleSpecError::InvalidOperandShape {
                    operator: leaf.operator,
                    expected: "a two-element [lo, hi] array",
                });
            }
        }
        Operator::Matches => {
            let Some(pattern) = literal.as_str() else {
                return Err(RuleSpecError::InvalidOperandShape {
                    operator: leaf.operator,
                    expected: "a string regex value",
                });
            };
            regex::Regex::new(pattern).map_err(|error| RuleSpecError::InvalidRegex {
                pattern: pattern.to_string(),
                reason: error.to_string(),
            })?;
        }
        _ => {}
    }
    Ok(())
}

/// Validates action fields, skipping grammar checks on templated text.
fn validate_action(action: &Action) -> Result<(), RuleSpecError> {
    match action {
        Action::SetFact { key, .. } | Action::DeleteFact { key } => {
            if key.is_empty() {
                return Err(RuleSpecError::EmptyActionField {
                    action: action.kind(),
                    field: "key",
                });
            }
        }
        Action::EmitEvent { topic, .. } => {
            if topic.is_empty() {
                return Err(RuleSpecError::EmptyActionField {
                    action: action.kind(),
                    field: "topic",
                });
            }
        }
        Action::StartTimer {
            name, duration_ms, ..
        } => {
            if name.is_empty() {
                return Err(RuleSpecError::EmptyActionField {
                    action: action.kind(),
                    field: "name",
                });
            }
            if *duration_ms == 0 {
                return Err(RuleSpecError::ZeroTimerDuration);
            }
        }
        Action::CancelTimer { name } => {
            if name.is_empty() {
                return Err(RuleSpecError::EmptyActionField {
                    action: action.kind(),
                    field: "name",
                });
            }
        }
        Action::CallWebhook { url, .. } => {
            if url.is_empty() {
                return Err(RuleSpecError::EmptyActionField {
                    action: action.kind(),
                    field: "url",
                });
            }
            if !template::has_placeholders(url) {
                url::Url::parse(url).map_err(|error| RuleSpecError::InvalidWebhookUrl {
                    url: url.clone(),
                    reason: error.to_string(),
                })?;
            }
        }
        Action::Log { message, .. } => {
            if message.is_empty() {
                return Err(RuleSpecError::EmptyActionField {
                    action: action.kind(),
                    field: "message",
                });
            }
        }
    }
    Ok(())
}

/// Parses a pattern, wrapping grammar failures with their location.
fn parse_pattern(
    raw: &str,
    separator: char,
    context: &str,
) -> Result<Pattern, RuleSpecError> {
    Pattern::parse(raw, separator).map_err(|source| RuleSpecError::InvalidPattern {
        context: context.to_string(),
        source,
    })
}

/// Collects `matches` regex literals from a condition subtree.
fn collect_regex_patterns(condition: &Condition, patterns: &mut Vec<String>) {
    match condition {
        Condition::Group(group) => {
            for child in &group.conditions {
                collect_regex_patterns(child, patterns);
            }
        }
        Condition::Leaf(leaf) => {
            if leaf.operator == Operator::Matches {
                if let Some(ConditionValue::Literal(Value::String(pattern))) = &leaf.value {
                    patterns.push(pattern.clone());
                }
            }
        }
    }
}

/// Collects template references from an action's string fields.
fn action_template_refs(action: &Action) -> Vec<String> {
    let mut refs = Vec::new();
    match action {
        Action::SetFact { key, value } => {
            template::collect_refs(key, &mut refs);
            template::collect_value_refs(value, &mut refs);
        }
        Action::DeleteFact { key } => template::collect_refs(key, &mut refs),
        Action::EmitEvent { topic, data } => {
            template::collect_refs(topic, &mut refs);
            template::collect_value_refs(data, &mut refs);
        }
        Action::StartTimer { name, .. } | Action::CancelTimer { name } => {
            template::collect_refs(name, &mut refs);
        }
        Action::CallWebhook {
            url,
            headers,
            body,
            ..
        } => {
            template::collect_refs(url, &mut refs);
            for value in headers.values() {
                template::collect_refs(value, &mut refs);
            }
            if let Some(body) = body {
                template::collect_value_refs(body, &mut refs);
            }
        }
        Action::Log { message, .. } => template::collect_refs(message, &mut refs),
    }
    refs
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

    use super::Rule;
    use super::RuleSpecError;
    use super::TemporalPattern;
    use super::Trigger;

    fn minimal_rule(doc: serde_json::Value) -> Rule {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn rule_documents_apply_defaults() {
        let rule = minimal_rule(json!({
            "id": "r1",
            "name": "first",
            "trigger": {"kind": "event", "topic": "orders.created"}
        }));
        assert!(rule.enabled);
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.version, 0);
        assert!(rule.conditions.is_empty());
        assert!(rule.validate().unwrap().is_empty());
    }

    #[test]
    fn schema_field_is_tolerated() {
        let rule = minimal_rule(json!({
            "$schema": "https://example.invalid/rule.schema.json",
            "id": "r1",
            "name": "first",
            "trigger": {"kind": "fact", "pattern": "customer:*:score"}
        }));
        assert_eq!(rule.id.as_str(), "r1");
    }

    #[test]
    fn empty_id_is_rejected() {
        let rule = minimal_rule(json!({
            "id": "",
            "name": "first",
            "trigger": {"kind": "event", "topic": "a"}
        }));
        assert!(matches!(rule.validate(), Err(RuleSpecError::EmptyRuleId)));
    }

    #[test]
    fn multi_segment_wildcard_trigger_is_rejected() {
        let rule = minimal_rule(json!({
            "id": "r1",
            "name": "first",
            "trigger": {"kind": "event", "topic": "orders.**"}
        }));
        assert!(matches!(
            rule.validate(),
            Err(RuleSpecError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn unary_operator_with_value_is_rejected() {
        let rule = minimal_rule(json!({
            "id": "r1",
            "name": "first",
            "trigger": {"kind": "event", "topic": "a"},
            "conditions": [
                {"source": {"kind": "event", "field": "x"}, "operator": "exists", "value": 1}
            ]
        }));
        assert!(matches!(
            rule.validate(),
            Err(RuleSpecError::UnaryValue { .. })
        ));
    }

    #[test]
    fn bad_regex_is_rejected() {
        let rule = minimal_rule(json!({
            "id": "r1",
            "name": "first",
            "trigger": {"kind": "event", "topic": "a"},
            "conditions": [
                {"source": {"kind": "event", "field": "x"}, "operator": "matches", "value": "("}
            ]
        }));
        assert!(matches!(
            rule.validate(),
            Err(RuleSpecError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn unknown_template_root_is_a_warning_not_an_error() {
        let rule = minimal_rule(json!({
            "id": "r1",
            "name": "first",
            "trigger": {"kind": "event", "topic": "a"},
            "actions": [
                {"kind": "log", "level": "info", "message": "saw {{payload.user}}"}
            ]
        }));
        let warnings = rule.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("payload.user"));
    }

    #[test]
    fn temporal_topics_cover_after_patterns() {
        let trigger: Trigger = serde_json::from_value(json!({
            "kind": "temporal",
            "pattern": {
                "kind": "absence",
                "event": {"topic": "order.paid"},
                "withinMs": 900_000,
                "after": {"topic": "order.created"}
            }
        }))
        .unwrap();
        let Trigger::Temporal { pattern } = trigger else {
            panic!("expected temporal trigger");
        };
        assert_eq!(pattern.topics(), vec!["order.paid", "order.created"]);
        assert_eq!(pattern.window_ms(), 900_000);
        assert!(matches!(pattern, TemporalPattern::Absence { .. }));
    }
}

// ruleflow-core/src/runtime/evaluator.rs
// ============================================================================
// Module: Ruleflow Condition Evaluator
// Description: Binding contexts and recursive condition evaluation.
// Purpose: Decide whether a candidate rule's conditions hold for a firing.
// Dependencies: crate::core, crate::interfaces, crate::runtime, regex, ruleflow-match
// ============================================================================

//! ## Overview
//! The evaluator walks the condition tree against a per-firing binding
//! context. Sources that resolve to nothing yield **absent**; comparisons
//! against absent are false except for the vacuously true operators.
//! Numeric comparisons coerce int and float, but a string never compares
//! equal to a number. Combinators short-circuit in listed order, and an
//! empty condition list evaluates to true.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use ruleflow_match::Pattern;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::core::Condition;
use crate::core::ConditionLeaf;
use crate::core::ConditionSource;
use crate::core::ConditionValue;
use crate::core::CorrelationId;
use crate::core::EngineError;
use crate::core::Event;
use crate::core::EventId;
use crate::core::FACT_SEPARATOR;
use crate::core::FactChange;
use crate::core::GroupOperator;
use crate::core::Operator;
use crate::core::RuleId;
use crate::core::TemporalMatch;
use crate::core::TimerFire;
use crate::core::template;
use crate::interfaces::Lookup;
use crate::interfaces::LookupContext;
use crate::runtime::baseline::BaselineTracker;
use crate::runtime::fact_store::FactStore;

// ============================================================================
// SECTION: Lookup Registry
// ============================================================================

/// Named lookup registry owned by the engine.
#[derive(Default)]
pub struct LookupRegistry {
    /// Registered lookups keyed by name.
    lookups: BTreeMap<String, Arc<dyn Lookup>>,
}

impl LookupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lookups: BTreeMap::new(),
        }
    }

    /// Registers a lookup, replacing any prior registration of the name.
    pub fn register(&mut self, name: impl Into<String>, lookup: Arc<dyn Lookup>) {
        self.lookups.insert(name.into(), lookup);
    }

    /// Returns the lookup registered under the name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Lookup>> {
        self.lookups.get(name)
    }
}

// ============================================================================
// SECTION: Binding Context
// ============================================================================

/// Per-firing binding context assembled by the scheduler.
///
/// # Invariants
/// - Read-only for the duration of one rule evaluation and firing.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    /// Rule the binding was built for.
    pub rule_id: Option<RuleId>,
    /// Rule name, for scope exposure.
    pub rule_name: String,
    /// Triggering event, when any.
    pub event: Option<Event>,
    /// Triggering fact change, when any.
    pub fact: Option<FactChange>,
    /// Triggering timer fire, when any.
    pub timer: Option<TimerFire>,
    /// Completed temporal match, when any.
    pub temporal: Option<TemporalMatch>,
    /// Correlation inherited from the trigger.
    pub correlation_id: Option<CorrelationId>,
    /// Event the firing is causally linked to.
    pub causation_id: Option<EventId>,
    /// Wildcard captures from the trigger pattern match, in order.
    pub captures: Vec<String>,
    /// Ambient key/value scope.
    pub context: BTreeMap<String, Value>,
}

impl Binding {
    /// Returns the event-data view used by `event` sources and templates.
    ///
    /// Event triggers expose the event payload; fact triggers expose the
    /// change record; timer triggers expose the stored context.
    #[must_use]
    pub fn event_data(&self) -> Value {
        if let Some(event) = &self.event {
            return event.data.clone();
        }
        if let Some(change) = &self.fact {
            return json!({
                "key": change.key,
                "value": change.new_value,
                "oldValue": change.old_value,
                "version": change.version,
            });
        }
        if let Some(fire) = &self.timer {
            let mut view = fire
                .context
                .as_object()
                .cloned()
                .unwrap_or_else(Map::new);
            view.insert("name".to_string(), Value::String(fire.name.to_string()));
            return Value::Object(view);
        }
        Value::Object(Map::new())
    }

    /// Builds the resolution scope used by templates and `{ref}` values.
    #[must_use]
    pub fn scope(&self) -> Value {
        let mut scope = Map::new();
        scope.insert("event".to_string(), self.event_data());
        if let Some(event) = &self.event {
            scope.insert("topic".to_string(), Value::String(event.topic.clone()));
        }
        if let Some(change) = &self.fact {
            scope.insert(
                "fact".to_string(),
                serde_json::to_value(change).unwrap_or(Value::Null),
            );
        }
        if let Some(fire) = &self.timer {
            scope.insert(
                "timer".to_string(),
                serde_json::to_value(fire).unwrap_or(Value::Null),
            );
        }
        if let Some(matched) = &self.temporal {
            scope.insert(
                "temporal".to_string(),
                serde_json::to_value(matched).unwrap_or(Value::Null),
            );
        }
        scope.insert(
            "rule".to_string(),
            json!({
                "id": self.rule_id.as_ref().map(RuleId::as_str),
                "name": self.rule_name,
            }),
        );
        scope.insert(
            "context".to_string(),
            Value::Object(self.context.clone().into_iter().collect()),
        );
        if let Some(correlation) = &self.correlation_id {
            scope.insert(
                "correlationId".to_string(),
                Value::String(correlation.to_string()),
            );
        }
        Value::Object(scope)
    }
}

// ============================================================================
// SECTION: Condition Evaluator
// ============================================================================

/// Borrowing evaluator over the engine's read-only evaluation inputs.
pub struct ConditionEvaluator<'engine> {
    /// Fact store for `fact` sources.
    pub facts: &'engine FactStore,
    /// Lookup registry for `lookup` sources.
    pub lookups: &'engine LookupRegistry,
    /// Baseline tracker for `baseline` sources.
    pub baselines: &'engine BaselineTracker,
    /// Regexes compiled once at rule registration, keyed by pattern text.
    pub regexes: &'engine BTreeMap<String, Regex>,
}

impl ConditionEvaluator<'_> {
    /// Evaluates a condition list as an implicit conjunction.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a source or operand cannot be resolved
    /// in a well-formed way; callers treat this as a non-match.
    pub fn evaluate_all(
        &self,
        conditions: &[Condition],
        scope: &Value,
    ) -> Result<bool, EngineError> {
        for condition in conditions {
            if !self.evaluate(condition, scope)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluates one condition subtree.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a source or operand cannot be resolved.
    pub fn evaluate(&self, condition: &Condition, scope: &Value) -> Result<bool, EngineError> {
        match condition {
            Condition::Group(group) => match group.operator {
                GroupOperator::And => {
                    for child in &group.conditions {
                        if !self.evaluate(child, scope)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                GroupOperator::Or => {
                    for child in &group.conditions {
                        if self.evaluate(child, scope)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                GroupOperator::Not => {
                    let Some(child) = group.conditions.first() else {
                        return Err(EngineError::Internal(
                            "not group without a child passed validation".to_string(),
                        ));
                    };
                    Ok(!self.evaluate(child, scope)?)
                }
            },
            Condition::Leaf(leaf) => self.evaluate_leaf(leaf, scope),
        }
    }

    /// Evaluates one leaf condition.
    fn evaluate_leaf(&self, leaf: &ConditionLeaf, scope: &Value) -> Result<bool, EngineError> {
        let source = self.resolve_source(&leaf.source, scope)?;
        let operand = leaf
            .value
            .as_ref()
            .and_then(|value| resolve_operand(value, scope));
        self.apply_operator(leaf.operator, source.as_ref(), operand.as_ref())
    }

    /// Resolves a source to its value, or absent.
    fn resolve_source(
        &self,
        source: &ConditionSource,
        scope: &Value,
    ) -> Result<Option<Value>, EngineError> {
        match source {
            ConditionSource::Fact { pattern } => {
                let pattern = Pattern::parse(pattern, FACT_SEPARATOR).map_err(|error| {
                    EngineError::Internal(format!(
                        "validated fact pattern failed to parse: {error}"
                    ))
                })?;
                Ok(self
                    .facts
                    .first_match(&pattern)
                    .map(|fact| fact.value.clone()))
            }
            ConditionSource::Event { field } => {
                let data = template::resolve_path(scope, "event")
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(template::resolve_path(&data, field).cloned())
            }
            ConditionSource::Context { key } => Ok(template::resolve_path(scope, "context")
                .and_then(|context| context.get(key))
                .cloned()),
            ConditionSource::Lookup { name, field } => {
                let Some(lookup) = self.lookups.get(name) else {
                    return Err(EngineError::BadRequest(format!(
                        "lookup {name:?} is not registered"
                    )));
                };
                let ctx = LookupContext {
                    scope: scope.clone(),
                };
                let result = lookup
                    .call(&Value::Null, &ctx)
                    .map_err(|error| EngineError::BadRequest(error.to_string()))?;
                match field {
                    Some(field) => Ok(template::resolve_path(&result, field).cloned()),
                    None => Ok(Some(result)),
                }
            }
            ConditionSource::Baseline {
                metric,
                comparison,
                sensitivity,
            } => Ok(self
                .baselines
                .evaluate(metric, *comparison, *sensitivity)
                .map(Value::Bool)),
        }
    }

    /// Applies the operator to resolved source and operand values.
    fn apply_operator(
        &self,
        operator: Operator,
        source: Option<&Value>,
        operand: Option<&Value>,
    ) -> Result<bool, EngineError> {
        match operator {
            Operator::Exists => return Ok(source.is_some()),
            Operator::NotExists => return Ok(source.is_none()),
            Operator::IsNull => {
                return Ok(source.is_none_or(Value::is_null));
            }
            Operator::IsNotNull => {
                return Ok(source.is_some_and(|value| !value.is_null()));
            }
            _ => {}
        }

        // Absent comparisons are false except vacuous non-membership.
        let Some(source) = source else {
            return Ok(operator == Operator::NotIn);
        };
        let Some(operand) = operand else {
            return Ok(false);
        };

        let result = match operator {
            Operator::Eq => values_equal(source, operand),
            Operator::Ne => !values_equal(source, operand),
            Operator::Gt => {
                values_cmp(source, operand).is_some_and(|ordering| ordering == Ordering::Greater)
            }
            Operator::Gte => {
                values_cmp(source, operand).is_some_and(|ordering| ordering != Ordering::Less)
            }
            Operator::Lt => {
                values_cmp(source, operand).is_some_and(|ordering| ordering == Ordering::Less)
            }
            Operator::Lte => {
                values_cmp(source, operand).is_some_and(|ordering| ordering != Ordering::Greater)
            }
            Operator::In => membership(source, operand),
            Operator::NotIn => !membership(source, operand),
            Operator::Contains => containment(source, operand),
            Operator::StartsWith => match (source.as_str(), operand.as_str()) {
                (Some(text), Some(prefix)) => text.starts_with(prefix),
                _ => false,
            },
            Operator::EndsWith => match (source.as_str(), operand.as_str()) {
                (Some(text), Some(suffix)) => text.ends_with(suffix),
                _ => false,
            },
            Operator::Matches => return self.regex_match(source, operand),
            Operator::Between => between(source, operand),
            Operator::Exists
            | Operator::NotExists
            | Operator::IsNull
            | Operator::IsNotNull => false,
        };
        Ok(result)
    }

    /// Applies the `matches` operator using the per-rule compiled cache.
    fn regex_match(&self, source: &Value, operand: &Value) -> Result<bool, EngineError> {
        let (Some(text), Some(pattern)) = (source.as_str(), operand.as_str()) else {
            return Ok(false);
        };
        if let Some(compiled) = self.regexes.get(pattern) {
            return Ok(compiled.is_match(text));
        }
        // Reference-resolved patterns cannot be precompiled.
        let compiled = Regex::new(pattern)
            .map_err(|error| EngineError::BadRequest(format!("invalid regex: {error}")))?;
        Ok(compiled.is_match(text))
    }
}

// ============================================================================
// SECTION: Value Semantics
// ============================================================================

/// Resolves a condition value to its concrete operand.
fn resolve_operand(value: &ConditionValue, scope: &Value) -> Option<Value> {
    match value {
        ConditionValue::Literal(literal) => Some(literal.clone()),
        ConditionValue::Reference(reference) => {
            template::resolve_path(scope, &reference.path).cloned()
        }
    }
}

/// Equality with int/float coercion; strings never equal numbers.
fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(left), Some(right)) = (left.as_f64(), right.as_f64()) {
        return (left - right).abs() < f64::EPSILON;
    }
    left == right
}

/// Ordering over same-type values: numeric for numbers, lexicographic for strings.
fn values_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(left), Some(right)) = (left.as_f64(), right.as_f64()) {
        return left.partial_cmp(&right);
    }
    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

/// Membership of the source in an array operand.
fn membership(source: &Value, operand: &Value) -> bool {
    operand
        .as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(source, item)))
}

/// Containment semantics: substring, subset, or array membership.
fn containment(source: &Value, operand: &Value) -> bool {
    match (source, operand) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
        (Value::Array(haystack), Value::Array(needle)) => needle
            .iter()
            .all(|item| haystack.iter().any(|candidate| values_equal(candidate, item))),
        (Value::Array(haystack), needle) => haystack
            .iter()
            .any(|candidate| values_equal(candidate, needle)),
        _ => false,
    }
}

/// Inclusive `[lo, hi]` range test.
fn between(source: &Value, operand: &Value) -> bool {
    let Some(range) = operand.as_array() else {
        return false;
    };
    let (Some(lo), Some(hi)) = (range.first(), range.get(1)) else {
        return false;
    };
    let lower_ok = values_cmp(source, lo).is_some_and(|ordering| ordering != Ordering::Less);
    let upper_ok = values_cmp(source, hi).is_some_and(|ordering| ordering != Ordering::Greater);
    lower_ok && upper_ok
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

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::Value;
    use serde_json::json;

    use super::Binding;
    use super::ConditionEvaluator;
    use super::LookupRegistry;
    use crate::core::Condition;
    use crate::core::ManualClock;
    use crate::core::Timestamp;
    use crate::interfaces::LookupContext;
    use crate::interfaces::LookupError;
    use crate::runtime::baseline::BaselineTracker;
    use crate::runtime::fact_store::FactStore;

    struct Fixture {
        facts: FactStore,
        lookups: LookupRegistry,
        baselines: BaselineTracker,
        regexes: BTreeMap<String, regex::Regex>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::starting_at(Timestamp::from_millis(0)));
            Self {
                facts: FactStore::new(clock),
                lookups: LookupRegistry::new(),
                baselines: BaselineTracker::new(),
                regexes: BTreeMap::new(),
            }
        }

        fn eval(&self, condition: Value, scope: &Value) -> bool {
            let condition: Condition = serde_json::from_value(condition).unwrap();
            let evaluator = ConditionEvaluator {
                facts: &self.facts,
                lookups: &self.lookups,
                baselines: &self.baselines,
                regexes: &self.regexes,
            };
            evaluator.evaluate(&condition, scope).unwrap()
        }
    }

    fn event_scope(data: Value) -> Value {
        json!({"event": data, "context": {}})
    }

    #[test]
    fn numeric_coercion_compares_int_and_float() {
        let fixture = Fixture::new();
        let scope = event_scope(json!({"value": 750}));
        assert!(fixture.eval(
            json!({"source": {"kind": "event", "field": "value"}, "operator": "gt", "value": 700.5}),
            &scope,
        ));
        assert!(fixture.eval(
            json!({"source": {"kind": "event", "field": "value"}, "operator": "eq", "value": 750.0}),
            &scope,
        ));
    }

    #[test]
    fn strings_never_equal_numbers() {
        let fixture = Fixture::new();
        let scope = event_scope(json!({"value": "750"}));
        assert!(!fixture.eval(
            json!({"source": {"kind": "event", "field": "value"}, "operator": "eq", "value": 750}),
            &scope,
        ));
        assert!(!fixture.eval(
            json!({"source": {"kind": "event", "field": "value"}, "operator": "gt", "value": 700}),
            &scope,
        ));
    }

    #[test]
    fn absent_sources_are_false_except_vacuous_operators() {
        let fixture = Fixture::new();
        let scope = event_scope(json!({}));
        let source = json!({"kind": "event", "field": "missing"});
        assert!(!fixture.eval(
            json!({"source": source, "operator": "eq", "value": 1}),
            &scope
        ));
        assert!(fixture.eval(
            json!({"source": source, "operator": "notExists"}),
            &scope
        ));
        assert!(fixture.eval(json!({"source": source, "operator": "isNull"}), &scope));
        assert!(fixture.eval(
            json!({"source": source, "operator": "notIn", "value": [1, 2]}),
            &scope
        ));
        assert!(!fixture.eval(json!({"source": source, "operator": "exists"}), &scope));
    }

    #[test]
    fn between_is_inclusive() {
        let fixture = Fixture::new();
        let scope = event_scope(json!({"value": 10}));
        let condition = |range: Value| {
            json!({"source": {"kind": "event", "field": "value"}, "operator": "between", "value": range})
        };
        assert!(fixture.eval(condition(json!([10, 20])), &scope));
        assert!(fixture.eval(condition(json!([0, 10])), &scope));
        assert!(!fixture.eval(condition(json!([11, 20])), &scope));
    }

    #[test]
    fn fact_sources_use_first_match_in_key_order() {
        let mut fixture = Fixture::new();
        fixture.facts.set("tier:a", json!("gold")).unwrap();
        fixture.facts.set("tier:b", json!("silver")).unwrap();
        let scope = event_scope(json!({}));
        assert!(fixture.eval(
            json!({"source": {"kind": "fact", "pattern": "tier:*"}, "operator": "eq", "value": "gold"}),
            &scope,
        ));
    }

    #[test]
    fn lookup_sources_resolve_fields() {
        let mut fixture = Fixture::new();
        fixture.lookups.register(
            "customer",
            Arc::new(|_: &Value, _: &LookupContext| -> Result<Value, LookupError> {
                Ok(json!({"tier": "gold", "score": 900}))
            }),
        );
        let scope = event_scope(json!({}));
        assert!(fixture.eval(
            json!({"source": {"kind": "lookup", "name": "customer", "field": "tier"}, "operator": "eq", "value": "gold"}),
            &scope,
        ));
    }

    #[test]
    fn reference_operands_resolve_against_the_scope() {
        let fixture = Fixture::new();
        let scope = json!({"event": {"total": 120}, "context": {"limit": 100}});
        assert!(fixture.eval(
            json!({"source": {"kind": "event", "field": "total"}, "operator": "gt", "value": {"ref": "context.limit"}}),
            &scope,
        ));
    }

    #[test]
    fn combinators_short_circuit() {
        let fixture = Fixture::new();
        let scope = event_scope(json!({"a": 1}));
        assert!(fixture.eval(
            json!({"operator": "or", "conditions": [
                {"source": {"kind": "event", "field": "a"}, "operator": "eq", "value": 1},
                {"source": {"kind": "lookup", "name": "unregistered"}, "operator": "exists"}
            ]}),
            &scope,
        ));
        assert!(fixture.eval(
            json!({"operator": "not", "conditions": [
                {"source": {"kind": "event", "field": "a"}, "operator": "eq", "value": 2}
            ]}),
            &scope,
        ));
    }

    #[test]
    fn binding_scope_exposes_fact_changes_as_event_data() {
        let binding = Binding {
            fact: Some(crate::core::FactChange {
                key: "customer:42:score".to_string(),
                old_value: None,
                new_value: Some(json!(750)),
                version: 1,
            }),
            ..Binding::default()
        };
        let scope = binding.scope();
        assert_eq!(
            scope.get("event").and_then(|event| event.get("value")),
            Some(&json!(750))
        );
    }
}

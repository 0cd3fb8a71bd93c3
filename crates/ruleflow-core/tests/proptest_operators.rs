// crates/ruleflow-core/tests/proptest_operators.rs
// ============================================================================
// Module: Operator Property-Based Tests
// Description: Property tests for condition operator correctness.
// Purpose: Detect panics and invariants across wide input ranges.
// ============================================================================

//! Property-based tests for operator semantics.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;

use proptest::prelude::*;
use ruleflow_core::EngineBuilder;
use ruleflow_core::core::EngineConfig;
use ruleflow_core::core::ManualClock;
use ruleflow_core::core::Rule;
use ruleflow_core::core::Timestamp;
use ruleflow_core::runtime::Engine;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

/// Builds an engine with one event rule using the given condition.
fn engine_with_condition(condition: Value) -> Engine {
    let mut engine = EngineBuilder::new(EngineConfig::new("prop-test"))
        .clock(Arc::new(ManualClock::starting_at(Timestamp::from_millis(0))))
        .build()
        .unwrap();
    let rule: Rule = serde_json::from_value(json!({
        "id": "probe",
        "name": "probe",
        "trigger": {"kind": "event", "topic": "probe.sample"},
        "conditions": [condition],
        "actions": [
            {"kind": "setFact", "key": "probe:matched", "value": true}
        ]
    }))
    .unwrap();
    engine.register_rule(rule).unwrap();
    engine
}

/// Emits a sample and reports whether the probe rule matched.
fn probe(engine: &mut Engine, data: Value) -> bool {
    engine.delete_fact("probe:matched").unwrap();
    engine.emit("probe.sample", data).unwrap();
    engine.get_fact("probe:matched").is_some()
}

/// Strategy over finite JSON numbers.
fn finite_f64() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("finite", |value| value.is_finite())
}

// ============================================================================
// SECTION: Ordering Properties
// ============================================================================

proptest! {
    #[test]
    fn integer_ordering_agrees_with_gt(a in any::<i32>(), b in any::<i32>()) {
        let mut engine = engine_with_condition(json!({
            "source": {"kind": "event", "field": "x"},
            "operator": "gt",
            "value": i64::from(b)
        }));
        prop_assert_eq!(probe(&mut engine, json!({"x": a})), i64::from(a) > i64::from(b));
    }

    #[test]
    fn gt_and_lte_partition_comparable_numbers(a in finite_f64(), b in finite_f64()) {
        let mut gt = engine_with_condition(json!({
            "source": {"kind": "event", "field": "x"},
            "operator": "gt",
            "value": b
        }));
        let mut lte = engine_with_condition(json!({
            "source": {"kind": "event", "field": "x"},
            "operator": "lte",
            "value": b
        }));
        let sample = json!({"x": a});
        if sample.get("x").and_then(Value::as_f64).is_some() {
            prop_assert_ne!(
                probe(&mut gt, sample.clone()),
                probe(&mut lte, sample)
            );
        }
    }

    #[test]
    fn eq_never_matches_strings_against_numbers(n in any::<i64>()) {
        let mut engine = engine_with_condition(json!({
            "source": {"kind": "event", "field": "x"},
            "operator": "eq",
            "value": n
        }));
        prop_assert!(!probe(&mut engine, json!({"x": n.to_string()})), "string should not match");
        prop_assert!(probe(&mut engine, json!({"x": n})), "number should match");
    }

    #[test]
    fn between_is_equivalent_to_the_conjunction(
        x in any::<i32>(),
        lo in any::<i32>(),
        hi in any::<i32>(),
    ) {
        let mut engine = engine_with_condition(json!({
            "source": {"kind": "event", "field": "x"},
            "operator": "between",
            "value": [i64::from(lo), i64::from(hi)]
        }));
        let expected = i64::from(x) >= i64::from(lo) && i64::from(x) <= i64::from(hi);
        prop_assert_eq!(probe(&mut engine, json!({"x": x})), expected);
    }

    #[test]
    fn membership_matches_array_scan(
        needle in any::<i32>(),
        haystack in prop::collection::vec(any::<i32>(), 0 .. 8),
    ) {
        let values: Vec<i64> = haystack.iter().map(|value| i64::from(*value)).collect();
        let mut is_in = engine_with_condition(json!({
            "source": {"kind": "event", "field": "x"},
            "operator": "in",
            "value": values
        }));
        let mut not_in = engine_with_condition(json!({
            "source": {"kind": "event", "field": "x"},
            "operator": "notIn",
            "value": haystack.iter().map(|value| i64::from(*value)).collect::<Vec<i64>>()
        }));
        let expected = haystack.contains(&needle);
        prop_assert_eq!(probe(&mut is_in, json!({"x": needle})), expected);
        prop_assert_eq!(probe(&mut not_in, json!({"x": needle})), !expected);
    }

    #[test]
    fn absent_sources_never_satisfy_binary_operators(operator in prop::sample::select(
        vec!["eq", "ne", "gt", "gte", "lt", "lte", "contains", "startsWith", "endsWith", "in"]
    )) {
        let value = if operator == "in" { json!([1, 2]) } else { json!(1) };
        let mut engine = engine_with_condition(json!({
            "source": {"kind": "event", "field": "missing"},
            "operator": operator,
            "value": value
        }));
        prop_assert!(!probe(&mut engine, json!({"present": 1})), "missing source should not match");
    }
}

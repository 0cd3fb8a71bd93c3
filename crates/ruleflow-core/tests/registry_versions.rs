// crates/ruleflow-core/tests/registry_versions.rs
// ============================================================================
// Module: Registry Version Tests
// Description: End-to-end tests for versioning, rollback, and persistence.
// ============================================================================
//! ## Overview
//! Validates rollback history semantics, export/import round-trips, and
//! reload of rules and durable timers through the storage adapter.

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
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use ruleflow_core::EngineBuilder;
use ruleflow_core::MemoryStorageAdapter;
use ruleflow_core::core::ChangeType;
use ruleflow_core::core::EngineConfig;
use ruleflow_core::core::ManualClock;
use ruleflow_core::core::Rule;
use ruleflow_core::core::RuleId;
use ruleflow_core::core::Timestamp;
use ruleflow_core::runtime::Engine;
use serde_json::json;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

fn engine() -> Engine {
    EngineBuilder::new(EngineConfig::new("registry-test"))
        .clock(Arc::new(ManualClock::starting_at(Timestamp::from_millis(
            1_000,
        ))))
        .build()
        .unwrap()
}

fn rule(id: &str, priority: i64) -> Rule {
    serde_json::from_value(json!({
        "id": id,
        "name": format!("rule {id}"),
        "priority": priority,
        "trigger": {"kind": "event", "topic": "orders.created"},
        "actions": [
            {"kind": "log", "level": "info", "message": "fired"}
        ]
    }))
    .unwrap()
}

/// Strips registry-assigned stamps for deep-equality comparisons.
fn normalized(mut rules: Vec<Rule>) -> Vec<Rule> {
    for rule in &mut rules {
        rule.version = 0;
        rule.created_at = Timestamp::from_millis(0);
        rule.updated_at = Timestamp::from_millis(0);
    }
    rules
}

// ============================================================================
// SECTION: Rollback
// ============================================================================

#[test]
fn rollback_restores_the_prior_snapshot_and_extends_history() {
    let mut engine = engine();
    engine.register_rule(rule("r1", 1)).unwrap();
    engine.update_rule(rule("r1", 10), None).unwrap();

    let restored = engine.rollback_rule(&RuleId::new("r1"), 1).unwrap();
    assert_eq!(restored.priority, 1);
    assert_eq!(restored.version, 3);
    assert_eq!(engine.get_rule(&RuleId::new("r1")).unwrap().priority, 1);

    let history = engine.rule_history(&RuleId::new("r1")).unwrap();
    let versions: Vec<u64> = history.iter().map(|entry| entry.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(history[2].change_type, ChangeType::RolledBack);
    assert_eq!(history[2].rolled_back_from, Some(2));
}

#[test]
fn rollback_to_the_current_version_is_a_snapshot_no_op() {
    let mut engine = engine();
    engine.register_rule(rule("r1", 1)).unwrap();
    engine.rollback_rule(&RuleId::new("r1"), 1).unwrap();

    assert!(engine.diff_rule(&RuleId::new("r1"), 1, 2).unwrap().is_empty());
    let history = engine.rule_history(&RuleId::new("r1")).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].change_type, ChangeType::RolledBack);
}

#[test]
fn diff_reports_the_changed_fields_between_versions() {
    let mut engine = engine();
    engine.register_rule(rule("r1", 1)).unwrap();
    engine.update_rule(rule("r1", 10), None).unwrap();

    let diffs = engine.diff_rule(&RuleId::new("r1"), 1, 2).unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].before, json!(1));
    assert_eq!(diffs[0].after, json!(10));
}

// ============================================================================
// SECTION: Export And Import
// ============================================================================

#[test]
fn export_then_import_yields_an_equal_rule_set() {
    let mut engine = engine();
    engine.register_rule(rule("r1", 1)).unwrap();
    engine.register_rule(rule("r2", 2)).unwrap();

    let exported = engine.export_rules();
    let mut replica = self::engine();
    replica.import_rules(exported.clone()).unwrap();

    assert_eq!(normalized(exported), normalized(replica.export_rules()));
}

#[test]
fn bulk_import_validates_before_mutating() {
    let mut engine = engine();
    let bad: Rule = serde_json::from_value(json!({
        "id": "",
        "name": "broken",
        "trigger": {"kind": "event", "topic": "a.b"}
    }))
    .unwrap();

    assert!(engine.import_rules(vec![rule("r1", 1), bad]).is_err());
    assert!(engine.rules().is_empty());
}

// ============================================================================
// SECTION: Persistence
// ============================================================================

#[test]
fn rules_and_history_survive_an_engine_restart() {
    let adapter = Arc::new(MemoryStorageAdapter::new());
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_millis(1_000)));

    let mut first = EngineBuilder::new(EngineConfig::new("persist-test"))
        .clock(clock.clone())
        .storage(adapter.clone())
        .build()
        .unwrap();
    first.register_rule(rule("r1", 1)).unwrap();
    first.update_rule(rule("r1", 5), None).unwrap();
    drop(first);

    let second = EngineBuilder::new(EngineConfig::new("persist-test"))
        .clock(clock)
        .storage(adapter)
        .build()
        .unwrap();
    let reloaded = second.get_rule(&RuleId::new("r1")).unwrap();
    assert_eq!(reloaded.priority, 5);
    assert_eq!(reloaded.version, 2);
    assert_eq!(second.rule_history(&RuleId::new("r1")).unwrap().len(), 2);
}

#[test]
fn overdue_durable_timers_fire_on_restart() {
    let adapter = Arc::new(MemoryStorageAdapter::new());
    let clock = ManualClock::starting_at(Timestamp::from_millis(1_000));

    let mut first = EngineBuilder::new(EngineConfig::new("timer-test"))
        .clock(Arc::new(clock.clone()))
        .timer_storage(adapter.clone())
        .build()
        .unwrap();
    first
        .register_rule(serde_json::from_value(json!({
            "id": "reminder",
            "name": "reminder",
            "trigger": {"kind": "timer", "name": "followup"},
            "actions": [
                {"kind": "setFact", "key": "reminder:sent", "value": true}
            ]
        }))
        .unwrap())
        .unwrap();
    first.arm_timer("followup", 5_000, None, json!({})).unwrap();
    let exported = first.export_rules();
    drop(first);

    // The process restarts after the timer's fire time has passed.
    clock.advance(60_000);
    let mut second = EngineBuilder::new(EngineConfig::new("timer-test"))
        .clock(Arc::new(clock.clone()))
        .timer_storage(adapter)
        .build()
        .unwrap();
    second.import_rules(exported).unwrap();
    // The overdue arming fired during the build, before the rules were
    // imported, and is no longer armed.
    assert!(second.get_fact("reminder:sent").is_none());
    assert!(second.timers().is_empty());

    // With the rules back in place, a fresh arming fires through the rule.
    second.arm_timer("followup", 1_000, None, json!({})).unwrap();
    clock.advance(2_000);
    second.tick().unwrap();
    assert_eq!(second.get_fact("reminder:sent").unwrap().value, json!(true));
}

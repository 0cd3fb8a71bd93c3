// crates/ruleflow-core/tests/temporal_patterns.rs
// ============================================================================
// Module: Temporal Pattern Tests
// Description: End-to-end tests for windowed temporal rules.
// ============================================================================
//! ## Overview
//! Drives sequence, absence, and count rules through the engine with a
//! manual clock, checking window semantics and correlation inheritance.

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
use std::sync::Mutex;

use ruleflow_core::EngineBuilder;
use ruleflow_core::core::EngineConfig;
use ruleflow_core::core::Event;
use ruleflow_core::core::ManualClock;
use ruleflow_core::core::Rule;
use ruleflow_core::core::StreamKind;
use ruleflow_core::core::StreamNotification;
use ruleflow_core::core::Timestamp;
use ruleflow_core::runtime::Engine;
use serde_json::json;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

struct Fixture {
    engine: Engine,
    clock: ManualClock,
    captured: Arc<Mutex<Vec<Event>>>,
}

impl Fixture {
    /// Builds an engine with a manual clock and an event capture on the
    /// given subscriber pattern.
    fn new(capture_pattern: &str) -> Self {
        let clock = ManualClock::starting_at(Timestamp::from_millis(0));
        let mut engine = EngineBuilder::new(EngineConfig::new("temporal-test"))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        let captured = Arc::new(Mutex::new(Vec::new()));
        let collector = Arc::clone(&captured);
        engine
            .subscribe(
                capture_pattern,
                Arc::new(move |notification: &StreamNotification| {
                    if notification.kind == StreamKind::Event {
                        let event: Event =
                            serde_json::from_value(notification.payload.clone()).unwrap();
                        collector.lock().unwrap().push(event);
                    }
                }),
            )
            .unwrap();

        Self {
            engine,
            clock,
            captured,
        }
    }

    fn register(&mut self, doc: serde_json::Value) {
        let rule: Rule = serde_json::from_value(doc).unwrap();
        self.engine.register_rule(rule).unwrap();
    }

    fn captured(&self) -> Vec<Event> {
        self.captured.lock().unwrap().clone()
    }
}

// ============================================================================
// SECTION: Sequence Scenarios
// ============================================================================

#[test]
fn login_failure_sequence_fires_once_and_inherits_correlation() {
    let mut fixture = Fixture::new("security.*");
    fixture.register(json!({
        "id": "lockout",
        "name": "lockout on repeated failures",
        "trigger": {"kind": "temporal", "pattern": {
            "kind": "sequence",
            "events": [
                {"topic": "login.failed"},
                {"topic": "login.failed"},
                {"topic": "login.failed"}
            ],
            "withinMs": 60_000,
            "groupBy": "user"
        }},
        "actions": [
            {"kind": "emitEvent", "topic": "security.lockout", "data": {"user": "{{event.user}}"}}
        ]
    }));

    let first = fixture
        .engine
        .emit("login.failed", json!({"user": "a"}))
        .unwrap();
    fixture.clock.advance(15_000);
    fixture
        .engine
        .emit("login.failed", json!({"user": "a"}))
        .unwrap();
    fixture.clock.advance(15_000);
    fixture
        .engine
        .emit("login.failed", json!({"user": "a"}))
        .unwrap();

    let lockouts = fixture.captured();
    assert_eq!(lockouts.len(), 1);
    assert_eq!(lockouts[0].topic, "security.lockout");
    assert_eq!(lockouts[0].data, json!({"user": "a"}));
    assert_eq!(lockouts[0].correlation_id, first.correlation_id);
}

#[test]
fn sequence_does_not_fire_when_the_window_closes_first() {
    let mut fixture = Fixture::new("security.*");
    fixture.register(json!({
        "id": "lockout",
        "name": "lockout on repeated failures",
        "trigger": {"kind": "temporal", "pattern": {
            "kind": "sequence",
            "events": [
                {"topic": "login.failed"},
                {"topic": "login.failed"},
                {"topic": "login.failed"}
            ],
            "withinMs": 60_000,
            "groupBy": "user"
        }},
        "actions": [
            {"kind": "emitEvent", "topic": "security.lockout", "data": {}}
        ]
    }));

    fixture
        .engine
        .emit("login.failed", json!({"user": "a"}))
        .unwrap();
    fixture.clock.advance(40_000);
    fixture
        .engine
        .emit("login.failed", json!({"user": "a"}))
        .unwrap();
    fixture.clock.advance(40_000);
    // 80s after the first failure: its window is closed; this event only
    // opens fresh instances.
    fixture
        .engine
        .emit("login.failed", json!({"user": "a"}))
        .unwrap();

    assert!(fixture.captured().is_empty());
}

// ============================================================================
// SECTION: Absence Scenarios
// ============================================================================

fn order_timeout_rule() -> serde_json::Value {
    json!({
        "id": "order-timeout",
        "name": "flag unpaid orders",
        "trigger": {"kind": "temporal", "pattern": {
            "kind": "absence",
            "event": {"topic": "order.paid"},
            "withinMs": 900_000,
            "after": {"topic": "order.created"},
            "groupBy": "id"
        }},
        "actions": [
            {"kind": "emitEvent", "topic": "order.timeout", "data": {"id": "{{event.id}}"}}
        ]
    })
}

#[test]
fn absence_fires_when_payment_never_arrives() {
    let mut fixture = Fixture::new("order.timeout");
    fixture.register(order_timeout_rule());

    fixture.engine.emit("order.created", json!({"id": "X"})).unwrap();
    fixture.clock.advance(900_000);
    fixture.engine.tick().unwrap();

    let timeouts = fixture.captured();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].data, json!({"id": "X"}));

    // Later sweeps do not re-fire a consumed deadline.
    fixture.clock.advance(900_000);
    fixture.engine.tick().unwrap();
    assert_eq!(fixture.captured().len(), 1);
}

#[test]
fn absence_is_cancelled_by_the_awaited_event() {
    let mut fixture = Fixture::new("order.timeout");
    fixture.register(order_timeout_rule());

    fixture.engine.emit("order.created", json!({"id": "X"})).unwrap();
    fixture.clock.advance(600_000);
    fixture.engine.emit("order.paid", json!({"id": "X"})).unwrap();
    fixture.clock.advance(300_000);
    fixture.engine.tick().unwrap();

    assert!(fixture.captured().is_empty());
}

// ============================================================================
// SECTION: Count Scenarios
// ============================================================================

#[test]
fn count_threshold_crosses_once_per_window() {
    let mut fixture = Fixture::new("alerts.*");
    fixture.register(json!({
        "id": "burst",
        "name": "burst detector",
        "trigger": {"kind": "temporal", "pattern": {
            "kind": "count",
            "event": {"topic": "api.request"},
            "threshold": 3,
            "withinMs": 10_000
        }},
        "actions": [
            {"kind": "emitEvent", "topic": "alerts.burst", "data": {"count": "{{temporal.value}}"}}
        ]
    }));

    for _ in 0 .. 5 {
        fixture.engine.emit("api.request", json!({})).unwrap();
        fixture.clock.advance(100);
    }

    let alerts = fixture.captured();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].data, json!({"count": 3.0}));
}

// crates/ruleflow-core/tests/service_shell.rs
// ============================================================================
// Module: Engine Service Tests
// Description: Async shell tests for ingress, webhooks, and shutdown.
// ============================================================================
//! ## Overview
//! Exercises the bounded-channel service: serialised command handling,
//! webhook retry delivery through a mock transport, and stop semantics.

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
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use ruleflow_core::EngineBuilder;
use ruleflow_core::EngineService;
use ruleflow_core::WebhookError;
use ruleflow_core::WebhookRequest;
use ruleflow_core::WebhookResponse;
use ruleflow_core::WebhookTransport;
use ruleflow_core::core::EngineConfig;
use ruleflow_core::core::Rule;
use ruleflow_core::core::StopMode;
use ruleflow_core::core::WebhookRetryConfig;
use ruleflow_core::runtime::Engine;
use serde_json::json;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

/// Transport failing a configured number of deliveries before succeeding.
struct FlakyTransport {
    /// Attempts observed so far.
    attempts: AtomicU32,
    /// Number of leading failures.
    fail_first: u32,
}

#[async_trait]
impl WebhookTransport for FlakyTransport {
    async fn deliver(&self, _request: &WebhookRequest) -> Result<WebhookResponse, WebhookError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(WebhookError::Status(503));
        }
        Ok(WebhookResponse { status: 200 })
    }
}

fn engine_with_fast_retries() -> Engine {
    let mut config = EngineConfig::new("service-test");
    config.webhook_retry = WebhookRetryConfig {
        attempts: 3,
        base_ms: 10,
        factor: 2.0,
        jitter_ratio: 0.0,
        timeout_ms: 1_000,
    };
    EngineBuilder::new(config).build().unwrap()
}

fn webhook_rule() -> Rule {
    serde_json::from_value(json!({
        "id": "notify",
        "name": "notify",
        "trigger": {"kind": "event", "topic": "orders.created"},
        "actions": [
            {"kind": "callWebhook", "url": "https://hooks.example.invalid/orders", "method": "POST",
             "body": {"id": "{{event.id}}"}}
        ]
    }))
    .unwrap()
}

/// Polls until the condition holds or the deadline passes.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0 .. 200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within the deadline");
}

// ============================================================================
// SECTION: Command Handling
// ============================================================================

#[tokio::test]
async fn commands_apply_in_submission_order() {
    let engine = engine_with_fast_retries();
    let (handle, join) = EngineService::spawn(
        engine,
        Arc::new(FlakyTransport {
            attempts: AtomicU32::new(0),
            fail_first: 0,
        }),
    );

    handle
        .set_fact("customer:1:score".to_string(), json!(10))
        .await
        .unwrap();
    handle
        .set_fact("customer:1:score".to_string(), json!(20))
        .await
        .unwrap();

    let fact = handle
        .get_fact("customer:1:score".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fact.value, json!(20));
    assert_eq!(fact.version, 2);

    handle.stop(StopMode::DrainThenStop).await.unwrap();
    join.await.unwrap();
}

#[tokio::test]
async fn rule_firing_works_through_the_handle() {
    let engine = engine_with_fast_retries();
    let (handle, join) = EngineService::spawn(
        engine,
        Arc::new(FlakyTransport {
            attempts: AtomicU32::new(0),
            fail_first: 0,
        }),
    );

    handle
        .register_rule(
            serde_json::from_value(json!({
                "id": "vip",
                "name": "vip",
                "trigger": {"kind": "fact", "pattern": "customer:*:score"},
                "conditions": [
                    {"source": {"kind": "event", "field": "value"}, "operator": "gt", "value": 700}
                ],
                "actions": [
                    {"kind": "setFact", "key": "vip:customer-$1", "value": true}
                ]
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    handle
        .set_fact("customer:9:score".to_string(), json!(900))
        .await
        .unwrap();
    let promoted = handle
        .get_fact("vip:customer-9".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.value, json!(true));

    handle.stop(StopMode::DrainThenStop).await.unwrap();
    join.await.unwrap();
}

// ============================================================================
// SECTION: Webhook Delivery
// ============================================================================

#[tokio::test]
async fn webhooks_retry_until_success() {
    let transport = Arc::new(FlakyTransport {
        attempts: AtomicU32::new(0),
        fail_first: 2,
    });
    let mut engine = engine_with_fast_retries();
    engine.register_rule(webhook_rule()).unwrap();
    let (handle, join) = EngineService::spawn(engine, Arc::clone(&transport) as _);

    handle
        .emit("orders.created".to_string(), json!({"id": "o-1"}))
        .await
        .unwrap();

    let observed = Arc::clone(&transport);
    wait_for(move || observed.attempts.load(Ordering::SeqCst) == 3).await;

    handle.stop(StopMode::DrainThenStop).await.unwrap();
    join.await.unwrap();
}

#[tokio::test]
async fn exhausted_webhook_retries_are_non_fatal() {
    let transport = Arc::new(FlakyTransport {
        attempts: AtomicU32::new(0),
        fail_first: u32::MAX,
    });
    let mut engine = engine_with_fast_retries();
    engine.register_rule(webhook_rule()).unwrap();
    let (handle, join) = EngineService::spawn(engine, Arc::clone(&transport) as _);

    handle
        .emit("orders.created".to_string(), json!({"id": "o-1"}))
        .await
        .unwrap();

    let observed = Arc::clone(&transport);
    wait_for(move || observed.attempts.load(Ordering::SeqCst) == 3).await;

    // The engine keeps serving after the delivery gave up.
    handle
        .set_fact("still:alive".to_string(), json!(true))
        .await
        .unwrap();

    handle.stop(StopMode::DrainThenStop).await.unwrap();
    join.await.unwrap();
}

// ============================================================================
// SECTION: Shutdown
// ============================================================================

#[tokio::test]
async fn stopped_services_refuse_further_commands() {
    let engine = engine_with_fast_retries();
    let (handle, join) = EngineService::spawn(
        engine,
        Arc::new(FlakyTransport {
            attempts: AtomicU32::new(0),
            fail_first: 0,
        }),
    );

    handle.stop(StopMode::StopNow).await.unwrap();
    join.await.unwrap();

    let refused = handle
        .set_fact("after:stop".to_string(), json!(1))
        .await
        .unwrap_err();
    assert_eq!(refused.status_hint(), 503);
}

// ruleflow-core/src/interfaces/mod.rs
// ============================================================================
// Module: Ruleflow Interfaces
// Description: Backend-agnostic contracts for storage, lookups, and delivery.
// Purpose: Define the surfaces the engine integrates with external systems through.
// Dependencies: crate::core, async-trait, serde_json
// ============================================================================

//! ## Overview
//! Interfaces define how the engine integrates with external systems without
//! embedding backend-specific details. Storage and lookups resolve
//! synchronously to preserve dispatch determinism; webhook delivery is the
//! only asynchronous contract and runs outside the dispatch loop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::HttpMethod;
use crate::core::Observation;
use crate::core::StreamNotification;

// ============================================================================
// SECTION: Storage Adapter
// ============================================================================

/// Storage adapter errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Adapter I/O failure.
    #[error("storage io error: {0}")]
    Io(String),
    /// Stored data failed to decode.
    #[error("storage corruption: {0}")]
    Corrupt(String),
    /// Adapter is transiently unavailable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Key/value storage adapter used for rule, timer, and history persistence.
///
/// Implementations must provide atomic single-key writes; multi-key
/// consistency is not required.
pub trait StorageAdapter: Send + Sync {
    /// Saves a state document under the key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the write fails.
    fn save(&self, key: &str, state: &Value) -> Result<(), StorageError>;

    /// Loads the state document stored under the key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the read fails.
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Deletes the state document stored under the key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the delete fails.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lists stored keys starting with the prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the listing fails.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

// ============================================================================
// SECTION: Lookup Registry
// ============================================================================

/// Lookup invocation errors.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The lookup reported a failure.
    #[error("lookup error: {0}")]
    Failed(String),
}

/// Context handed to lookup invocations.
#[derive(Debug, Clone)]
pub struct LookupContext {
    /// Binding scope of the firing that invoked the lookup.
    pub scope: Value,
}

/// Named lookup callable from conditions.
///
/// Lookups invoked from conditions must resolve synchronously to preserve
/// evaluation semantics.
pub trait Lookup: Send + Sync {
    /// Invokes the lookup.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when the lookup fails.
    fn call(&self, args: &Value, ctx: &LookupContext) -> Result<Value, LookupError>;
}

impl<F> Lookup for F
where
    F: Fn(&Value, &LookupContext) -> Result<Value, LookupError> + Send + Sync,
{
    fn call(&self, args: &Value, ctx: &LookupContext) -> Result<Value, LookupError> {
        self(args, ctx)
    }
}

// ============================================================================
// SECTION: Observation Sink
// ============================================================================

/// Sink receiving dispatch observations.
pub trait ObservationSink: Send + Sync {
    /// Receives one observation.
    fn observe(&self, engine: &str, observation: &Observation);
}

// ============================================================================
// SECTION: Stream Subscribers
// ============================================================================

/// External subscriber receiving stream records after dispatch completes.
pub trait StreamSubscriber: Send + Sync {
    /// Receives one stream record.
    fn notify(&self, notification: &StreamNotification);
}

impl<F> StreamSubscriber for F
where
    F: Fn(&StreamNotification) + Send + Sync,
{
    fn notify(&self, notification: &StreamNotification) {
        self(notification);
    }
}

// ============================================================================
// SECTION: Webhook Transport
// ============================================================================

/// Webhook delivery request built by the action executor.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    /// Target URL, already template-expanded.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Optional JSON body.
    pub body: Option<Value>,
    /// Per-request timeout, in milliseconds.
    pub timeout_ms: u64,
}

/// Webhook delivery response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookResponse {
    /// HTTP status code.
    pub status: u16,
}

/// Webhook delivery errors.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Transport-level failure.
    #[error("webhook transport error: {0}")]
    Transport(String),
    /// Endpoint answered with a non-success status.
    #[error("webhook endpoint returned status {0}")]
    Status(u16),
    /// The request timed out.
    #[error("webhook request timed out")]
    Timeout,
}

/// Asynchronous webhook delivery transport.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Delivers one webhook request.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] when delivery fails.
    async fn deliver(&self, request: &WebhookRequest) -> Result<WebhookResponse, WebhookError>;
}

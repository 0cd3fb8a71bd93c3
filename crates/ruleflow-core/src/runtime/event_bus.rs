// ruleflow-core/src/runtime/event_bus.rs
// ============================================================================
// Module: Ruleflow Event Bus
// Description: Event construction, correlation inheritance, and subscriptions.
// Purpose: Assign event identity and fan out stream records post-dispatch.
// Dependencies: crate::core, crate::interfaces, ruleflow-match
// ============================================================================

//! ## Overview
//! The bus assigns event identifiers and timestamps and maintains the
//! correlation chain: an event emitted with a causation reference inherits
//! the causing event's correlation unless the caller supplied one, and root
//! events are minted a fresh correlation so chains are taggable from their
//! first link. A bounded history backs the inheritance lookup. External
//! subscribers register wildcard patterns and receive records only after the
//! dispatch cycle completes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use ruleflow_match::Pattern;
use serde_json::Value;

use crate::core::CorrelationId;
use crate::core::EngineError;
use crate::core::Event;
use crate::core::EventId;
use crate::core::FACT_SEPARATOR;
use crate::core::SharedClock;
use crate::core::StreamKind;
use crate::core::StreamNotification;
use crate::core::SubscriptionId;
use crate::core::TOPIC_SEPARATOR;
use crate::interfaces::StreamSubscriber;

/// Number of recent events whose correlations stay resolvable.
const CORRELATION_HISTORY_LIMIT: usize = 1_024;

// ============================================================================
// SECTION: Subscriptions
// ============================================================================

/// One registered stream subscription.
struct Subscription {
    /// Pattern parsed with the topic separator, used for event-keyed records.
    topic_pattern: Pattern,
    /// Pattern parsed with the fact separator, used for fact-keyed records.
    key_pattern: Option<Pattern>,
    /// Subscriber callback.
    subscriber: Arc<dyn StreamSubscriber>,
}

// ============================================================================
// SECTION: Event Bus
// ============================================================================

/// Event bus owned by the engine.
pub struct EventBus {
    /// Next event identifier.
    next_event_id: u64,
    /// Next subscription identifier.
    next_subscription_id: u64,
    /// Next minted correlation suffix.
    next_correlation: u64,
    /// Registered subscriptions.
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    /// Bounded correlation history for inheritance lookups.
    correlations: BTreeMap<EventId, Option<CorrelationId>>,
    /// Eviction order for the correlation history.
    correlation_order: VecDeque<EventId>,
    /// Injected time source for event timestamps.
    clock: SharedClock,
    /// Engine name used when minting correlation identifiers.
    engine_name: String,
}

impl EventBus {
    /// Creates an empty bus using the injected clock.
    #[must_use]
    pub fn new(clock: SharedClock, engine_name: impl Into<String>) -> Self {
        Self {
            next_event_id: 1,
            next_subscription_id: 1,
            next_correlation: 1,
            subscriptions: BTreeMap::new(),
            correlations: BTreeMap::new(),
            correlation_order: VecDeque::new(),
            clock,
            engine_name: engine_name.into(),
        }
    }

    /// Builds a new immutable event, assigning identity and correlation.
    ///
    /// When `correlation_id` is absent it is inherited from the causing
    /// event, or minted fresh for chain roots.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BadRequest`] when `causation_id` does not
    /// reference a known prior event.
    pub fn create_event(
        &mut self,
        topic: &str,
        data: Value,
        correlation_id: Option<CorrelationId>,
        causation_id: Option<EventId>,
        source: Option<String>,
    ) -> Result<Event, EngineError> {
        let inherited = match causation_id {
            Some(cause) => {
                let Some(known) = self.correlations.get(&cause) else {
                    return Err(EngineError::BadRequest(format!(
                        "causation id {cause} does not reference a prior event"
                    )));
                };
                known.clone()
            }
            None => None,
        };

        let correlation_id = correlation_id.or(inherited).or_else(|| {
            let minted = CorrelationId::new(format!(
                "{}-corr-{}",
                self.engine_name, self.next_correlation
            ));
            self.next_correlation += 1;
            Some(minted)
        });

        let event = Event {
            id: EventId::new(self.next_event_id),
            topic: topic.to_string(),
            data,
            timestamp: self.clock.now(),
            correlation_id,
            causation_id,
            source,
        };
        self.next_event_id += 1;
        self.remember(event.id, event.correlation_id.clone());
        Ok(event)
    }

    /// Records an event's correlation in the bounded history.
    fn remember(&mut self, id: EventId, correlation: Option<CorrelationId>) {
        self.correlations.insert(id, correlation);
        self.correlation_order.push_back(id);
        while self.correlation_order.len() > CORRELATION_HISTORY_LIMIT {
            if let Some(evicted) = self.correlation_order.pop_front() {
                self.correlations.remove(&evicted);
            }
        }
    }

    /// Registers a stream subscriber for a wildcard pattern.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the pattern is malformed.
    pub fn subscribe(
        &mut self,
        pattern: &str,
        subscriber: Arc<dyn StreamSubscriber>,
    ) -> Result<SubscriptionId, EngineError> {
        let topic_pattern = Pattern::parse(pattern, TOPIC_SEPARATOR)
            .map_err(|error| EngineError::Validation(error.to_string()))?;
        let key_pattern = Pattern::parse(pattern, FACT_SEPARATOR).ok();

        let id = SubscriptionId::new(self.next_subscription_id);
        self.next_subscription_id += 1;
        self.subscriptions.insert(
            id,
            Subscription {
                topic_pattern,
                key_pattern,
                subscriber,
            },
        );
        Ok(id)
    }

    /// Removes a subscription, returning whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Delivers one stream record to every subscription matching its key.
    pub fn deliver(&self, match_key: &str, notification: &StreamNotification) {
        for subscription in self.subscriptions.values() {
            let matched = match notification.kind {
                StreamKind::FactChanged => subscription
                    .key_pattern
                    .as_ref()
                    .is_some_and(|pattern| pattern.matches(match_key)),
                _ => subscription.topic_pattern.matches(match_key),
            };
            if matched {
                subscription.subscriber.notify(notification);
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

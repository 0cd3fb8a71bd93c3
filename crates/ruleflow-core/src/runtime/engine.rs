// ruleflow-core/src/runtime/engine.rs
// ============================================================================
// Module: Ruleflow Engine
// Description: The serialising dispatch core and its public operations.
// Purpose: Execute the trigger, evaluate, act pipeline with total ordering.
// Dependencies: crate::core, crate::interfaces, crate::runtime
// ============================================================================

//! ## Overview
//! The engine is the single canonical execution path: every API surface calls
//! into these methods. Dispatch is strictly sequential; one notification is
//! fully processed, with all nested emissions queued at the tail, before the
//! next is drawn. Executors stage effect records instead of calling back into
//! the engine, which keeps the pipeline free of re-entrant paths. External
//! subscribers are notified only after a dispatch cycle completes, so they
//! always observe post-action state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use ruleflow_match::Pattern;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::core::CorrelationId;
use crate::core::EngineConfig;
use crate::core::EngineError;
use crate::core::Event;
use crate::core::EventId;
use crate::core::FACT_SEPARATOR;
use crate::core::Fact;
use crate::core::FieldDiff;
use crate::core::Group;
use crate::core::GroupId;
use crate::core::MetricsSnapshot;
use crate::core::Notification;
use crate::core::Observation;
use crate::core::Rule;
use crate::core::RuleId;
use crate::core::RuleVersionEntry;
use crate::core::SharedClock;
use crate::core::StopMode;
use crate::core::StreamKind;
use crate::core::StreamNotification;
use crate::core::SubscriptionId;
use crate::core::SystemClock;
use crate::core::TOPIC_SEPARATOR;
use crate::core::Timer;
use crate::core::TimerName;
use crate::core::Timestamp;
use crate::core::Trigger;
use crate::core::ValidationWarning;
use crate::interfaces::Lookup;
use crate::interfaces::ObservationSink;
use crate::interfaces::StorageAdapter;
use crate::interfaces::StreamSubscriber;
use crate::runtime::baseline::BaselineTracker;
use crate::runtime::evaluator::Binding;
use crate::runtime::evaluator::ConditionEvaluator;
use crate::runtime::evaluator::LookupRegistry;
use crate::runtime::event_bus::EventBus;
use crate::runtime::executor::ActionEffect;
use crate::runtime::executor::ActionExecutor;
use crate::runtime::executor::WebhookJob;
use crate::runtime::fact_store::FactStore;
use crate::runtime::pattern_index::TriggerIndex;
use crate::runtime::registry::RuleRegistry;
use crate::runtime::registry::RuleStats;
use crate::runtime::temporal::TemporalMatcher;
use crate::runtime::timer_wheel::TimerWheel;

// ============================================================================
// SECTION: Default Observation Sink
// ============================================================================

/// Observation sink logging through `tracing`.
///
/// # Invariants
/// - Zero-sized marker type; carries no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObservationSink;

impl ObservationSink for TracingObservationSink {
    fn observe(&self, engine: &str, observation: &Observation) {
        debug!(
            target: "ruleflow::observe",
            engine,
            name = observation.name(),
            rule = observation.rule_id().map(RuleId::as_str),
            "observation"
        );
    }
}

// ============================================================================
// SECTION: Engine Builder
// ============================================================================

/// Builder assembling an engine from its collaborators.
pub struct EngineBuilder {
    /// Engine configuration.
    config: EngineConfig,
    /// Injected time source.
    clock: SharedClock,
    /// Optional rule persistence adapter.
    storage: Option<Arc<dyn StorageAdapter>>,
    /// Optional timer persistence adapter.
    timer_storage: Option<Arc<dyn StorageAdapter>>,
    /// Observation sink; defaults to the tracing sink.
    sink: Arc<dyn ObservationSink>,
    /// Pre-registered lookups.
    lookups: LookupRegistry,
}

impl EngineBuilder {
    /// Creates a builder with the wall clock and tracing sink.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            storage: None,
            timer_storage: None,
            sink: Arc::new(TracingObservationSink),
            lookups: LookupRegistry::new(),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a rule persistence adapter.
    #[must_use]
    pub fn storage(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(adapter);
        self
    }

    /// Attaches a durable-timer persistence adapter.
    #[must_use]
    pub fn timer_storage(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.timer_storage = Some(adapter);
        self
    }

    /// Replaces the observation sink.
    #[must_use]
    pub fn observation_sink(mut self, sink: Arc<dyn ObservationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Registers a named lookup.
    #[must_use]
    pub fn lookup(mut self, name: impl Into<String>, lookup: Arc<dyn Lookup>) -> Self {
        self.lookups.register(name, lookup);
        self
    }

    /// Builds the engine, reloading persisted rules and timers.
    ///
    /// Durable timers already past due fire during the build, in arming
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when persisted state cannot be loaded.
    pub fn build(self) -> Result<Engine, EngineError> {
        let now = self.clock.now();

        let mut registry =
            RuleRegistry::new(Arc::clone(&self.clock), self.config.persistence_key.clone());
        if let Some(adapter) = &self.storage {
            registry.set_adapter(Arc::clone(adapter));
            registry.load()?;
        }

        let mut index = TriggerIndex::new();
        index.rebuild(registry.rules())?;

        let mut temporal = TemporalMatcher::new();
        for rule in registry.rules() {
            if let Trigger::Temporal { pattern } = &rule.trigger {
                temporal.add_rule(rule.id.clone(), pattern, now)?;
            }
        }

        let mut timers = self
            .timer_storage
            .map_or_else(TimerWheel::new, TimerWheel::with_adapter);
        let overdue = timers.restore(now)?;

        let executor = ActionExecutor::new(self.config.webhook_retry.clone());
        let mut engine = Engine {
            facts: FactStore::new(Arc::clone(&self.clock)),
            bus: EventBus::new(Arc::clone(&self.clock), self.config.name.clone()),
            timers,
            index,
            registry,
            temporal,
            baselines: BaselineTracker::new(),
            lookups: self.lookups,
            executor,
            sink: self.sink,
            counters: BTreeMap::new(),
            fired_by_rule: BTreeMap::new(),
            pending_webhooks: Vec::new(),
            stopping: false,
            clock: self.clock,
            config: self.config,
        };

        for fire in overdue {
            engine.dispatch_root(Notification::TimerFired(fire));
        }
        Ok(engine)
    }
}

// ============================================================================
// SECTION: Candidate Snapshots
// ============================================================================

/// Snapshot of a candidate rule taken before evaluation.
struct Candidate {
    /// Rule document.
    rule: Rule,
    /// Compiled regexes for `matches` leaves.
    regexes: BTreeMap<String, Regex>,
    /// Parsed trigger pattern for capture extraction.
    trigger_pattern: Option<Pattern>,
    /// Registration order for priority tie-breaks.
    order: u64,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// The rule engine core.
///
/// All state is owned exclusively; callers receive snapshots. Methods taking
/// `&mut self` are serialised by the caller, normally the service shell's
/// bounded command channel.
pub struct Engine {
    /// Engine configuration.
    config: EngineConfig,
    /// Injected time source.
    clock: SharedClock,
    /// Fact store.
    facts: FactStore,
    /// Event bus.
    bus: EventBus,
    /// Timer wheel.
    timers: TimerWheel,
    /// Trigger index.
    index: TriggerIndex,
    /// Rule registry.
    registry: RuleRegistry,
    /// Temporal matcher.
    temporal: TemporalMatcher,
    /// Baseline tracker.
    baselines: BaselineTracker,
    /// Lookup registry.
    lookups: LookupRegistry,
    /// Action executor.
    executor: ActionExecutor,
    /// Observation sink.
    sink: Arc<dyn ObservationSink>,
    /// Counters keyed by observation name.
    counters: BTreeMap<String, u64>,
    /// Per-rule firing counters, capped by config.
    fired_by_rule: BTreeMap<String, u64>,
    /// Webhook jobs staged for the worker pool.
    pending_webhooks: Vec<WebhookJob>,
    /// Shutdown flag; mutating operations refuse once set.
    stopping: bool,
}

impl Engine {
    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Emits a root event and dispatches it to completion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on malformed topics or during shutdown.
    pub fn emit(&mut self, topic: &str, data: Value) -> Result<Event, EngineError> {
        self.emit_correlated(topic, data, None, None)
    }

    /// Emits an event carrying explicit correlation or causation links.
    ///
    /// A missing correlation is inherited from the causing event, or minted
    /// fresh for chain roots.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on malformed topics, unknown causation
    /// references, or during shutdown.
    pub fn emit_correlated(
        &mut self,
        topic: &str,
        data: Value,
        correlation_id: Option<CorrelationId>,
        causation_id: Option<EventId>,
    ) -> Result<Event, EngineError> {
        self.ensure_running()?;
        ensure_concrete(topic, TOPIC_SEPARATOR, "event topic")?;
        let event = self
            .bus
            .create_event(topic, data, correlation_id, causation_id, None)?;
        self.dispatch_root(Notification::EventEmitted(event.clone()));
        Ok(event)
    }

    // ------------------------------------------------------------------
    // Facts
    // ------------------------------------------------------------------

    /// Sets a fact and dispatches the change.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on malformed keys or during shutdown.
    pub fn set_fact(&mut self, key: &str, value: Value) -> Result<Fact, EngineError> {
        self.ensure_running()?;
        ensure_concrete(key, FACT_SEPARATOR, "fact key")?;
        let (fact, change) = self.facts.set(key, value)?;
        self.dispatch_root(Notification::FactChanged(change));
        Ok(fact)
    }

    /// Deletes a fact, dispatching the change when the key existed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] during shutdown.
    pub fn delete_fact(&mut self, key: &str) -> Result<bool, EngineError> {
        self.ensure_running()?;
        let Some(change) = self.facts.delete(key) else {
            return Ok(false);
        };
        self.dispatch_root(Notification::FactChanged(change));
        Ok(true)
    }

    /// Returns a snapshot of the fact stored under the key.
    #[must_use]
    pub fn get_fact(&self, key: &str) -> Option<Fact> {
        self.facts.get(key).cloned()
    }

    /// Returns snapshots of every fact.
    #[must_use]
    pub fn facts(&self) -> Vec<Fact> {
        self.facts.all()
    }

    /// Returns snapshots of facts matching the wildcard pattern.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] on malformed patterns.
    pub fn query_facts(&self, pattern: &str) -> Result<Vec<Fact>, EngineError> {
        self.facts.query(pattern)
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// Validates a rule document without mutating state.
    ///
    /// # Errors
    ///
    /// Returns the failure the document would be rejected with.
    pub fn validate_rule(&self, rule: &Rule) -> Result<Vec<ValidationWarning>, EngineError> {
        self.registry.validate(rule)
    }

    /// Registers a rule and indexes its trigger.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on validation failures or duplicate ids.
    pub fn register_rule(&mut self, rule: Rule) -> Result<Rule, EngineError> {
        self.ensure_running()?;
        let registered = self.registry.register(rule)?;
        self.index_rule(&registered)?;
        Ok(registered)
    }

    /// Updates a rule, optionally guarding against concurrent versions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on validation failures, missing rules, or
    /// version conflicts.
    pub fn update_rule(
        &mut self,
        rule: Rule,
        expected_version: Option<u64>,
    ) -> Result<Rule, EngineError> {
        self.ensure_running()?;
        let updated = self.registry.update(rule, expected_version)?;
        self.reindex_rule(&updated)?;
        Ok(updated)
    }

    /// Unregisters a rule and drops its index entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule does not exist.
    pub fn unregister_rule(&mut self, rule_id: &RuleId) -> Result<Rule, EngineError> {
        self.ensure_running()?;
        let removed = self.registry.unregister(rule_id)?;
        self.index.remove_rule(rule_id);
        self.temporal.remove_rule(rule_id);
        Ok(removed)
    }

    /// Enables a rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule does not exist.
    pub fn enable_rule(&mut self, rule_id: &RuleId) -> Result<Rule, EngineError> {
        self.ensure_running()?;
        self.registry.set_enabled(rule_id, true)
    }

    /// Disables a rule; it remains indexed but never fires.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule does not exist.
    pub fn disable_rule(&mut self, rule_id: &RuleId) -> Result<Rule, EngineError> {
        self.ensure_running()?;
        self.registry.set_enabled(rule_id, false)
    }

    /// Returns a snapshot of the rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule does not exist.
    pub fn get_rule(&self, rule_id: &RuleId) -> Result<Rule, EngineError> {
        self.registry.get(rule_id)
    }

    /// Returns snapshots of every rule.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.registry.list()
    }

    /// Restores a prior version as the active rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule or version is missing.
    pub fn rollback_rule(&mut self, rule_id: &RuleId, version: u64) -> Result<Rule, EngineError> {
        self.ensure_running()?;
        let restored = self.registry.rollback(rule_id, version)?;
        self.reindex_rule(&restored)?;
        Ok(restored)
    }

    /// Returns the append-only version history for a rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the rule has no history.
    pub fn rule_history(&self, rule_id: &RuleId) -> Result<Vec<RuleVersionEntry>, EngineError> {
        self.registry.history(rule_id)
    }

    /// Diffs two recorded versions of a rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when either version is missing.
    pub fn diff_rule(
        &self,
        rule_id: &RuleId,
        from: u64,
        to: u64,
    ) -> Result<Vec<FieldDiff>, EngineError> {
        self.registry.diff(rule_id, from, to)
    }

    /// Returns firing statistics for a rule.
    #[must_use]
    pub fn rule_stats(&self, rule_id: &RuleId) -> Option<RuleStats> {
        self.registry.stats(rule_id)
    }

    /// Exports snapshots of the active rule set.
    #[must_use]
    pub fn export_rules(&self) -> Vec<Rule> {
        self.registry.export()
    }

    /// Bulk-registers a rule set after validating every document.
    ///
    /// # Errors
    ///
    /// Returns the first validation or conflict failure without mutating.
    pub fn import_rules(&mut self, rules: Vec<Rule>) -> Result<Vec<Rule>, EngineError> {
        self.ensure_running()?;
        let imported = self.registry.import(rules)?;
        for rule in &imported {
            self.index_rule(rule)?;
        }
        Ok(imported)
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Creates or replaces a group.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] during shutdown.
    pub fn set_group(&mut self, group: Group) -> Result<(), EngineError> {
        self.ensure_running()?;
        self.registry.set_group(group);
        Ok(())
    }

    /// Enables a group and with it the member rules' eligibility.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the group does not exist.
    pub fn enable_group(&mut self, group_id: &GroupId) -> Result<Group, EngineError> {
        self.ensure_running()?;
        self.registry.set_group_enabled(group_id, true)
    }

    /// Disables a group; member rules are treated as disabled.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the group does not exist.
    pub fn disable_group(&mut self, group_id: &GroupId) -> Result<Group, EngineError> {
        self.ensure_running()?;
        self.registry.set_group_enabled(group_id, false)
    }

    /// Returns snapshots of every group.
    #[must_use]
    pub fn groups(&self) -> Vec<Group> {
        self.registry.groups()
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Arms a named timer relative to the injected clock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when persistence fails or during shutdown.
    pub fn arm_timer(
        &mut self,
        name: &str,
        delay_ms: u64,
        interval_ms: Option<u64>,
        context: Value,
    ) -> Result<Timer, EngineError> {
        self.ensure_running()?;
        let fire_at = self.clock.now().plus_millis(delay_ms);
        Ok(self
            .timers
            .arm(TimerName::new(name), fire_at, interval_ms, context, None)?)
    }

    /// Cancels a named timer, returning whether it was armed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when persistence fails or during shutdown.
    pub fn cancel_timer(&mut self, name: &str) -> Result<bool, EngineError> {
        self.ensure_running()?;
        Ok(self.timers.cancel(&TimerName::new(name))?)
    }

    /// Returns snapshots of every armed timer.
    #[must_use]
    pub fn timers(&self) -> Vec<Timer> {
        self.timers.list()
    }

    // ------------------------------------------------------------------
    // Streams, lookups, metrics
    // ------------------------------------------------------------------

    /// Registers an external stream subscriber for a wildcard pattern.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] on malformed patterns.
    pub fn subscribe(
        &mut self,
        pattern: &str,
        subscriber: Arc<dyn StreamSubscriber>,
    ) -> Result<SubscriptionId, EngineError> {
        self.bus.subscribe(pattern, subscriber)
    }

    /// Removes a stream subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Registers a named lookup usable from conditions.
    pub fn register_lookup(&mut self, name: impl Into<String>, lookup: Arc<dyn Lookup>) {
        self.lookups.register(name, lookup);
    }

    /// Records a metric sample into the rolling baselines.
    pub fn record_metric(&mut self, metric: &str, value: f64) {
        self.baselines.record(metric, value);
    }

    /// Returns a point-in-time counter snapshot.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            engine: self.config.name.clone(),
            counters: self.counters.clone(),
            fired_by_rule: self.fired_by_rule.clone(),
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the observation sink shared with webhook workers.
    #[must_use]
    pub fn observation_sink(&self) -> Arc<dyn ObservationSink> {
        Arc::clone(&self.sink)
    }

    /// Drains the webhook jobs staged since the last call.
    pub fn take_webhook_jobs(&mut self) -> Vec<WebhookJob> {
        std::mem::take(&mut self.pending_webhooks)
    }

    // ------------------------------------------------------------------
    // Ticking and shutdown
    // ------------------------------------------------------------------

    /// Fires due timers and sweeps temporal windows.
    ///
    /// Timer fires dispatch in `(fire_at, arming order)`; each fire is a
    /// fresh dispatch chain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when timer persistence
    /// fails.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        let now = self.clock.now();
        for fire in self.timers.collect_due(now)? {
            self.dispatch_root(Notification::TimerFired(fire));
        }
        for matched in self.temporal.sweep(now) {
            self.dispatch_root(Notification::TemporalMatched(matched));
        }
        Ok(())
    }

    /// Stops the engine, persisting final state.
    ///
    /// Queue draining is the service shell's concern; the core refuses new
    /// mutations once stopped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServiceUnavailable`] when final persistence
    /// fails.
    pub fn stop(&mut self, _mode: StopMode) -> Result<(), EngineError> {
        if self.stopping {
            return Ok(());
        }
        self.stopping = true;
        self.registry.persist_all()
    }

    /// Returns true once shutdown has begun.
    #[must_use]
    pub const fn is_stopping(&self) -> bool {
        self.stopping
    }

    // ------------------------------------------------------------------
    // Dispatch internals
    // ------------------------------------------------------------------

    /// Refuses mutating operations during shutdown.
    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.stopping {
            return Err(EngineError::ServiceUnavailable(
                "shutdown in progress".to_string(),
            ));
        }
        Ok(())
    }

    /// Adds a rule to the trigger index and temporal matcher.
    fn index_rule(&mut self, rule: &Rule) -> Result<(), EngineError> {
        self.index.add_rule(rule)?;
        if let Trigger::Temporal { pattern } = &rule.trigger {
            self.temporal
                .add_rule(rule.id.clone(), pattern, self.clock.now())?;
        }
        Ok(())
    }

    /// Replaces a rule's index entries after an update or rollback.
    fn reindex_rule(&mut self, rule: &Rule) -> Result<(), EngineError> {
        self.index.remove_rule(&rule.id);
        self.temporal.remove_rule(&rule.id);
        self.index_rule(rule)
    }

    /// Runs one dispatch cycle to completion, then notifies subscribers.
    fn dispatch_root(&mut self, root: Notification) {
        let mut queue: VecDeque<(Notification, u32)> = VecDeque::new();
        queue.push_back((root, 0));
        let mut stream_out: Vec<(String, StreamNotification)> = Vec::new();
        let mut aborted = false;

        while let Some((notification, depth)) = queue.pop_front() {
            self.process_notification(notification, depth, &mut queue, &mut stream_out, &mut aborted);
        }

        // Subscribers observe the final post-action state only.
        for (match_key, record) in stream_out {
            self.bus.deliver(&match_key, &record);
        }
    }

    /// Processes one notification: candidates, conditions, actions, effects.
    fn process_notification(
        &mut self,
        notification: Notification,
        depth: u32,
        queue: &mut VecDeque<(Notification, u32)>,
        stream_out: &mut Vec<(String, StreamNotification)>,
        aborted: &mut bool,
    ) {
        let now = self.clock.now();
        self.push_stream_record(&notification, now, stream_out);

        if let Notification::EventEmitted(event) = &notification {
            for rule_id in self.index.temporal_candidates(&event.topic) {
                if !self.rule_enabled(&rule_id) {
                    continue;
                }
                for matched in self.temporal.on_event(&rule_id, event, now) {
                    self.push_nested(
                        Notification::TemporalMatched(matched),
                        depth + 1,
                        queue,
                        aborted,
                    );
                }
            }
        }

        for candidate in self.collect_candidates(&notification) {
            self.fire_candidate(&candidate, &notification, depth, now, queue, stream_out, aborted);
        }
    }

    /// Emits the external stream record for a notification.
    fn push_stream_record(
        &self,
        notification: &Notification,
        now: Timestamp,
        stream_out: &mut Vec<(String, StreamNotification)>,
    ) {
        let record = match notification {
            Notification::EventEmitted(event) => Some((
                event.topic.clone(),
                StreamKind::Event,
                serde_json::to_value(event).unwrap_or(Value::Null),
            )),
            Notification::FactChanged(change) => Some((
                change.key.clone(),
                StreamKind::FactChanged,
                serde_json::to_value(change).unwrap_or(Value::Null),
            )),
            Notification::TimerFired(fire) => Some((
                fire.name.to_string(),
                StreamKind::TimerFired,
                serde_json::to_value(fire).unwrap_or(Value::Null),
            )),
            Notification::TemporalMatched(_) => None,
        };
        if let Some((match_key, kind, payload)) = record {
            stream_out.push((
                match_key,
                StreamNotification {
                    kind,
                    payload,
                    timestamp: now,
                },
            ));
        }
    }

    /// Returns true when a rule exists and is effectively enabled.
    fn rule_enabled(&self, rule_id: &RuleId) -> bool {
        self.registry
            .record(rule_id)
            .is_some_and(|record| self.registry.is_effectively_enabled(&record.rule))
    }

    /// Collects enabled candidates sorted by priority, then arrival.
    fn collect_candidates(&self, notification: &Notification) -> Vec<Candidate> {
        let ids: BTreeSet<RuleId> = match notification {
            Notification::EventEmitted(event) => self.index.candidates_for_event(&event.topic),
            Notification::FactChanged(change) => self.index.candidates_for_fact(&change.key),
            Notification::TimerFired(fire) => {
                self.index.candidates_for_timer(fire.name.as_str())
            }
            Notification::TemporalMatched(matched) => {
                std::iter::once(matched.rule_id.clone()).collect()
            }
        };

        let mut candidates: Vec<Candidate> = ids
            .into_iter()
            .filter_map(|rule_id| self.registry.record(&rule_id))
            .filter(|record| self.registry.is_effectively_enabled(&record.rule))
            .map(|record| Candidate {
                rule: record.rule.clone(),
                regexes: record.regexes.clone(),
                trigger_pattern: record.trigger_pattern.clone(),
                order: record.registration_order,
            })
            .collect();
        candidates.sort_by(|left, right| {
            right
                .rule
                .priority
                .cmp(&left.rule.priority)
                .then(left.order.cmp(&right.order))
        });
        candidates
    }

    /// Evaluates one candidate and executes its actions on success.
    #[allow(
        clippy::too_many_arguments,
        reason = "Dispatch context is threaded through one call per candidate."
    )]
    fn fire_candidate(
        &mut self,
        candidate: &Candidate,
        notification: &Notification,
        depth: u32,
        now: Timestamp,
        queue: &mut VecDeque<(Notification, u32)>,
        stream_out: &mut Vec<(String, StreamNotification)>,
        aborted: &mut bool,
    ) {
        let binding = build_binding(candidate, notification);
        let scope = binding.scope();
        let started = Instant::now();

        let evaluator = ConditionEvaluator {
            facts: &self.facts,
            lookups: &self.lookups,
            baselines: &self.baselines,
            regexes: &candidate.regexes,
        };
        let passed = match evaluator.evaluate_all(&candidate.rule.conditions, &scope) {
            Ok(passed) => passed,
            Err(failure) => {
                warn!(
                    rule = %candidate.rule.id,
                    %failure,
                    "condition evaluation failed; treating rule as not matched"
                );
                false
            }
        };

        if passed {
            self.observe(&Observation::RuleMatched {
                rule_id: candidate.rule.id.clone(),
            });
            stream_out.push(rule_stream_record(
                StreamKind::RuleMatched,
                &candidate.rule,
                now,
            ));

            let (outcomes, effects) =
                self.executor
                    .execute(&candidate.rule, &scope, &binding.captures);
            for outcome in &outcomes {
                let observation = if outcome.success {
                    Observation::ActionExecuted {
                        rule_id: candidate.rule.id.clone(),
                        action: outcome.action.to_string(),
                    }
                } else {
                    Observation::ActionFailed {
                        rule_id: candidate.rule.id.clone(),
                        action: outcome.action.to_string(),
                        message: outcome.error.clone().unwrap_or_default(),
                    }
                };
                self.observe(&observation);
            }

            self.apply_effects(effects, &binding, &scope, depth, now, queue, aborted);
            self.registry.record_fired(&candidate.rule.id, now);
            self.count_firing(&candidate.rule.id);
            self.observe(&Observation::RuleFired {
                rule_id: candidate.rule.id.clone(),
            });
            stream_out.push(rule_stream_record(
                StreamKind::RuleFired,
                &candidate.rule,
                now,
            ));
        }

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.observe(&Observation::RuleEvaluationDuration {
            rule_id: candidate.rule.id.clone(),
            millis: elapsed,
        });
        if elapsed > self.config.default_rule_timeout_ms {
            self.observe(&Observation::RuleTimeout {
                rule_id: candidate.rule.id.clone(),
                millis: elapsed,
            });
        }
    }

    /// Applies staged effects in action order, queueing nested notifications.
    #[allow(
        clippy::too_many_arguments,
        reason = "Dispatch context is threaded through one call per firing."
    )]
    fn apply_effects(
        &mut self,
        effects: Vec<ActionEffect>,
        binding: &Binding,
        scope: &Value,
        depth: u32,
        now: Timestamp,
        queue: &mut VecDeque<(Notification, u32)>,
        aborted: &mut bool,
    ) {
        for effect in effects {
            match effect {
                ActionEffect::SetFact { key, value } => match self.facts.set(&key, value) {
                    Ok((_, change)) => {
                        self.push_nested(
                            Notification::FactChanged(change),
                            depth + 1,
                            queue,
                            aborted,
                        );
                    }
                    Err(failure) => {
                        warn!(key = %key, %failure, "setFact effect rejected");
                    }
                },
                ActionEffect::DeleteFact { key } => {
                    if let Some(change) = self.facts.delete(&key) {
                        self.push_nested(
                            Notification::FactChanged(change),
                            depth + 1,
                            queue,
                            aborted,
                        );
                    }
                }
                ActionEffect::EmitEvent { topic, data } => {
                    let source = binding
                        .rule_id
                        .as_ref()
                        .map(|rule_id| format!("rule:{rule_id}"));
                    match self.bus.create_event(
                        &topic,
                        data,
                        binding.correlation_id.clone(),
                        binding.causation_id,
                        source,
                    ) {
                        Ok(event) => {
                            self.push_nested(
                                Notification::EventEmitted(event),
                                depth + 1,
                                queue,
                                aborted,
                            );
                        }
                        Err(failure) => {
                            warn!(topic = %topic, %failure, "emitEvent effect rejected");
                        }
                    }
                }
                ActionEffect::StartTimer {
                    name,
                    duration_ms,
                    recurring,
                } => {
                    let fire_at = now.plus_millis(duration_ms);
                    let interval = recurring.then_some(duration_ms);
                    if let Err(failure) = self.timers.arm(
                        name.clone(),
                        fire_at,
                        interval,
                        scope.clone(),
                        binding.rule_id.clone(),
                    ) {
                        warn!(timer = %name, %failure, "startTimer effect rejected");
                    }
                }
                ActionEffect::CancelTimer { name } => {
                    if let Err(failure) = self.timers.cancel(&name) {
                        warn!(timer = %name, %failure, "cancelTimer effect rejected");
                    }
                }
                ActionEffect::Webhook(job) => {
                    self.pending_webhooks.push(job);
                }
            }
        }
    }

    /// Queues a nested notification, enforcing the causation-depth bound.
    fn push_nested(
        &mut self,
        notification: Notification,
        child_depth: u32,
        queue: &mut VecDeque<(Notification, u32)>,
        aborted: &mut bool,
    ) {
        if *aborted {
            return;
        }
        if child_depth >= self.config.max_causation_depth {
            *aborted = true;
            error!(
                engine = %self.config.name,
                depth = child_depth,
                "causation depth exceeded; aborting dispatch chain"
            );
            self.observe(&Observation::CausationDepthExceeded { depth: child_depth });
            return;
        }
        queue.push_back((notification, child_depth));
    }

    /// Forwards an observation to the sink and bumps its counter.
    fn observe(&mut self, observation: &Observation) {
        self.sink.observe(&self.config.name, observation);
        *self
            .counters
            .entry(observation.name().to_string())
            .or_insert(0) += 1;
    }

    /// Bumps the per-rule firing counter, respecting the label cap.
    fn count_firing(&mut self, rule_id: &RuleId) {
        if !self.config.metrics.per_rule_metrics {
            return;
        }
        let key = rule_id.as_str();
        if let Some(count) = self.fired_by_rule.get_mut(key) {
            *count += 1;
            return;
        }
        if self.fired_by_rule.len() < self.config.metrics.max_labeled_rules {
            self.fired_by_rule.insert(key.to_string(), 1);
        }
    }
}

// ============================================================================
// SECTION: Binding Construction
// ============================================================================

/// Builds the per-firing binding for a candidate and notification.
fn build_binding(candidate: &Candidate, notification: &Notification) -> Binding {
    let mut binding = Binding {
        rule_id: Some(candidate.rule.id.clone()),
        rule_name: candidate.rule.name.clone(),
        ..Binding::default()
    };

    match notification {
        Notification::EventEmitted(event) => {
            binding.captures = captures_for(candidate, &event.topic);
            binding.correlation_id = event.correlation_id.clone();
            binding.causation_id = Some(event.id);
            binding.event = Some(event.clone());
        }
        Notification::FactChanged(change) => {
            binding.captures = captures_for(candidate, &change.key);
            binding.fact = Some(change.clone());
        }
        Notification::TimerFired(fire) => {
            binding.captures = captures_for(candidate, fire.name.as_str());
            binding.correlation_id = fire
                .context
                .get("correlationId")
                .and_then(Value::as_str)
                .map(CorrelationId::new);
            if let Some(context) = fire.context.as_object() {
                binding.context = context.clone().into_iter().collect();
            }
            binding.timer = Some(fire.clone());
        }
        Notification::TemporalMatched(matched) => {
            binding.correlation_id = matched.correlation_id.clone();
            binding.causation_id = matched.events.first().map(|event| event.id);
            binding.event = matched.events.first().cloned();
            binding.temporal = Some(matched.clone());
        }
    }
    binding
}

/// Extracts wildcard captures from the candidate's trigger pattern.
fn captures_for(candidate: &Candidate, key: &str) -> Vec<String> {
    candidate
        .trigger_pattern
        .as_ref()
        .and_then(|pattern| pattern.captures(key))
        .unwrap_or_default()
}

/// Builds a rule-keyed stream record.
fn rule_stream_record(
    kind: StreamKind,
    rule: &Rule,
    now: Timestamp,
) -> (String, StreamNotification) {
    (
        rule.id.as_str().to_string(),
        StreamNotification {
            kind,
            payload: serde_json::json!({
                "ruleId": rule.id,
                "ruleName": rule.name,
            }),
            timestamp: now,
        },
    )
}

/// Requires a concrete (wildcard-free) key or topic.
fn ensure_concrete(raw: &str, separator: char, what: &str) -> Result<(), EngineError> {
    let pattern = Pattern::parse(raw, separator)
        .map_err(|error| EngineError::Validation(format!("{what}: {error}")))?;
    if !pattern.is_exact() {
        return Err(EngineError::Validation(format!(
            "{what} must not contain wildcards"
        )));
    }
    Ok(())
}

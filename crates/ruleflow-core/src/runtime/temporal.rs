// ruleflow-core/src/runtime/temporal.rs
// ============================================================================
// Module: Ruleflow Temporal Matcher
// Description: Windowed sequence, absence, count, and aggregate matching.
// Purpose: Track per-key pattern state and produce temporal match records.
// Dependencies: crate::core, ruleflow-match
// ============================================================================

//! ## Overview
//! Each temporal rule owns a set of per-group state machines keyed by an
//! optional event-data field. Sequences advance automaton instances, one per
//! first-step match; absences track armed deadlines; counts and aggregates
//! share a bucket-indexed ring so window expiry costs one bucket drop rather
//! than one event scan. Internal inconsistencies and instance overflow reset
//! the affected group with a warning instead of failing the engine. Time
//! comes exclusively from the scheduler, so tests drive windows manually.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;

use ruleflow_match::Pattern;
use serde_json::Value;
use tracing::warn;

use crate::core::Aggregator;
use crate::core::CompareOp;
use crate::core::CountOp;
use crate::core::EngineError;
use crate::core::Event;
use crate::core::EventPattern;
use crate::core::RuleId;
use crate::core::TOPIC_SEPARATOR;
use crate::core::TemporalKind;
use crate::core::TemporalMatch;
use crate::core::TemporalPattern;
use crate::core::Timestamp;
use crate::core::template;

/// Automaton instances or pending deadlines retained per group.
const MAX_INSTANCES: usize = 256;

/// Ring buckets per window; expiry cost is proportional to expiring buckets.
const BUCKETS_PER_WINDOW: u64 = 60;

// ============================================================================
// SECTION: Compiled Patterns
// ============================================================================

/// Event pattern with its topic grammar parsed once.
struct CompiledEventPattern {
    /// Parsed topic pattern.
    topic: Pattern,
    /// Equality filter over event data fields.
    filter: Option<BTreeMap<String, Value>>,
}

impl CompiledEventPattern {
    /// Compiles a pattern from its document form.
    fn compile(pattern: &EventPattern) -> Result<Self, EngineError> {
        let topic = Pattern::parse(&pattern.topic, TOPIC_SEPARATOR).map_err(|error| {
            EngineError::Internal(format!(
                "validated temporal topic failed to parse: {error}"
            ))
        })?;
        Ok(Self {
            topic,
            filter: pattern.filter.clone(),
        })
    }

    /// Returns true when the event matches topic and filter.
    fn matches(&self, event: &Event) -> bool {
        if !self.topic.matches(&event.topic) {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        filter.iter().all(|(field, expected)| {
            template::resolve_path(&event.data, field) == Some(expected)
        })
    }
}

/// Temporal pattern with compiled event matchers.
enum CompiledTemporal {
    /// Ordered sequence.
    Sequence {
        /// Step matchers in order.
        events: Vec<CompiledEventPattern>,
        /// Window from the first matched event.
        within_ms: u64,
        /// Grouping field.
        group_by: Option<String>,
    },
    /// Absence deadline.
    Absence {
        /// Matcher whose arrival cancels the deadline.
        event: CompiledEventPattern,
        /// Deadline window.
        within_ms: u64,
        /// Matcher arming the deadline, when present.
        after: Option<CompiledEventPattern>,
        /// Grouping field.
        group_by: Option<String>,
    },
    /// Sliding count.
    Count {
        /// Counted matcher.
        event: CompiledEventPattern,
        /// Threshold.
        threshold: u64,
        /// Window length.
        within_ms: u64,
        /// Threshold operator.
        op: CountOp,
        /// Fire on every satisfying event.
        repeat: bool,
        /// Grouping field.
        group_by: Option<String>,
    },
    /// Rolling aggregate.
    Aggregate {
        /// Aggregated matcher.
        event: CompiledEventPattern,
        /// Aggregated data field.
        field: String,
        /// Aggregator.
        aggregator: Aggregator,
        /// Threshold operator.
        op: CompareOp,
        /// Threshold value.
        value: f64,
        /// Window length.
        within_ms: u64,
        /// Grouping field.
        group_by: Option<String>,
    },
}

impl CompiledTemporal {
    /// Compiles a temporal pattern from its document form.
    fn compile(pattern: &TemporalPattern) -> Result<Self, EngineError> {
        match pattern {
            TemporalPattern::Sequence {
                events,
                within_ms,
                group_by,
            } => Ok(Self::Sequence {
                events: events
                    .iter()
                    .map(CompiledEventPattern::compile)
                    .collect::<Result<_, _>>()?,
                within_ms: *within_ms,
                group_by: group_by.clone(),
            }),
            TemporalPattern::Absence {
                event,
                within_ms,
                after,
                group_by,
            } => Ok(Self::Absence {
                event: CompiledEventPattern::compile(event)?,
                within_ms: *within_ms,
                after: after
                    .as_ref()
                    .map(CompiledEventPattern::compile)
                    .transpose()?,
                group_by: group_by.clone(),
            }),
            TemporalPattern::Count {
                event,
                threshold,
                within_ms,
                op,
                repeat,
                group_by,
            } => Ok(Self::Count {
                event: CompiledEventPattern::compile(event)?,
                threshold: *threshold,
                within_ms: *within_ms,
                op: *op,
                repeat: *repeat,
                group_by: group_by.clone(),
            }),
            TemporalPattern::Aggregate {
                event,
                field,
                aggregator,
                op,
                value,
                within_ms,
                group_by,
            } => Ok(Self::Aggregate {
                event: CompiledEventPattern::compile(event)?,
                field: field.clone(),
                aggregator: *aggregator,
                op: *op,
                value: *value,
                within_ms: *within_ms,
                group_by: group_by.clone(),
            }),
        }
    }

    /// Returns the grouping field.
    fn group_by(&self) -> Option<&str> {
        match self {
            Self::Sequence { group_by, .. }
            | Self::Absence { group_by, .. }
            | Self::Count { group_by, .. }
            | Self::Aggregate { group_by, .. } => group_by.as_deref(),
        }
    }
}

// ============================================================================
// SECTION: Group State
// ============================================================================

/// One in-flight sequence automaton.
struct SequenceInstance {
    /// Time of the first matched event.
    started_at: Timestamp,
    /// Index of the next step to match.
    index: usize,
    /// Events matched so far.
    matched: Vec<Event>,
}

/// One armed absence deadline.
struct PendingAbsence {
    /// When the absence fires if the event never arrives.
    deadline: Timestamp,
    /// Initiating event, for patterns with an `after` matcher.
    initiating: Option<Event>,
}

/// Per-group state, shaped by the owning pattern kind.
enum GroupState {
    /// Sequence automaton instances.
    Sequence {
        /// Open instances, in start order.
        instances: Vec<SequenceInstance>,
    },
    /// Armed absence deadlines.
    Absence {
        /// Pending deadlines, in arming order.
        pending: Vec<PendingAbsence>,
    },
    /// Sliding-window ring for counts and aggregates.
    Window {
        /// Bucket ring over the window.
        ring: BucketRing,
        /// Whether the threshold held after the last evaluation.
        satisfied: bool,
    },
}

// ============================================================================
// SECTION: Bucket Ring
// ============================================================================

/// One time bucket of aggregated samples.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Bucket start in unix milliseconds.
    start: i64,
    /// Samples in the bucket.
    count: u64,
    /// Sum of sample values.
    sum: f64,
    /// Minimum sample value.
    min: f64,
    /// Maximum sample value.
    max: f64,
}

/// Bucket-indexed ring shared by count and aggregate windows.
struct BucketRing {
    /// Bucket width in milliseconds.
    bucket_ms: u64,
    /// Window length in milliseconds.
    window_ms: u64,
    /// Buckets in start order.
    buckets: VecDeque<Bucket>,
}

impl BucketRing {
    /// Creates a ring for the window length.
    fn new(window_ms: u64) -> Self {
        Self {
            bucket_ms: (window_ms / BUCKETS_PER_WINDOW).max(1),
            window_ms,
            buckets: VecDeque::new(),
        }
    }

    /// Adds one sample at the given time.
    fn add(&mut self, now: Timestamp, value: f64) {
        let millis = now.as_millis();
        #[allow(
            clippy::cast_possible_wrap,
            reason = "Bucket widths are far below i64 range."
        )]
        let width = self.bucket_ms as i64;
        let start = millis - millis.rem_euclid(width);

        if let Some(bucket) = self.buckets.back_mut() {
            if bucket.start == start {
                bucket.count += 1;
                bucket.sum += value;
                bucket.min = bucket.min.min(value);
                bucket.max = bucket.max.max(value);
                return;
            }
        }
        self.buckets.push_back(Bucket {
            start,
            count: 1,
            sum: value,
            min: value,
            max: value,
        });
    }

    /// Drops buckets that fell out of the window.
    fn prune(&mut self, now: Timestamp) {
        #[allow(
            clippy::cast_possible_wrap,
            reason = "Bucket widths are far below i64 range."
        )]
        let width = self.bucket_ms as i64;
        let horizon = now.as_millis() - window_wrap(self.window_ms);
        while let Some(front) = self.buckets.front() {
            if front.start + width <= horizon {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the number of samples in the window.
    fn count(&self) -> u64 {
        self.buckets.iter().map(|bucket| bucket.count).sum()
    }

    /// Returns the aggregate over the window, when any samples remain.
    fn aggregate(&self, aggregator: Aggregator) -> Option<f64> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        let value = match aggregator {
            Aggregator::Count => {
                #[allow(
                    clippy::cast_precision_loss,
                    reason = "Window sample counts are far below f64 precision limits."
                )]
                let count = count as f64;
                count
            }
            Aggregator::Sum => self.buckets.iter().map(|bucket| bucket.sum).sum(),
            Aggregator::Avg => {
                let sum: f64 = self.buckets.iter().map(|bucket| bucket.sum).sum();
                #[allow(
                    clippy::cast_precision_loss,
                    reason = "Window sample counts are far below f64 precision limits."
                )]
                let count = count as f64;
                sum / count
            }
            Aggregator::Min => self
                .buckets
                .iter()
                .map(|bucket| bucket.min)
                .fold(f64::INFINITY, f64::min),
            Aggregator::Max => self
                .buckets
                .iter()
                .map(|bucket| bucket.max)
                .fold(f64::NEG_INFINITY, f64::max),
        };
        Some(value)
    }
}

/// Converts a window length to the signed arithmetic domain.
#[allow(
    clippy::cast_possible_wrap,
    reason = "Window lengths are far below i64 range."
)]
const fn window_wrap(window_ms: u64) -> i64 {
    window_ms as i64
}

// ============================================================================
// SECTION: Temporal Matcher
// ============================================================================

/// Per-rule temporal pattern state.
struct PatternState {
    /// Compiled pattern.
    pattern: CompiledTemporal,
    /// Group states keyed by grouping value; empty string is the global key.
    groups: BTreeMap<String, GroupState>,
}

/// Temporal matcher owned by the engine.
#[derive(Default)]
pub struct TemporalMatcher {
    /// Pattern state keyed by owning rule.
    states: BTreeMap<RuleId, PatternState>,
}

impl TemporalMatcher {
    /// Creates an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: BTreeMap::new(),
        }
    }

    /// Registers a temporal rule's pattern.
    ///
    /// Absence patterns without an `after` matcher arm their global deadline
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] when a validated pattern fails to
    /// compile.
    pub fn add_rule(
        &mut self,
        rule_id: RuleId,
        pattern: &TemporalPattern,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let compiled = CompiledTemporal::compile(pattern)?;
        let mut groups = BTreeMap::new();
        if let CompiledTemporal::Absence {
            within_ms,
            after: None,
            ..
        } = &compiled
        {
            groups.insert(
                String::new(),
                GroupState::Absence {
                    pending: vec![PendingAbsence {
                        deadline: now.plus_millis(*within_ms),
                        initiating: None,
                    }],
                },
            );
        }
        self.states.insert(
            rule_id,
            PatternState {
                pattern: compiled,
                groups,
            },
        );
        Ok(())
    }

    /// Drops a rule's pattern state.
    pub fn remove_rule(&mut self, rule_id: &RuleId) {
        self.states.remove(rule_id);
    }

    /// Feeds one event into a rule's pattern state.
    ///
    /// Returns the matches the event completed.
    pub fn on_event(
        &mut self,
        rule_id: &RuleId,
        event: &Event,
        now: Timestamp,
    ) -> Vec<TemporalMatch> {
        let Some(state) = self.states.get_mut(rule_id) else {
            return Vec::new();
        };
        let key = group_key(state.pattern.group_by(), event);

        match &state.pattern {
            CompiledTemporal::Sequence {
                events, within_ms, ..
            } => on_sequence_event(
                rule_id,
                &key,
                state.groups.entry(key.clone()).or_insert_with(|| {
                    GroupState::Sequence {
                        instances: Vec::new(),
                    }
                }),
                events,
                *within_ms,
                event,
                now,
            ),
            CompiledTemporal::Absence {
                event: awaited,
                within_ms,
                after,
                ..
            } => {
                on_absence_event(
                    state.groups.entry(key).or_insert_with(|| {
                        GroupState::Absence {
                            pending: Vec::new(),
                        }
                    }),
                    awaited,
                    after.as_ref(),
                    *within_ms,
                    event,
                    now,
                );
                Vec::new()
            }
            CompiledTemporal::Count {
                event: counted,
                threshold,
                within_ms,
                op,
                repeat,
                ..
            } => {
                if !counted.matches(event) {
                    return Vec::new();
                }
                let group = state.groups.entry(key.clone()).or_insert_with(|| {
                    GroupState::Window {
                        ring: BucketRing::new(*within_ms),
                        satisfied: false,
                    }
                });
                let GroupState::Window { ring, satisfied } = group else {
                    reset_group(rule_id, &key, group, &state.pattern);
                    return Vec::new();
                };
                ring.add(now, 1.0);
                ring.prune(now);
                let count = ring.count();
                let holds = count_holds(*op, count, *threshold);
                let fire = holds && (!*satisfied || *repeat);
                *satisfied = holds;
                if fire {
                    #[allow(
                        clippy::cast_precision_loss,
                        reason = "Window sample counts are far below f64 precision limits."
                    )]
                    let value = count as f64;
                    return vec![temporal_match(
                        rule_id,
                        &key,
                        TemporalKind::Count,
                        vec![event.clone()],
                        Some(value),
                    )];
                }
                Vec::new()
            }
            CompiledTemporal::Aggregate {
                event: sampled,
                field,
                aggregator,
                op,
                value: threshold,
                within_ms,
                ..
            } => {
                if !sampled.matches(event) {
                    return Vec::new();
                }
                let Some(sample) =
                    template::resolve_path(&event.data, field).and_then(Value::as_f64)
                else {
                    return Vec::new();
                };
                let group = state.groups.entry(key.clone()).or_insert_with(|| {
                    GroupState::Window {
                        ring: BucketRing::new(*within_ms),
                        satisfied: false,
                    }
                });
                let GroupState::Window { ring, satisfied } = group else {
                    reset_group(rule_id, &key, group, &state.pattern);
                    return Vec::new();
                };
                ring.add(now, sample);
                ring.prune(now);
                let current = ring.aggregate(*aggregator);
                let holds = current
                    .is_some_and(|current| compare_holds(*op, current, *threshold));
                let fire = holds && !*satisfied;
                *satisfied = holds;
                if fire {
                    return vec![temporal_match(
                        rule_id,
                        &key,
                        TemporalKind::Aggregate,
                        vec![event.clone()],
                        current,
                    )];
                }
                Vec::new()
            }
        }
    }

    /// Sweeps expired windows and fires due absences.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<TemporalMatch> {
        let mut matches = Vec::new();
        for (rule_id, state) in &mut self.states {
            match &state.pattern {
                CompiledTemporal::Sequence { within_ms, .. } => {
                    for group in state.groups.values_mut() {
                        if let GroupState::Sequence { instances } = group {
                            instances.retain(|instance| {
                                now.millis_since(instance.started_at) <= *within_ms
                            });
                        }
                    }
                }
                CompiledTemporal::Absence {
                    within_ms, after, ..
                } => {
                    for (key, group) in &mut state.groups {
                        let GroupState::Absence { pending } = group else {
                            continue;
                        };
                        let mut due = Vec::new();
                        pending.retain(|armed| {
                            if armed.deadline <= now {
                                due.push(armed.initiating.clone());
                                false
                            } else {
                                true
                            }
                        });
                        for initiating in due {
                            matches.push(temporal_match(
                                rule_id,
                                key,
                                TemporalKind::Absence,
                                initiating.into_iter().collect(),
                                None,
                            ));
                            // Standing watchdogs re-arm for the next window.
                            if after.is_none() {
                                pending.push(PendingAbsence {
                                    deadline: now.plus_millis(*within_ms),
                                    initiating: None,
                                });
                            }
                        }
                    }
                }
                CompiledTemporal::Count { op, threshold, .. } => {
                    for group in state.groups.values_mut() {
                        if let GroupState::Window { ring, satisfied } = group {
                            ring.prune(now);
                            *satisfied = count_holds(*op, ring.count(), *threshold);
                        }
                    }
                }
                CompiledTemporal::Aggregate {
                    aggregator,
                    op,
                    value,
                    ..
                } => {
                    for group in state.groups.values_mut() {
                        if let GroupState::Window { ring, satisfied } = group {
                            ring.prune(now);
                            *satisfied = ring
                                .aggregate(*aggregator)
                                .is_some_and(|current| compare_holds(*op, current, *value));
                        }
                    }
                }
            }
            // Drop groups with no remaining state to bound memory.
            state.groups.retain(|_, group| match group {
                GroupState::Sequence { instances } => !instances.is_empty(),
                GroupState::Absence { pending } => !pending.is_empty(),
                GroupState::Window { ring, .. } => !ring.buckets.is_empty(),
            });
        }
        matches
    }
}

// ============================================================================
// SECTION: Kind Helpers
// ============================================================================

/// Advances sequence instances for one event.
fn on_sequence_event(
    rule_id: &RuleId,
    key: &str,
    group: &mut GroupState,
    events: &[CompiledEventPattern],
    within_ms: u64,
    event: &Event,
    now: Timestamp,
) -> Vec<TemporalMatch> {
    let GroupState::Sequence { instances } = group else {
        warn!(
            rule = %rule_id,
            group = key,
            "sequence state had the wrong shape; resetting group"
        );
        *group = GroupState::Sequence {
            instances: Vec::new(),
        };
        return Vec::new();
    };

    // Late events for closed windows are dropped.
    instances.retain(|instance| now.millis_since(instance.started_at) <= within_ms);

    for instance in instances.iter_mut() {
        if instance.index < events.len() && events[instance.index].matches(event) {
            instance.matched.push(event.clone());
            instance.index += 1;
        }
    }

    let mut matches = Vec::new();
    instances.retain(|instance| {
        if instance.index == events.len() {
            matches.push(sequence_match(rule_id, key, &instance.matched));
            false
        } else {
            true
        }
    });

    // Every first-step match opens a fresh concurrent instance.
    if events[0].matches(event) {
        if events.len() == 1 {
            matches.push(sequence_match(rule_id, key, std::slice::from_ref(event)));
        } else {
            if instances.len() >= MAX_INSTANCES {
                warn!(
                    rule = %rule_id,
                    group = key,
                    "sequence instance overflow; resetting group"
                );
                instances.clear();
            }
            instances.push(SequenceInstance {
                started_at: now,
                index: 1,
                matched: vec![event.clone()],
            });
        }
    }
    matches
}

/// Builds a sequence match record from its matched events.
fn sequence_match(rule_id: &RuleId, key: &str, matched: &[Event]) -> TemporalMatch {
    temporal_match(
        rule_id,
        key,
        TemporalKind::Sequence,
        matched.to_vec(),
        None,
    )
}

/// Updates absence state for one event.
fn on_absence_event(
    group: &mut GroupState,
    awaited: &CompiledEventPattern,
    after: Option<&CompiledEventPattern>,
    within_ms: u64,
    event: &Event,
    now: Timestamp,
) {
    let GroupState::Absence { pending } = group else {
        *group = GroupState::Absence {
            pending: Vec::new(),
        };
        return;
    };

    if awaited.matches(event) {
        pending.clear();
        // Standing watchdogs restart their window on every arrival.
        if after.is_none() {
            pending.push(PendingAbsence {
                deadline: now.plus_millis(within_ms),
                initiating: None,
            });
        }
    }

    if let Some(after) = after {
        if after.matches(event) {
            if pending.len() >= MAX_INSTANCES {
                warn!("absence deadline overflow; resetting group");
                pending.clear();
            }
            pending.push(PendingAbsence {
                deadline: now.plus_millis(within_ms),
                initiating: Some(event.clone()),
            });
        }
    }
}

/// Resets a group whose state shape diverged from its pattern.
fn reset_group(rule_id: &RuleId, key: &str, group: &mut GroupState, pattern: &CompiledTemporal) {
    warn!(
        rule = %rule_id,
        group = key,
        "window state had the wrong shape; resetting group"
    );
    let window_ms = match pattern {
        CompiledTemporal::Count { within_ms, .. }
        | CompiledTemporal::Aggregate { within_ms, .. }
        | CompiledTemporal::Sequence { within_ms, .. }
        | CompiledTemporal::Absence { within_ms, .. } => *within_ms,
    };
    *group = GroupState::Window {
        ring: BucketRing::new(window_ms),
        satisfied: false,
    };
}

/// Builds a temporal match record, inheriting the first event's correlation.
fn temporal_match(
    rule_id: &RuleId,
    key: &str,
    kind: TemporalKind,
    events: Vec<Event>,
    value: Option<f64>,
) -> TemporalMatch {
    let correlation_id = events
        .first()
        .and_then(|event| event.correlation_id.clone());
    TemporalMatch {
        rule_id: rule_id.clone(),
        group_key: key.to_string(),
        kind,
        events,
        value,
        correlation_id,
    }
}

/// Extracts the grouping key for an event; empty is the global key.
fn group_key(group_by: Option<&str>, event: &Event) -> String {
    let Some(field) = group_by else {
        return String::new();
    };
    template::resolve_path(&event.data, field)
        .map(template::stringify)
        .unwrap_or_default()
}

/// Applies a count threshold operator.
const fn count_holds(op: CountOp, count: u64, threshold: u64) -> bool {
    match op {
        CountOp::Gte => count >= threshold,
        CountOp::Gt => count > threshold,
        CountOp::Eq => count == threshold,
    }
}

/// Applies an aggregate threshold operator.
fn compare_holds(op: CompareOp, current: f64, threshold: f64) -> bool {
    match op {
        CompareOp::Gt => current > threshold,
        CompareOp::Gte => current >= threshold,
        CompareOp::Lt => current < threshold,
        CompareOp::Lte => current <= threshold,
        CompareOp::Eq => (current - threshold).abs() < f64::EPSILON,
        CompareOp::Ne => (current - threshold).abs() >= f64::EPSILON,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

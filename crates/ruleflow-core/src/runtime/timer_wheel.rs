// ruleflow-core/src/runtime/timer_wheel.rs
// ============================================================================
// Module: Ruleflow Timer Wheel
// Description: Named one-shot and recurring timers with optional persistence.
// Purpose: Collect due timers in deterministic order and survive restarts.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! Timers are keyed by name; re-arming replaces the prior arming. Due timers
//! fire in `(fire_at, arming order)` order. Recurring timers re-arm at
//! `fire_at + interval` computed from the scheduled fire rather than the
//! wall clock, so drift does not accumulate. When a storage adapter is
//! configured, the armed set is written on every mutation and reloaded on
//! start; armings already past due fire immediately in arming order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::core::RuleId;
use crate::core::Timer;
use crate::core::TimerFire;
use crate::core::TimerName;
use crate::core::Timestamp;
use crate::interfaces::StorageAdapter;
use crate::interfaces::StorageError;

/// Storage key holding the armed set.
const TIMER_STATE_KEY: &str = "timers";

// ============================================================================
// SECTION: Timer Wheel
// ============================================================================

/// Timer wheel owned by the engine.
pub struct TimerWheel {
    /// Armed timers keyed by name.
    armed: BTreeMap<TimerName, Timer>,
    /// Due ordering over `(fire_at, arming sequence, name)`.
    due: BTreeSet<(Timestamp, u64, TimerName)>,
    /// Next arming sequence number.
    next_seq: u64,
    /// Optional persistence adapter.
    adapter: Option<Arc<dyn StorageAdapter>>,
}

impl TimerWheel {
    /// Creates an empty wheel without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            armed: BTreeMap::new(),
            due: BTreeSet::new(),
            next_seq: 1,
            adapter: None,
        }
    }

    /// Creates a wheel persisting its armed set through the adapter.
    #[must_use]
    pub fn with_adapter(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            armed: BTreeMap::new(),
            due: BTreeSet::new(),
            next_seq: 1,
            adapter: Some(adapter),
        }
    }

    /// Arms a timer, replacing any prior arming under the same name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the persisted write fails.
    pub fn arm(
        &mut self,
        name: TimerName,
        fire_at: Timestamp,
        interval_ms: Option<u64>,
        context: Value,
        rule_id: Option<RuleId>,
    ) -> Result<Timer, StorageError> {
        self.remove_entry(&name);

        let timer = Timer {
            name: name.clone(),
            fire_at,
            interval_ms,
            rule_id,
            context,
            armed_seq: self.next_seq,
        };
        self.next_seq += 1;
        self.due
            .insert((timer.fire_at, timer.armed_seq, name.clone()));
        self.armed.insert(name, timer.clone());
        self.persist()?;
        Ok(timer)
    }

    /// Cancels a timer, returning whether it was armed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the persisted write fails.
    pub fn cancel(&mut self, name: &TimerName) -> Result<bool, StorageError> {
        let removed = self.remove_entry(name);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Returns snapshots of every armed timer in name order.
    #[must_use]
    pub fn list(&self) -> Vec<Timer> {
        self.armed.values().cloned().collect()
    }

    /// Collects every timer due at `now`, re-arming recurring ones.
    ///
    /// Fires are ordered by `(fire_at, arming order)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the persisted write fails.
    pub fn collect_due(&mut self, now: Timestamp) -> Result<Vec<TimerFire>, StorageError> {
        let mut fires = Vec::new();
        let mut mutated = false;

        while let Some((fire_at, seq, name)) = self.due.pop_first() {
            if fire_at > now {
                self.due.insert((fire_at, seq, name));
                break;
            }
            let Some(timer) = self.armed.remove(&name) else {
                continue;
            };
            mutated = true;

            fires.push(TimerFire {
                name: timer.name.clone(),
                scheduled_for: timer.fire_at,
                context: timer.context.clone(),
                rule_id: timer.rule_id.clone(),
            });

            if let Some(interval) = timer.interval_ms {
                // Re-arm from the scheduled fire to avoid cumulative drift.
                let rearmed = Timer {
                    fire_at: timer.fire_at.plus_millis(interval),
                    armed_seq: self.next_seq,
                    ..timer
                };
                self.next_seq += 1;
                self.due.insert((
                    rearmed.fire_at,
                    rearmed.armed_seq,
                    rearmed.name.clone(),
                ));
                self.armed.insert(rearmed.name.clone(), rearmed);
            }
        }

        if mutated {
            self.persist()?;
        }
        Ok(fires)
    }

    /// Reloads the persisted armed set, re-arming in stored arming order.
    ///
    /// Returns the fires for armings already past due at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the load or decode fails.
    pub fn restore(&mut self, now: Timestamp) -> Result<Vec<TimerFire>, StorageError> {
        let Some(adapter) = self.adapter.clone() else {
            return Ok(Vec::new());
        };
        let Some(state) = adapter.load(TIMER_STATE_KEY)? else {
            return Ok(Vec::new());
        };

        let mut timers: Vec<Timer> = serde_json::from_value(state)
            .map_err(|error| StorageError::Corrupt(error.to_string()))?;
        timers.sort_by_key(|timer| timer.armed_seq);

        for timer in timers {
            self.next_seq = self.next_seq.max(timer.armed_seq + 1);
            self.due
                .insert((timer.fire_at, timer.armed_seq, timer.name.clone()));
            self.armed.insert(timer.name.clone(), timer);
        }
        self.collect_due(now)
    }

    /// Removes a timer from both indexes.
    fn remove_entry(&mut self, name: &TimerName) -> bool {
        let Some(existing) = self.armed.remove(name) else {
            return false;
        };
        self.due
            .remove(&(existing.fire_at, existing.armed_seq, existing.name));
        true
    }

    /// Writes the armed set through the adapter, when configured.
    fn persist(&self) -> Result<(), StorageError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let state = serde_json::to_value(self.list())
            .map_err(|error| StorageError::Io(error.to_string()))?;
        adapter.save(TIMER_STATE_KEY, &state)
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
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

    use std::sync::Arc;

    use serde_json::json;

    use super::TimerWheel;
    use crate::core::TimerName;
    use crate::core::Timestamp;
    use crate::runtime::storage::MemoryStorageAdapter;

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn due_timers_fire_in_time_then_arming_order() {
        let mut wheel = TimerWheel::new();
        wheel
            .arm(TimerName::new("b"), ts(100), None, json!({}), None)
            .unwrap();
        wheel
            .arm(TimerName::new("a"), ts(100), None, json!({}), None)
            .unwrap();
        wheel
            .arm(TimerName::new("c"), ts(50), None, json!({}), None)
            .unwrap();

        let fires = wheel.collect_due(ts(100)).unwrap();
        let names: Vec<&str> = fires.iter().map(|fire| fire.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
        assert!(wheel.list().is_empty());
    }

    #[test]
    fn rearming_replaces_prior_arming() {
        let mut wheel = TimerWheel::new();
        wheel
            .arm(TimerName::new("t"), ts(100), None, json!({"v": 1}), None)
            .unwrap();
        wheel
            .arm(TimerName::new("t"), ts(500), None, json!({"v": 2}), None)
            .unwrap();

        assert!(wheel.collect_due(ts(100)).unwrap().is_empty());
        let fires = wheel.collect_due(ts(500)).unwrap();
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].context, json!({"v": 2}));
    }

    #[test]
    fn recurring_timers_rearm_from_the_scheduled_fire() {
        let mut wheel = TimerWheel::new();
        wheel
            .arm(TimerName::new("r"), ts(100), Some(100), json!({}), None)
            .unwrap();

        // Late collection at 250 fires both the 100 and the 200 armings.
        let first = wheel.collect_due(ts(250)).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].scheduled_for, ts(100));
        assert_eq!(first[1].scheduled_for, ts(200));
        assert_eq!(wheel.list()[0].fire_at, ts(300));
    }

    #[test]
    fn cancel_reports_presence() {
        let mut wheel = TimerWheel::new();
        wheel
            .arm(TimerName::new("t"), ts(100), None, json!({}), None)
            .unwrap();
        assert!(wheel.cancel(&TimerName::new("t")).unwrap());
        assert!(!wheel.cancel(&TimerName::new("t")).unwrap());
    }

    #[test]
    fn restore_fires_past_due_armings_in_arming_order() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let mut wheel = TimerWheel::with_adapter(adapter.clone());
        wheel
            .arm(TimerName::new("late-2"), ts(20), None, json!({}), None)
            .unwrap();
        wheel
            .arm(TimerName::new("late-1"), ts(20), None, json!({}), None)
            .unwrap();
        wheel
            .arm(TimerName::new("future"), ts(10_000), None, json!({}), None)
            .unwrap();

        let mut restored = TimerWheel::with_adapter(adapter);
        let fires = restored.restore(ts(1_000)).unwrap();
        let names: Vec<&str> = fires.iter().map(|fire| fire.name.as_str()).collect();
        assert_eq!(names, vec!["late-2", "late-1"]);
        assert_eq!(restored.list().len(), 1);
    }
}

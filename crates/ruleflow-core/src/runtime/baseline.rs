// ruleflow-core/src/runtime/baseline.rs
// ============================================================================
// Module: Ruleflow Baseline Tracker
// Description: Rolling per-metric baselines for anomaly-style conditions.
// Purpose: Compare live metric samples against their recent history.
// Dependencies: std
// ============================================================================

//! ## Overview
//! The tracker keeps a bounded sample window per metric with running sum and
//! sum-of-squares, so mean and standard deviation are O(1) per read. The
//! `above`/`below` comparisons use the sensitivity as a ratio against the
//! baseline mean; `deviates` uses it as a standard-deviation multiplier.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;

use crate::core::BaselineComparison;

/// Default sensitivity applied when a condition omits it.
pub const DEFAULT_SENSITIVITY: f64 = 2.0;

/// Samples retained per metric window.
const WINDOW_CAPACITY: usize = 128;

/// Samples required before baseline comparisons resolve.
const MIN_SAMPLES: usize = 3;

// ============================================================================
// SECTION: Metric Windows
// ============================================================================

/// Rolling sample window for one metric.
#[derive(Debug, Default)]
struct MetricWindow {
    /// Retained samples, oldest first.
    samples: VecDeque<f64>,
    /// Running sum of the retained samples.
    sum: f64,
    /// Running sum of squares of the retained samples.
    sum_squares: f64,
}

impl MetricWindow {
    /// Records one sample, evicting the oldest past capacity.
    fn record(&mut self, value: f64) {
        self.samples.push_back(value);
        self.sum += value;
        self.sum_squares += value * value;
        while self.samples.len() > WINDOW_CAPACITY {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
                self.sum_squares -= evicted * evicted;
            }
        }
    }

    /// Returns the most recent sample.
    fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Returns the window mean.
    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        #[allow(
            clippy::cast_precision_loss,
            reason = "Window length is bounded far below f64 precision limits."
        )]
        let len = self.samples.len() as f64;
        self.sum / len
    }

    /// Returns the window standard deviation.
    fn std_dev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        #[allow(
            clippy::cast_precision_loss,
            reason = "Window length is bounded far below f64 precision limits."
        )]
        let len = self.samples.len() as f64;
        let mean = self.sum / len;
        let variance = (self.sum_squares / len) - mean * mean;
        variance.max(0.0).sqrt()
    }
}

// ============================================================================
// SECTION: Baseline Tracker
// ============================================================================

/// Per-metric rolling baseline tracker owned by the engine.
#[derive(Debug, Default)]
pub struct BaselineTracker {
    /// Metric windows keyed by metric name.
    metrics: BTreeMap<String, MetricWindow>,
}

impl BaselineTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: BTreeMap::new(),
        }
    }

    /// Records one metric sample.
    pub fn record(&mut self, metric: &str, value: f64) {
        self.metrics
            .entry(metric.to_string())
            .or_default()
            .record(value);
    }

    /// Evaluates a baseline comparison for the metric.
    ///
    /// Returns `None` while the metric has too little history to compare.
    #[must_use]
    pub fn evaluate(
        &self,
        metric: &str,
        comparison: BaselineComparison,
        sensitivity: Option<f64>,
    ) -> Option<bool> {
        let window = self.metrics.get(metric)?;
        if window.samples.len() < MIN_SAMPLES {
            return None;
        }
        let sensitivity = sensitivity.unwrap_or(DEFAULT_SENSITIVITY);
        let latest = window.latest()?;
        let mean = window.mean();

        let result = match comparison {
            BaselineComparison::Above => latest > mean * sensitivity,
            BaselineComparison::Below => latest < mean / sensitivity,
            BaselineComparison::Deviates => {
                (latest - mean).abs() > sensitivity * window.std_dev()
            }
        };
        Some(result)
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

    use super::BaselineTracker;
    use crate::core::BaselineComparison;

    #[test]
    fn sparse_history_yields_no_verdict() {
        let mut tracker = BaselineTracker::new();
        tracker.record("latency", 10.0);
        assert_eq!(
            tracker.evaluate("latency", BaselineComparison::Above, None),
            None
        );
        assert_eq!(
            tracker.evaluate("missing", BaselineComparison::Above, None),
            None
        );
    }

    #[test]
    fn spikes_are_detected_above_baseline() {
        let mut tracker = BaselineTracker::new();
        for _ in 0 .. 10 {
            tracker.record("latency", 10.0);
        }
        assert_eq!(
            tracker.evaluate("latency", BaselineComparison::Above, None),
            Some(false)
        );
        tracker.record("latency", 100.0);
        assert_eq!(
            tracker.evaluate("latency", BaselineComparison::Above, None),
            Some(true)
        );
    }

    #[test]
    fn deviation_uses_standard_deviations() {
        let mut tracker = BaselineTracker::new();
        for value in [9.0, 10.0, 11.0, 9.0, 10.0, 11.0] {
            tracker.record("orders", value);
        }
        assert_eq!(
            tracker.evaluate("orders", BaselineComparison::Deviates, Some(3.0)),
            Some(false)
        );
        tracker.record("orders", 50.0);
        assert_eq!(
            tracker.evaluate("orders", BaselineComparison::Deviates, Some(3.0)),
            Some(true)
        );
    }
}

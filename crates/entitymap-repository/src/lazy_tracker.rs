//! Lazy-load (N+1) detection.
//!
//! Every placeholder resolution that reaches the backend is recorded per
//! (model, property). Loading N instances and then touching the same
//! relation on each of them costs N extra round trips; once a relation
//! reaches the threshold a warning is logged so the caller can switch to
//! `GetOptions::preload` or a filtered `all()`.

use std::collections::HashMap;

/// Lazy-load statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyLoadStats {
    /// Total recorded resolutions.
    pub total_loads: usize,
    /// Distinct (model, property) pairs.
    pub relations_loaded: usize,
    /// Pairs at or over the threshold.
    pub potential_n1: usize,
}

/// Counts placeholder resolutions per relation.
#[derive(Debug)]
pub struct LazyLoadTracker {
    counts: HashMap<(String, String), usize>,
    threshold: usize,
    enabled: bool,
}

impl Default for LazyLoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyLoadTracker {
    /// Tracker with the default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
        }
    }

    /// Set the warning threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Current threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether resolutions are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn recording on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Record one resolution of `model.property`.
    pub fn record_load(&mut self, model: &str, property: &str) {
        if !self.enabled {
            return;
        }

        let count = self
            .counts
            .entry((model.to_string(), property.to_string()))
            .or_insert(0);
        *count += 1;

        if *count == self.threshold {
            tracing::warn!(
                target: "entitymap::n1",
                model = model,
                property = property,
                loads = self.threshold,
                "repeated lazy loads of the same relation; consider preloading"
            );
        }
    }

    /// Forget all counts.
    pub fn reset(&mut self) {
        self.counts.clear();
    }

    /// Resolutions recorded for `model.property`.
    pub fn count_for(&self, model: &str, property: &str) -> usize {
        self.counts
            .get(&(model.to_string(), property.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> LazyLoadStats {
        LazyLoadStats {
            total_loads: self.counts.values().sum(),
            relations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|&&c| c >= self.threshold)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let tracker = LazyLoadTracker::new();
        assert_eq!(tracker.threshold(), 3);
        assert!(tracker.is_enabled());
    }

    #[test]
    fn test_counts_per_relation() {
        let mut tracker = LazyLoadTracker::new().with_threshold(10);
        tracker.record_load("Order", "customer");
        tracker.record_load("Order", "customer");
        tracker.record_load("Customer", "orders");
        assert_eq!(tracker.count_for("Order", "customer"), 2);
        assert_eq!(tracker.count_for("Customer", "orders"), 1);
        assert_eq!(tracker.count_for("Customer", "groups"), 0);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let mut tracker = LazyLoadTracker::new();
        tracker.set_enabled(false);
        tracker.record_load("Order", "customer");
        assert_eq!(tracker.count_for("Order", "customer"), 0);
        assert_eq!(tracker.stats(), LazyLoadStats::default());
    }

    #[test]
    fn test_stats_and_reset() {
        let mut tracker = LazyLoadTracker::new().with_threshold(2);
        tracker.record_load("Order", "customer");
        tracker.record_load("Order", "customer");
        tracker.record_load("Customer", "orders");
        assert_eq!(
            tracker.stats(),
            LazyLoadStats {
                total_loads: 3,
                relations_loaded: 2,
                potential_n1: 1,
            }
        );
        tracker.reset();
        assert_eq!(tracker.stats(), LazyLoadStats::default());
    }
}

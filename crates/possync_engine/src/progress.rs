//! Progress accounting.
//!
//! Each table accumulates weight as its pages complete. Pull pages add a
//! flat `1` each because the number of pull pages is unknown up front; push
//! pages add a precomputed share of the table's `100 / table_count`.

use std::collections::HashMap;

/// Running progress of one sync run.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    per_table: HashMap<String, f64>,
}

impl ProgressTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds weight to a table and returns the new overall percentage.
    pub fn add(&mut self, table: &str, weight: f64) -> u8 {
        if weight.is_finite() && weight > 0.0 {
            *self.per_table.entry(table.to_string()).or_insert(0.0) += weight;
        }
        self.percent()
    }

    /// Overall percentage: the sum across tables, clamped to `[0, 100]` and rounded.
    pub fn percent(&self) -> u8 {
        let total: f64 = self.per_table.values().sum();
        total.clamp(0.0, 100.0).round() as u8
    }

    /// Accumulated weight of one table.
    pub fn table_weight(&self, table: &str) -> f64 {
        self.per_table.get(table).copied().unwrap_or(0.0)
    }

    /// Clears all tables.
    pub fn reset(&mut self) {
        self.per_table.clear();
    }
}

/// Weight of one push page for a table with `pages` estimated pages.
pub(crate) fn push_page_weight(table_count: usize, pages: u64) -> f64 {
    (100.0 / table_count.max(1) as f64) / pages.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sums_and_clamps() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.add("a", 1.0), 1);
        assert_eq!(tracker.add("b", 49.4), 50);
        assert_eq!(tracker.add("a", 80.0), 100);
        assert!((tracker.table_weight("a") - 81.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ignores_negative_and_nan() {
        let mut tracker = ProgressTracker::new();
        tracker.add("a", 10.0);
        assert_eq!(tracker.add("a", -5.0), 10);
        assert_eq!(tracker.add("a", f64::NAN), 10);
    }

    #[test]
    fn page_weights() {
        // 250 rows, 100 per page, 4 tables: 3 pages of 25/3 each.
        let w = push_page_weight(4, 3);
        assert!((w - 25.0 / 3.0).abs() < 1e-9);
        assert_eq!(push_page_weight(0, 0), 100.0);
    }

    proptest! {
        #[test]
        fn percent_is_monotonic_and_bounded(
            steps in proptest::collection::vec((0usize..4, -10.0f64..60.0), 0..60)
        ) {
            let tables = ["a", "b", "c", "d"];
            let mut tracker = ProgressTracker::new();
            let mut last = 0u8;
            for (t, w) in steps {
                let p = tracker.add(tables[t], w);
                prop_assert!(p >= last);
                prop_assert!(p <= 100);
                last = p;
            }
        }
    }
}

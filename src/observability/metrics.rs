//! Execution counters
//!
//! - Counters only, monotonic
//! - Shared by every request of an environment
//! - Relaxed atomics: values are exact once all requests are quiescent

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the streaming execution layer
#[derive(Debug, Default)]
pub struct ExecMetrics {
    rows_produced: AtomicU64,
    index_entries_visited: AtomicU64,
    duplicates_suppressed: AtomicU64,
    repositions: AtomicU64,
    phantoms: AtomicU64,
    ranges_advanced: AtomicU64,
    gc_pins_taken: AtomicU64,
    gc_pins_released: AtomicU64,
    page_fetches: AtomicU64,
}

impl ExecMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A row was handed to the caller of a statement cursor
    pub fn increment_rows_produced(&self) {
        self.rows_produced.fetch_add(1, Ordering::Relaxed);
    }

    /// A leaf entry was decoded
    pub fn increment_entries_visited(&self) {
        self.index_entries_visited.fetch_add(1, Ordering::Relaxed);
    }

    /// A leaf entry was skipped because its record was already returned
    pub fn increment_duplicates_suppressed(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale cursor forced a re-descent from the root
    pub fn increment_repositions(&self) {
        self.repositions.fetch_add(1, Ordering::Relaxed);
    }

    /// A fetched row did not match its index entry
    pub fn increment_phantoms(&self) {
        self.phantoms.fetch_add(1, Ordering::Relaxed);
    }

    /// A scan moved on to its next key range
    pub fn increment_ranges_advanced(&self) {
        self.ranges_advanced.fetch_add(1, Ordering::Relaxed);
    }

    /// A GC-inhibiting pin was taken
    pub fn increment_gc_pins_taken(&self) {
        self.gc_pins_taken.fetch_add(1, Ordering::Relaxed);
    }

    /// A GC-inhibiting pin was released
    pub fn increment_gc_pins_released(&self) {
        self.gc_pins_released.fetch_add(1, Ordering::Relaxed);
    }

    /// A page was fetched or handed off from the page cache
    pub fn increment_page_fetches(&self) {
        self.page_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_produced: self.rows_produced.load(Ordering::Relaxed),
            index_entries_visited: self.index_entries_visited.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            repositions: self.repositions.load(Ordering::Relaxed),
            phantoms: self.phantoms.load(Ordering::Relaxed),
            ranges_advanced: self.ranges_advanced.load(Ordering::Relaxed),
            gc_pins_taken: self.gc_pins_taken.load(Ordering::Relaxed),
            gc_pins_released: self.gc_pins_released.load(Ordering::Relaxed),
            page_fetches: self.page_fetches.load(Ordering::Relaxed),
        }
    }

    /// Get all counters as a JSON object
    pub fn to_json(&self) -> String {
        // Snapshot derives Serialize with plain integer fields
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub rows_produced: u64,
    pub index_entries_visited: u64,
    pub duplicates_suppressed: u64,
    pub repositions: u64,
    pub phantoms: u64,
    pub ranges_advanced: u64,
    pub gc_pins_taken: u64,
    pub gc_pins_released: u64,
    pub page_fetches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = ExecMetrics::new().snapshot();
        assert_eq!(snapshot.rows_produced, 0);
        assert_eq!(snapshot.repositions, 0);
        assert_eq!(snapshot.gc_pins_taken, 0);
    }

    #[test]
    fn test_increment_counters() {
        let metrics = ExecMetrics::new();
        metrics.increment_rows_produced();
        metrics.increment_rows_produced();
        metrics.increment_repositions();
        metrics.increment_gc_pins_taken();
        metrics.increment_gc_pins_released();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows_produced, 2);
        assert_eq!(snapshot.repositions, 1);
        assert_eq!(snapshot.gc_pins_taken, snapshot.gc_pins_released);
    }

    #[test]
    fn test_to_json() {
        let metrics = ExecMetrics::new();
        metrics.increment_phantoms();

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["phantoms"], 1);
        assert_eq!(parsed["rows_produced"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(ExecMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.increment_entries_visited();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().index_entries_visited, 800);
    }
}

//! Per-cache access counters.
//!
//! Every counter is an independent atomic. Reading several of them while other threads use the
//! cache can observe a combination that never existed at a single instant (for example
//! `hits + misses < requests`); only each counter on its own is guaranteed to be monotonic.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct CacheStatistics {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    evictions: AtomicU64,
    cleanings: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleaning(&self) {
        self.cleanings.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of lookups.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Lookups that found the key, whether or not the entry had expired.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Values written, by callers or by regeneration.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Removal attempts, successful or not.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Clear, clean and cleanup-strategy passes.
    pub fn cleanings(&self) -> u64 {
        self.cleanings.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            requests: self.requests(),
            hits: self.hits(),
            misses: self.misses(),
            updates: self.updates(),
            evictions: self.evictions(),
            cleanings: self.cleanings(),
        }
    }
}

/// Plain copy of the counters, suitable for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub updates: u64,
    pub evictions: u64,
    pub cleanings: u64,
}

impl StatisticsSnapshot {
    /// Fraction of hits among hits and misses, zero when nothing was requested.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_new_statistics_are_zero() {
        assert_eq!(CacheStatistics::new().snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn test_counters_are_independent() {
        let statistics = CacheStatistics::new();
        statistics.record_request();
        statistics.record_request();
        statistics.record_hit();
        statistics.record_miss();
        statistics.record_update();
        statistics.record_eviction();
        statistics.record_cleaning();

        let snapshot = statistics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.updates, 1);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.cleanings, 1);
    }

    #[test]
    fn test_hit_rate() {
        let snapshot = StatisticsSnapshot {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((snapshot.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(StatisticsSnapshot::default().hit_rate(), 0.0);
    }

    /// Snapshots serialize with the counter names monitoring collaborators expect.
    #[test]
    fn test_snapshot_serializes_to_json() {
        let snapshot = StatisticsSnapshot {
            requests: 3,
            hits: 2,
            misses: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(snapshot).unwrap();

        assert_eq!(json["requests"], 3);
        assert_eq!(json["hits"], 2);
        assert_eq!(json["misses"], 1);
        assert_eq!(json["cleanings"], 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let statistics = Arc::new(CacheStatistics::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let statistics = Arc::clone(&statistics);
                thread::spawn(move || {
                    for _ in 0..250 {
                        statistics.record_request();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(statistics.requests(), 1000);
    }
}

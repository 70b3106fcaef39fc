//! Suppression of re-delivered readings
//!
//! The same reading can reach the relay more than once: every reconnect of
//! the change feed starts with a full snapshot, and a write can be reported
//! both as a child `put` and inside a root `patch`. Only the first delivery
//! of a given `(id, reading)` pair is forwarded; a changed reading under a
//! known id is forwarded again.
//!
//! Tracking is bounded: deleted ids are forgotten, and beyond
//! [`DEFAULT_CAPACITY`] ids the least recently seen are evicted. An evicted
//! reading that is re-delivered is simply forwarded again.

use hrm_common::{IdentifiedReading, Reading};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

/// Ids tracked before the least recently seen are evicted
pub const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Debug)]
pub struct Deduplicator {
    last_seen: Cache<String, Reading>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(max_ids: u64) -> Self {
        Self {
            last_seen: Cache::builder()
                .max_capacity(max_ids)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    /// Record `item`, returning whether it should be forwarded
    pub fn admit(&self, item: &IdentifiedReading) -> bool {
        match self.last_seen.get(&item.id) {
            Some(previous) if previous == item.reading => false,
            _ => {
                self.last_seen.insert(item.id.clone(), item.reading.clone());
                true
            }
        }
    }

    /// Stop tracking a deleted id
    pub fn forget(&self, id: &str) {
        self.last_seen.invalidate(id);
    }

    /// Number of ids tracked
    pub fn len(&self) -> usize {
        self.last_seen.run_pending_tasks();
        self.last_seen.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, bpm: i64) -> IdentifiedReading {
        IdentifiedReading::new(id, Reading::new(Some(bpm), None))
    }

    #[test]
    fn test_first_delivery_admitted_repeat_suppressed() {
        let dedup = Deduplicator::new();
        assert!(dedup.admit(&item("a", 60)));
        assert!(!dedup.admit(&item("a", 60)));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_changed_reading_admitted() {
        let dedup = Deduplicator::new();
        assert!(dedup.admit(&item("a", 60)));
        assert!(dedup.admit(&item("a", 65)));
        assert!(!dedup.admit(&item("a", 65)));
    }

    #[test]
    fn test_distinct_ids_independent() {
        let dedup = Deduplicator::new();
        assert!(dedup.admit(&item("a", 60)));
        assert!(dedup.admit(&item("b", 60)));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_forgotten_id_admitted_again() {
        let dedup = Deduplicator::new();
        assert!(dedup.admit(&item("a", 60)));
        dedup.forget("a");
        assert!(dedup.is_empty());
        assert!(dedup.admit(&item("a", 60)));
    }

    #[test]
    fn test_tracking_is_bounded() {
        let dedup = Deduplicator::with_capacity(10);
        for n in 0..500 {
            assert!(dedup.admit(&item(&format!("id-{}", n), 60)));
        }

        assert!(dedup.len() <= 10, "tracked {} ids", dedup.len());
        assert!(!dedup.admit(&item("id-499", 60)));
    }
}

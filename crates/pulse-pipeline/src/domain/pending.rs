//! Buckets awaiting reconciliation.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use pulse_core::bucket::BucketKey;

/// Set of bucket keys whose last merge failed.
///
/// Shared by the ingestor, which adds keys, and the reconciler, which
/// drains them. The lock is never held across an await point. The queue is
/// lost on restart; the event store's unaggregated batches cover that.
#[derive(Debug, Default)]
pub struct PendingBuckets {
    keys: Mutex<BTreeSet<BucketKey>>,
}

impl PendingBuckets {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<BucketKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `keys`; already-queued keys are kept once.
    pub fn extend(&self, keys: impl IntoIterator<Item = BucketKey>) {
        self.lock().extend(keys);
    }

    /// Removes one key, e.g. after an on-demand reconciliation.
    pub fn remove(&self, key: &BucketKey) {
        self.lock().remove(key);
    }

    /// Takes every queued key, leaving the queue empty.
    #[must_use]
    pub fn drain(&self) -> Vec<BucketKey> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    /// Snapshot of the queued keys in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BucketKey> {
        self.lock().iter().cloned().collect()
    }

    /// Number of queued keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn key(event_type: &str) -> BucketKey {
        BucketKey::new(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(), event_type)
    }

    #[test]
    fn test_duplicate_keys_are_queued_once() {
        let pending = PendingBuckets::new();

        pending.extend([key("login"), key("view"), key("login")]);

        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_drain_empties_the_queue() {
        // Arrange
        let pending = PendingBuckets::new();
        pending.extend([key("view"), key("login")]);

        // Act
        let drained = pending.drain();

        // Assert
        assert_eq!(drained, vec![key("login"), key("view")]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_remove_drops_single_key() {
        let pending = PendingBuckets::new();
        pending.extend([key("view"), key("login")]);

        pending.remove(&key("view"));

        assert_eq!(pending.snapshot(), vec![key("login")]);
    }
}

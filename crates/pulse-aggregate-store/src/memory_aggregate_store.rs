//! In-memory implementation of the `AggregateStore` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use pulse_core::bucket::{BucketKey, BucketState, Contribution, MergeOutcome};
use pulse_core::error::DomainError;
use pulse_core::range::DateRange;
use pulse_core::store::{AggregateStore, BucketSource};

type Slot = Arc<Mutex<BucketState>>;

/// Aggregate store backed by a concurrent map of per-bucket async mutexes.
///
/// The map shard lock is only held long enough to clone a bucket's slot;
/// merges, loads and rebuilds then serialize on that bucket's mutex alone.
/// A slot removed from the map while a writer waits on it is detected after
/// locking, and the writer retries against the live slot.
#[derive(Debug, Default)]
pub struct MemoryAggregateStore {
    buckets: DashMap<BucketKey, Slot>,
}

impl MemoryAggregateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets currently held, including any being created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if the store holds no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn slot(&self, key: &BucketKey) -> Slot {
        Arc::clone(self.buckets.entry(key.clone()).or_default().value())
    }

    fn existing_slot(&self, key: &BucketKey) -> Option<Slot> {
        self.buckets.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn is_live(&self, key: &BucketKey, slot: &Slot) -> bool {
        self.buckets
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }

    fn remove_slot(&self, key: &BucketKey, slot: &Slot) {
        self.buckets
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn merge_bucket(
        &self,
        key: &BucketKey,
        contribution: &Contribution,
    ) -> Result<MergeOutcome, DomainError> {
        loop {
            let slot = self.slot(key);
            let mut bucket = slot.lock().await;
            if !self.is_live(key, &slot) {
                continue;
            }
            let outcome = bucket.apply(contribution);
            if outcome.is_err() && bucket.is_empty() {
                self.remove_slot(key, &slot);
            }
            return outcome;
        }
    }

    async fn load_bucket(&self, key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
        let Some(slot) = self.existing_slot(key) else {
            return Ok(None);
        };
        let bucket = slot.lock().await;
        Ok((!bucket.is_empty()).then(|| bucket.clone()))
    }

    async fn list_buckets(
        &self,
        range: &DateRange,
    ) -> Result<Vec<(BucketKey, BucketState)>, DomainError> {
        let mut slots: Vec<(BucketKey, Slot)> = self
            .buckets
            .iter()
            .filter(|entry| range.contains(entry.key().event_date))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        slots.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut buckets = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let bucket = slot.lock().await;
            if !bucket.is_empty() {
                buckets.push((key, bucket.clone()));
            }
        }
        Ok(buckets)
    }

    async fn rebuild_bucket(
        &self,
        key: &BucketKey,
        source: &dyn BucketSource,
    ) -> Result<Option<BucketState>, DomainError> {
        loop {
            let slot = self.slot(key);
            let mut bucket = slot.lock().await;
            if !self.is_live(key, &slot) {
                continue;
            }
            return match source.recompute(key).await {
                Ok(Some(rebuilt)) => {
                    debug!(
                        event_date = %key.event_date,
                        event_type = %key.event_type,
                        last_batch_id = rebuilt.last_batch_id,
                        "bucket rebuilt"
                    );
                    bucket.clone_from(&rebuilt);
                    Ok(Some(rebuilt))
                }
                Ok(None) => {
                    *bucket = BucketState::default();
                    self.remove_slot(key, &slot);
                    Ok(None)
                }
                Err(err) => {
                    if bucket.is_empty() {
                        self.remove_slot(key, &slot);
                    }
                    Err(err)
                }
            };
        }
    }

    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, DomainError> {
        let mut removed = 0_u64;
        self.buckets.retain(|key, _| {
            let keep = key.event_date >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::partial_state::PartialStateTriple;
    use tokio::sync::{Notify, oneshot};

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn contribution(batch_id: u64, users: &[u32], points: u64) -> Contribution {
        let mut states = PartialStateTriple::default();
        for &user_id in users {
            states.add_event(user_id, points);
        }
        Contribution { batch_id, states }
    }

    struct StaticSource(Option<BucketState>);

    #[async_trait]
    impl BucketSource for StaticSource {
        async fn recompute(&self, _key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
            Ok(self.0.clone())
        }
    }

    /// Signals when recomputation starts, then waits to be released.
    struct GatedSource {
        started: std::sync::Mutex<Option<oneshot::Sender<()>>>,
        release: Arc<Notify>,
        result: BucketState,
    }

    #[async_trait]
    impl BucketSource for GatedSource {
        async fn recompute(&self, _key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
            let started = self.started.lock().unwrap().take();
            if let Some(started) = started {
                let _ = started.send(());
            }
            self.release.notified().await;
            Ok(Some(self.result.clone()))
        }
    }

    #[tokio::test]
    async fn test_merge_creates_then_accumulates_bucket() {
        // Arrange
        let store = MemoryAggregateStore::new();
        let key = BucketKey::new(day(1), "purchase");

        // Act
        store
            .merge_bucket(&key, &contribution(1, &[1, 2], 10))
            .await
            .unwrap();
        store
            .merge_bucket(&key, &contribution(2, &[2, 3], 5))
            .await
            .unwrap();

        // Assert
        let totals = store.finalize_bucket(&key).await.unwrap().unwrap();
        assert_eq!(totals.unique_users, 3);
        assert_eq!(totals.total_spent, 30);
        assert_eq!(totals.total_actions, 4);
    }

    #[tokio::test]
    async fn test_replayed_batch_is_skipped() {
        let store = MemoryAggregateStore::new();
        let key = BucketKey::new(day(1), "login");
        let batch = contribution(7, &[1], 3);
        store.merge_bucket(&key, &batch).await.unwrap();

        let outcome = store.merge_bucket(&key, &batch).await.unwrap();

        assert_eq!(outcome, MergeOutcome::AlreadyApplied { last_batch_id: 7 });
        let totals = store.finalize_bucket(&key).await.unwrap().unwrap();
        assert_eq!(totals.total_actions, 1);
    }

    #[tokio::test]
    async fn test_absent_bucket_finalizes_to_none() {
        let store = MemoryAggregateStore::new();

        let totals = store
            .finalize_bucket(&BucketKey::new(day(1), "login"))
            .await
            .unwrap();

        assert!(totals.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_merges_lose_no_updates() {
        // Arrange
        let store = Arc::new(MemoryAggregateStore::new());
        let key = BucketKey::new(day(2), "view");

        // Act
        let handles: Vec<_> = (1..=64_u64)
            .map(|batch_id| {
                let store = Arc::clone(&store);
                let key = key.clone();
                tokio::spawn(async move {
                    let user = u32::try_from(batch_id).unwrap();
                    store
                        .merge_bucket(&key, &contribution(batch_id, &[user], 2))
                        .await
                })
            })
            .collect();
        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == MergeOutcome::Applied {
                applied += 1;
            }
        }

        // Assert: every applied merge is reflected exactly once.
        let bucket = store.load_bucket(&key).await.unwrap().unwrap();
        let totals = bucket.states.finalize();
        assert_eq!(totals.total_actions, applied);
        assert_eq!(totals.total_spent, applied * 2);
    }

    #[tokio::test]
    async fn test_sequential_batches_all_apply() {
        let store = MemoryAggregateStore::new();
        let key = BucketKey::new(day(2), "view");

        for batch_id in 1..=20_u64 {
            let outcome = store
                .merge_bucket(&key, &contribution(batch_id, &[1], 1))
                .await
                .unwrap();
            assert_eq!(outcome, MergeOutcome::Applied);
        }

        let totals = store.finalize_bucket(&key).await.unwrap().unwrap();
        assert_eq!(totals.total_actions, 20);
        assert_eq!(totals.unique_users, 1);
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_bounded_by_range() {
        // Arrange
        let store = MemoryAggregateStore::new();
        for (d, event_type) in [(3, "view"), (1, "login"), (2, "purchase"), (2, "login"), (5, "view")] {
            store
                .merge_bucket(&BucketKey::new(day(d), event_type), &contribution(1, &[1], 1))
                .await
                .unwrap();
        }

        // Act
        let listed = store
            .list_buckets(&DateRange::new(day(2), day(3)).unwrap())
            .await
            .unwrap();

        // Assert
        let keys: Vec<BucketKey> = listed.into_iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec![
                BucketKey::new(day(2), "login"),
                BucketKey::new(day(2), "purchase"),
                BucketKey::new(day(3), "view"),
            ]
        );
    }

    #[tokio::test]
    async fn test_rebuild_replaces_state() {
        let store = MemoryAggregateStore::new();
        let key = BucketKey::new(day(4), "login");
        store
            .merge_bucket(&key, &contribution(1, &[1, 2, 3], 100))
            .await
            .unwrap();
        let mut expected = BucketState::default();
        expected.apply(&contribution(2, &[1], 5)).unwrap();

        let rebuilt = store
            .rebuild_bucket(&key, &StaticSource(Some(expected.clone())))
            .await
            .unwrap();

        assert_eq!(rebuilt, Some(expected.clone()));
        assert_eq!(store.load_bucket(&key).await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn test_rebuild_with_no_source_events_removes_bucket() {
        let store = MemoryAggregateStore::new();
        let key = BucketKey::new(day(4), "login");
        store
            .merge_bucket(&key, &contribution(1, &[1], 1))
            .await
            .unwrap();

        let rebuilt = store
            .rebuild_bucket(&key, &StaticSource(None))
            .await
            .unwrap();

        assert!(rebuilt.is_none());
        assert!(store.load_bucket(&key).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_blocks_merges_into_same_bucket_only() {
        // Arrange
        let store = Arc::new(MemoryAggregateStore::new());
        let key = BucketKey::new(day(6), "purchase");
        let other = BucketKey::new(day(6), "view");
        let mut rebuilt = BucketState::default();
        rebuilt.apply(&contribution(3, &[1, 2], 10)).unwrap();
        let (started_tx, started_rx) = oneshot::channel();
        let release = Arc::new(Notify::new());
        let source = Arc::new(GatedSource {
            started: std::sync::Mutex::new(Some(started_tx)),
            release: Arc::clone(&release),
            result: rebuilt,
        });

        let rebuild = {
            let store = Arc::clone(&store);
            let key = key.clone();
            let source = Arc::clone(&source);
            tokio::spawn(async move { store.rebuild_bucket(&key, source.as_ref()).await })
        };
        started_rx.await.unwrap();

        // Act
        let mut blocked = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .merge_bucket(&key, &contribution(4, &[9], 1))
                    .await
            })
        };
        let unrelated = store
            .merge_bucket(&other, &contribution(4, &[9], 1))
            .await
            .unwrap();
        let still_waiting = tokio::time::timeout(Duration::from_millis(50), &mut blocked)
            .await
            .is_err();
        release.notify_one();
        rebuild.await.unwrap().unwrap();
        let merged = blocked.await.unwrap().unwrap();

        // Assert
        assert_eq!(unrelated, MergeOutcome::Applied);
        assert!(still_waiting);
        assert_eq!(merged, MergeOutcome::Applied);
        let totals = store.finalize_bucket(&key).await.unwrap().unwrap();
        assert_eq!(totals.total_actions, 3);
        assert_eq!(totals.total_spent, 21);
    }

    #[tokio::test]
    async fn test_purge_removes_buckets_before_cutoff() {
        let store = MemoryAggregateStore::new();
        for d in 1..=5 {
            store
                .merge_bucket(&BucketKey::new(day(d), "login"), &contribution(1, &[1], 1))
                .await
                .unwrap();
        }

        let removed = store.purge_before(day(3)).await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.len(), 3);
        assert!(
            store
                .load_bucket(&BucketKey::new(day(3), "login"))
                .await
                .unwrap()
                .is_some()
        );
    }
}

//! Incremental aggregation of committed batches into buckets.

use std::sync::Arc;

use pulse_core::bucket::MergeOutcome;
use pulse_core::error::DomainError;
use pulse_core::store::AggregateStore;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::grouping::GroupedBatch;
use crate::domain::pending::PendingBuckets;

/// Result of folding one batch into its buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AggregationReport {
    /// The batch that was folded.
    pub batch_id: u64,
    /// Buckets that absorbed the contribution.
    pub applied: usize,
    /// Buckets that already contained the batch.
    pub already_applied: usize,
}

/// Merges each batch's per-bucket contributions into the aggregate store.
///
/// Every contribution carries its batch identifier, so merging the same
/// batch twice is harmless. Buckets whose merge fails are queued in the
/// shared [`PendingBuckets`] for reconciliation.
#[derive(Clone)]
pub struct IncrementalAggregator {
    store: Arc<dyn AggregateStore>,
    pending: Arc<PendingBuckets>,
}

impl IncrementalAggregator {
    /// Creates an aggregator over `store`, queueing failures in `pending`.
    #[must_use]
    pub fn new(store: Arc<dyn AggregateStore>, pending: Arc<PendingBuckets>) -> Self {
        Self { store, pending }
    }

    /// The aggregate store merges are written to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    /// Buckets awaiting reconciliation.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingBuckets> {
        &self.pending
    }

    /// Merges every group of `batch` into its bucket.
    ///
    /// Each bucket is merged independently; a failure on one does not stop
    /// the others.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregationInconsistency` if any merge failed.
    /// The failed keys are queued for reconciliation before returning.
    pub async fn apply(
        &self,
        batch_id: u64,
        batch: GroupedBatch,
    ) -> Result<AggregationReport, DomainError> {
        let mut report = AggregationReport {
            batch_id,
            ..AggregationReport::default()
        };
        let mut failed = Vec::new();

        for (key, contribution) in batch.into_contributions(batch_id) {
            match self.store.merge_bucket(&key, &contribution).await {
                Ok(MergeOutcome::Applied) => report.applied += 1,
                Ok(MergeOutcome::AlreadyApplied { last_batch_id }) => {
                    debug!(
                        batch_id,
                        last_batch_id,
                        event_date = %key.event_date,
                        event_type = %key.event_type,
                        "bucket already contains batch"
                    );
                    report.already_applied += 1;
                }
                Err(err) => {
                    warn!(
                        batch_id,
                        event_date = %key.event_date,
                        event_type = %key.event_type,
                        error = %err,
                        "bucket merge failed"
                    );
                    failed.push(key);
                }
            }
        }

        if failed.is_empty() {
            return Ok(report);
        }
        let failed_buckets = failed.len();
        self.pending.extend(failed);
        Err(DomainError::AggregationInconsistency {
            batch_id,
            failed_buckets,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pulse_aggregate_store::MemoryAggregateStore;
    use pulse_core::bucket::BucketKey;
    use pulse_core::event::ActivityEvent;
    use pulse_test_support::{FailingAggregateStore, FlakyAggregateStore};

    use super::*;

    fn batch() -> Vec<ActivityEvent> {
        let event_time = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        [(1, "login", 0), (2, "login", 0), (1, "purchase", 25)]
            .into_iter()
            .map(|(user_id, event_type, points_spent)| ActivityEvent {
                user_id,
                event_type: event_type.to_owned(),
                points_spent,
                event_time,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_apply_merges_one_contribution_per_bucket() {
        // Arrange
        let store = Arc::new(MemoryAggregateStore::new());
        let aggregator = IncrementalAggregator::new(store.clone(), Arc::default());
        let events = batch();

        // Act
        let report = aggregator
            .apply(1, GroupedBatch::from_events(&events))
            .await
            .unwrap();

        // Assert
        assert_eq!(report.applied, 2);
        assert_eq!(report.already_applied, 0);
        let key = BucketKey::new(events[0].event_date(), "login");
        let totals = store.finalize_bucket(&key).await.unwrap().unwrap();
        assert_eq!(totals.unique_users, 2);
        assert_eq!(totals.total_actions, 2);
    }

    #[tokio::test]
    async fn test_reapplying_a_batch_is_a_no_op() {
        let store = Arc::new(MemoryAggregateStore::new());
        let aggregator = IncrementalAggregator::new(store.clone(), Arc::default());
        let events = batch();
        aggregator
            .apply(4, GroupedBatch::from_events(&events))
            .await
            .unwrap();

        let report = aggregator
            .apply(4, GroupedBatch::from_events(&events))
            .await
            .unwrap();

        assert_eq!(report.applied, 0);
        assert_eq!(report.already_applied, 2);
        let key = BucketKey::new(events[2].event_date(), "purchase");
        let totals = store.finalize_bucket(&key).await.unwrap().unwrap();
        assert_eq!(totals.total_spent, 25);
    }

    #[tokio::test]
    async fn test_partial_failure_queues_only_failed_buckets() {
        // Arrange
        let inner = Arc::new(MemoryAggregateStore::new());
        let flaky = Arc::new(FlakyAggregateStore::new(inner.clone(), 1));
        let pending = Arc::new(PendingBuckets::new());
        let aggregator = IncrementalAggregator::new(flaky, Arc::clone(&pending));
        let events = batch();

        // Act
        let result = aggregator.apply(2, GroupedBatch::from_events(&events)).await;

        // Assert: buckets are merged in key order, so "login" is the one lost.
        assert!(matches!(
            result,
            Err(DomainError::AggregationInconsistency {
                batch_id: 2,
                failed_buckets: 1
            })
        ));
        let login = BucketKey::new(events[0].event_date(), "login");
        assert_eq!(pending.snapshot(), vec![login.clone()]);
        assert!(inner.load_bucket(&login).await.unwrap().is_none());
        let purchase = BucketKey::new(events[2].event_date(), "purchase");
        assert!(inner.load_bucket(&purchase).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_store_queues_every_bucket() {
        let pending = Arc::new(PendingBuckets::new());
        let aggregator =
            IncrementalAggregator::new(Arc::new(FailingAggregateStore), Arc::clone(&pending));

        let result = aggregator
            .apply(1, GroupedBatch::from_events(&batch()))
            .await;

        assert!(matches!(
            result,
            Err(DomainError::AggregationInconsistency {
                failed_buckets: 2,
                ..
            })
        ));
        assert_eq!(pending.len(), 2);
    }
}

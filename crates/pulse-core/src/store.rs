//! Storage abstractions for raw events and aggregate buckets.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::bucket::{BucketKey, BucketState, Contribution, MergeOutcome};
use crate::error::DomainError;
use crate::event::{ActivityEvent, BatchReceipt, StoredEvent};
use crate::partial_state::BucketTotals;
use crate::range::DateRange;
use crate::scan::{ScanCursor, ScanPage, ScanPredicate};

/// Append-only log of validated activity events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Commits a batch atomically and assigns it the next batch identifier.
    ///
    /// Either every event becomes visible or none does.
    async fn append_batch(&self, events: Vec<ActivityEvent>) -> Result<BatchReceipt, DomainError>;

    /// Returns up to `limit` events matching `predicate`, in store order,
    /// strictly after `after`.
    async fn scan(
        &self,
        predicate: &ScanPredicate,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<ScanPage, DomainError>;

    /// Returns the still-retained events of one batch, in batch order.
    async fn load_batch(&self, batch_id: u64) -> Result<Vec<StoredEvent>, DomainError>;

    /// Deletes events with `event_time < cutoff`. Returns the number removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError>;

    /// Highest batch identifier committed so far, or `0` before the first
    /// commit. Every batch at or below it is fully visible to scans; an
    /// identifier drawn by an uncommitted append is never returned.
    async fn latest_batch_id(&self) -> Result<u64, DomainError>;

    /// Records that every bucket of `batch_id` now reflects the batch.
    ///
    /// The marker is durable: a batch committed but never marked is still
    /// listed by [`EventStore::unaggregated_batches`] after a restart.
    async fn mark_aggregated(&self, batch_id: u64) -> Result<(), DomainError>;

    /// Committed batches not yet marked aggregated, in increasing order.
    async fn unaggregated_batches(&self) -> Result<Vec<u64>, DomainError>;
}

/// Recomputes a bucket from an authoritative source.
#[async_trait]
pub trait BucketSource: Send + Sync {
    /// Returns the full state of `key`, or `None` if it has no contributions.
    async fn recompute(&self, key: &BucketKey) -> Result<Option<BucketState>, DomainError>;
}

/// Keyed store of mergeable partial aggregate states.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Merges `contribution` into the bucket at `key`, creating it if absent.
    ///
    /// Concurrent merges into the same key never lose updates.
    async fn merge_bucket(
        &self,
        key: &BucketKey,
        contribution: &Contribution,
    ) -> Result<MergeOutcome, DomainError>;

    /// Loads one bucket.
    async fn load_bucket(&self, key: &BucketKey) -> Result<Option<BucketState>, DomainError>;

    /// Returns buckets dated within `range`, ordered by key.
    async fn list_buckets(
        &self,
        range: &DateRange,
    ) -> Result<Vec<(BucketKey, BucketState)>, DomainError>;

    /// Replaces one bucket with the state computed by `source`, holding
    /// exclusive access to that bucket (and only that bucket) throughout.
    ///
    /// A `None` from the source removes the bucket.
    async fn rebuild_bucket(
        &self,
        key: &BucketKey,
        source: &dyn BucketSource,
    ) -> Result<Option<BucketState>, DomainError>;

    /// Deletes buckets with `event_date < cutoff`. Returns the number removed.
    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, DomainError>;

    /// Finalizes one bucket into `(unique_users, total_spent, total_actions)`.
    async fn finalize_bucket(&self, key: &BucketKey) -> Result<Option<BucketTotals>, DomainError> {
        Ok(self
            .load_bucket(key)
            .await?
            .map(|bucket| bucket.states.finalize()))
    }
}

//! Test stores — failing and flaky store implementations for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pulse_core::bucket::{BucketKey, BucketState, Contribution, MergeOutcome};
use pulse_core::error::DomainError;
use pulse_core::event::{ActivityEvent, BatchReceipt, StoredEvent};
use pulse_core::range::DateRange;
use pulse_core::scan::{ScanCursor, ScanPage, ScanPredicate};
use pulse_core::store::{AggregateStore, BucketSource, EventStore};

fn unavailable() -> DomainError {
    DomainError::StorageUnavailable("connection refused".into())
}

/// An event store that always returns `StorageUnavailable`. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append_batch(&self, _events: Vec<ActivityEvent>) -> Result<BatchReceipt, DomainError> {
        Err(unavailable())
    }

    async fn scan(
        &self,
        _predicate: &ScanPredicate,
        _after: Option<ScanCursor>,
        _limit: usize,
    ) -> Result<ScanPage, DomainError> {
        Err(unavailable())
    }

    async fn load_batch(&self, _batch_id: u64) -> Result<Vec<StoredEvent>, DomainError> {
        Err(unavailable())
    }

    async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        Err(unavailable())
    }

    async fn latest_batch_id(&self) -> Result<u64, DomainError> {
        Err(unavailable())
    }

    async fn mark_aggregated(&self, _batch_id: u64) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn unaggregated_batches(&self) -> Result<Vec<u64>, DomainError> {
        Err(unavailable())
    }
}

/// An aggregate store that always returns `StorageUnavailable`.
#[derive(Debug)]
pub struct FailingAggregateStore;

#[async_trait]
impl AggregateStore for FailingAggregateStore {
    async fn merge_bucket(
        &self,
        _key: &BucketKey,
        _contribution: &Contribution,
    ) -> Result<MergeOutcome, DomainError> {
        Err(unavailable())
    }

    async fn load_bucket(&self, _key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
        Err(unavailable())
    }

    async fn list_buckets(
        &self,
        _range: &DateRange,
    ) -> Result<Vec<(BucketKey, BucketState)>, DomainError> {
        Err(unavailable())
    }

    async fn rebuild_bucket(
        &self,
        _key: &BucketKey,
        _source: &dyn BucketSource,
    ) -> Result<Option<BucketState>, DomainError> {
        Err(unavailable())
    }

    async fn purge_before(&self, _cutoff: NaiveDate) -> Result<u64, DomainError> {
        Err(unavailable())
    }
}

/// Wraps a real aggregate store and fails the first `failures` merges.
///
/// Simulates an aggregator crash after the raw commit. Every other operation
/// is delegated untouched.
pub struct FlakyAggregateStore {
    inner: Arc<dyn AggregateStore>,
    remaining_failures: AtomicUsize,
}

impl FlakyAggregateStore {
    /// Creates a store that fails the next `failures` merges.
    #[must_use]
    pub fn new(inner: Arc<dyn AggregateStore>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl AggregateStore for FlakyAggregateStore {
    async fn merge_bucket(
        &self,
        key: &BucketKey,
        contribution: &Contribution,
    ) -> Result<MergeOutcome, DomainError> {
        let should_fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(unavailable());
        }
        self.inner.merge_bucket(key, contribution).await
    }

    async fn load_bucket(&self, key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
        self.inner.load_bucket(key).await
    }

    async fn list_buckets(
        &self,
        range: &DateRange,
    ) -> Result<Vec<(BucketKey, BucketState)>, DomainError> {
        self.inner.list_buckets(range).await
    }

    async fn rebuild_bucket(
        &self,
        key: &BucketKey,
        source: &dyn BucketSource,
    ) -> Result<Option<BucketState>, DomainError> {
        self.inner.rebuild_bucket(key, source).await
    }

    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, DomainError> {
        self.inner.purge_before(cutoff).await
    }
}

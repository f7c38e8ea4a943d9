//! Ingestion: validate, append, aggregate.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use pulse_core::clock::Clock;
use pulse_core::error::DomainError;
use pulse_core::event::NewEvent;
use pulse_core::store::EventStore;
use pulse_core::validation::{DEFAULT_FUTURE_SKEW, validate_batch};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::aggregator::IncrementalAggregator;
use crate::domain::grouping::GroupedBatch;

/// Acknowledgement of a durable batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    /// Identifier assigned to the batch.
    pub batch_id: u64,
    /// Number of events committed.
    pub event_count: usize,
    /// Buckets now reflecting the batch.
    pub buckets_merged: usize,
    /// Buckets queued for reconciliation because their merge failed.
    pub buckets_pending: usize,
}

/// Write-side entry point.
///
/// A batch is validated as a whole, appended atomically, then folded into
/// its buckets. Append and aggregation form one commit section guarded by
/// an async lock, so batch identifiers reach every bucket in increasing
/// order. Reads never take this lock.
pub struct Ingestor {
    events: Arc<dyn EventStore>,
    aggregator: IncrementalAggregator,
    clock: Arc<dyn Clock>,
    future_skew: TimeDelta,
    commit_lock: Mutex<()>,
}

impl Ingestor {
    /// Creates an ingestor with the default future-skew tolerance.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        aggregator: IncrementalAggregator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            aggregator,
            clock,
            future_skew: DEFAULT_FUTURE_SKEW,
            commit_lock: Mutex::new(()),
        }
    }

    /// Overrides how far in the future an `event_time` may lie.
    #[must_use]
    pub fn with_future_skew(mut self, future_skew: TimeDelta) -> Self {
        self.future_skew = future_skew;
        self
    }

    /// Ingests a single event as a batch of one.
    ///
    /// # Errors
    ///
    /// See [`Ingestor::append_batch`].
    pub async fn append_event(
        &self,
        user_id: u32,
        event_type: impl Into<String>,
        points_spent: i64,
        event_time: DateTime<Utc>,
    ) -> Result<IngestReceipt, DomainError> {
        self.append_batch(vec![NewEvent {
            user_id,
            event_type: event_type.into(),
            points_spent,
            event_time,
        }])
        .await
    }

    /// Validates, appends and aggregates a batch.
    ///
    /// A failed bucket merge after the append does not fail the call: the
    /// batch is durable, the inconsistency is logged and the bucket is
    /// queued for reconciliation. The batch is marked aggregated only once
    /// every bucket merged, so a restart before that point leaves it for
    /// [`Reconciler::recover_unaggregated`](crate::application::reconcile::Reconciler::recover_unaggregated).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if any event is invalid, and
    /// `DomainError::StorageUnavailable` if the append fails. Nothing is
    /// written in either case.
    #[instrument(
        name = "ingest_batch",
        skip_all,
        fields(correlation_id = %Uuid::new_v4(), event_count = events.len())
    )]
    pub async fn append_batch(&self, events: Vec<NewEvent>) -> Result<IngestReceipt, DomainError> {
        let validated = validate_batch(events, self.clock.now(), self.future_skew)?;
        let grouped = GroupedBatch::from_events(&validated);
        let bucket_count = grouped.len();

        let _commit = self.commit_lock.lock().await;
        let receipt = self.events.append_batch(validated).await?;

        let buckets_pending = match self.aggregator.apply(receipt.batch_id, grouped).await {
            Ok(_) => {
                if let Err(err) = self.events.mark_aggregated(receipt.batch_id).await {
                    warn!(
                        batch_id = receipt.batch_id,
                        error = %err,
                        "batch aggregated but not marked, recovery will replay it"
                    );
                }
                0
            }
            Err(err) => {
                let failed = match &err {
                    DomainError::AggregationInconsistency { failed_buckets, .. } => {
                        *failed_buckets
                    }
                    _ => bucket_count,
                };
                warn!(
                    batch_id = receipt.batch_id,
                    error = %err,
                    "batch committed with pending buckets"
                );
                failed
            }
        };

        info!(
            batch_id = receipt.batch_id,
            event_count = receipt.event_count,
            buckets = bucket_count,
            buckets_pending,
            "batch ingested"
        );
        Ok(IngestReceipt {
            batch_id: receipt.batch_id,
            event_count: receipt.event_count,
            buckets_merged: bucket_count - buckets_pending,
            buckets_pending,
        })
    }
}

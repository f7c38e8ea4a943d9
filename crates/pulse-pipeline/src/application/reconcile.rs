//! Reconciliation: rebuilding buckets from raw events.

use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::bucket::{BucketKey, BucketState, MergeOutcome};
use pulse_core::clock::Clock;
use pulse_core::error::DomainError;
use pulse_core::partial_state::BucketTotals;
use pulse_core::range::DateRange;
use pulse_core::scan::{DEFAULT_SCAN_PAGE_SIZE, EventScan, ScanPredicate};
use pulse_core::store::{BucketSource, EventStore};
use pulse_core::ttl::TtlPolicy;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::application::aggregator::IncrementalAggregator;
use crate::domain::grouping::{BucketFold, GroupedBatch};

/// Recomputes buckets from the event store.
///
/// Only batches committed before the recomputation starts are counted. A
/// batch committed while the scan is running is left to its own merge,
/// which still applies because its identifier is above the rebuilt
/// watermark.
pub struct EventStoreSource {
    events: Arc<dyn EventStore>,
    page_size: usize,
}

impl EventStoreSource {
    /// Creates a source reading from `events`.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self {
            events,
            page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }

    /// Overrides how many events each scan page holds.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[async_trait]
impl BucketSource for EventStoreSource {
    async fn recompute(&self, key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
        let ceiling = self.events.latest_batch_id().await?;
        let predicate = ScanPredicate::for_range(&DateRange::single_day(key.event_date))
            .with_event_type(key.event_type.as_str());

        let mut scan =
            EventScan::new(self.events.as_ref(), predicate).with_page_size(self.page_size);
        let mut fold = BucketFold::new();
        while let Some(page) = scan.next_page().await? {
            for event in page.iter().filter(|event| event.batch_id <= ceiling) {
                fold.add(event);
            }
        }
        Ok(fold.finish())
    }
}

/// Outcome of replaying one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReplayReport {
    /// The replayed batch.
    pub batch_id: u64,
    /// Retained events found for the batch.
    pub event_count: usize,
    /// Buckets that absorbed the batch on this replay.
    pub applied: usize,
    /// Buckets that already contained the batch.
    pub already_applied: usize,
    /// Buckets rebuilt from raw events because a later batch had moved
    /// their watermark past this unaggregated one.
    pub reconciled: usize,
    /// Buckets skipped because their raw history may be incomplete.
    pub skipped_expired: usize,
}

/// Outcome of replaying every batch not yet marked aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RecoveryReport {
    /// Batches found unaggregated.
    pub batches: usize,
    /// Batches whose buckets now all reflect them.
    pub recovered: usize,
    /// Batches left unaggregated for the next run.
    pub failed: usize,
}

/// Outcome of draining the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PendingReport {
    /// Buckets rebuilt successfully.
    pub reconciled: usize,
    /// Buckets dropped because they can no longer be rebuilt.
    pub expired: usize,
    /// Buckets that failed again and stay queued.
    pub failed: usize,
}

/// Repairs buckets after failed merges.
pub struct Reconciler {
    events: Arc<dyn EventStore>,
    aggregator: IncrementalAggregator,
    clock: Arc<dyn Clock>,
    ttl: TtlPolicy,
    scan_page_size: usize,
}

impl Reconciler {
    /// Creates a reconciler sharing the aggregator's store and pending queue.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        aggregator: IncrementalAggregator,
        clock: Arc<dyn Clock>,
        ttl: TtlPolicy,
    ) -> Self {
        Self {
            events,
            aggregator,
            clock,
            ttl,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }

    /// Overrides the page size of the rebuild scans.
    #[must_use]
    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size;
        self
    }

    fn ensure_reconcilable(&self, key: &BucketKey) -> Result<(), DomainError> {
        let oldest_reconcilable = self.ttl.oldest_reconcilable_date(self.clock.now());
        if key.event_date < oldest_reconcilable {
            return Err(DomainError::ReconciliationWindowExpired {
                event_date: key.event_date,
                oldest_reconcilable,
            });
        }
        Ok(())
    }

    /// Rebuilds one bucket from raw events, holding that bucket exclusively.
    ///
    /// Running it again yields the same state. Returns the finalized totals,
    /// or `None` if the bucket has no events and was removed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ReconciliationWindowExpired` if the bucket's
    /// date may already be partly swept from the event store, or a storage
    /// error. On a storage error the key stays queued.
    #[instrument(
        skip(self),
        fields(event_date = %key.event_date, event_type = %key.event_type)
    )]
    pub async fn reconcile_bucket(
        &self,
        key: &BucketKey,
    ) -> Result<Option<BucketTotals>, DomainError> {
        self.ensure_reconcilable(key)?;

        let pending = self.aggregator.pending();
        pending.remove(key);
        let source =
            EventStoreSource::new(Arc::clone(&self.events)).with_page_size(self.scan_page_size);
        let rebuilt = match self.aggregator.store().rebuild_bucket(key, &source).await {
            Ok(rebuilt) => rebuilt,
            Err(err) => {
                pending.extend([key.clone()]);
                return Err(err);
            }
        };

        info!(
            last_batch_id = rebuilt.as_ref().map(|bucket| bucket.last_batch_id),
            removed = rebuilt.is_none(),
            "bucket reconciled"
        );
        Ok(rebuilt.map(|bucket| bucket.states.finalize()))
    }

    /// Re-runs one batch's contribution through the normal merge path.
    ///
    /// Buckets that already hold the batch are skipped, so replaying twice
    /// never double-counts. If the batch was never marked aggregated, a
    /// bucket whose watermark is already past it may be missing it, and is
    /// rebuilt from raw events instead. The batch is marked aggregated once
    /// every bucket is settled. A batch with no retained events replays
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the batch cannot be loaded, or
    /// `DomainError::AggregationInconsistency` if a bucket fails again. The
    /// failed buckets are queued for reconciliation and the batch stays
    /// unaggregated.
    #[instrument(skip(self))]
    pub async fn replay_batch(&self, batch_id: u64) -> Result<ReplayReport, DomainError> {
        let events = self.events.load_batch(batch_id).await?;
        let unaggregated = self
            .events
            .unaggregated_batches()
            .await?
            .binary_search(&batch_id)
            .is_ok();
        let mut grouped = GroupedBatch::from_events(&events);
        let oldest = self.ttl.oldest_reconcilable_date(self.clock.now());
        let skipped_expired = grouped.retain_from(oldest);

        let mut report = ReplayReport {
            batch_id,
            event_count: events.len(),
            skipped_expired,
            ..ReplayReport::default()
        };
        let mut failed = Vec::new();
        for (key, contribution) in grouped.into_contributions(batch_id) {
            match self.aggregator.store().merge_bucket(&key, &contribution).await {
                Ok(MergeOutcome::Applied) => report.applied += 1,
                Ok(MergeOutcome::AlreadyApplied { last_batch_id })
                    if unaggregated && last_batch_id > batch_id =>
                {
                    match self.reconcile_bucket(&key).await {
                        Ok(_) => report.reconciled += 1,
                        Err(err) => {
                            warn!(batch_id, error = %err, "replay rebuild failed");
                            failed.push(key);
                        }
                    }
                }
                Ok(MergeOutcome::AlreadyApplied { .. }) => report.already_applied += 1,
                Err(err) => {
                    warn!(batch_id, error = %err, "replay merge failed");
                    failed.push(key);
                }
            }
        }

        if !failed.is_empty() {
            let failed_buckets = failed.len();
            self.aggregator.pending().extend(failed);
            return Err(DomainError::AggregationInconsistency {
                batch_id,
                failed_buckets,
            });
        }
        if unaggregated {
            self.events.mark_aggregated(batch_id).await?;
        }
        info!(
            event_count = report.event_count,
            applied = report.applied,
            already_applied = report.already_applied,
            reconciled = report.reconciled,
            skipped_expired,
            "batch replayed"
        );
        Ok(report)
    }

    /// Replays every committed batch not yet marked aggregated, oldest
    /// first.
    ///
    /// Covers batches whose merge was interrupted, including by a restart
    /// that lost the in-memory pending queue.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the unaggregated batches cannot be listed.
    /// A batch that fails to replay is counted and retried on the next run.
    #[instrument(skip(self))]
    pub async fn recover_unaggregated(&self) -> Result<RecoveryReport, DomainError> {
        let batches = self.events.unaggregated_batches().await?;
        let mut report = RecoveryReport {
            batches: batches.len(),
            ..RecoveryReport::default()
        };
        for batch_id in batches {
            match self.replay_batch(batch_id).await {
                Ok(_) => report.recovered += 1,
                Err(err) => {
                    warn!(batch_id, error = %err, "batch recovery failed");
                    report.failed += 1;
                }
            }
        }
        if report.batches > 0 {
            info!(
                batches = report.batches,
                recovered = report.recovered,
                failed = report.failed,
                "unaggregated batches recovered"
            );
        }
        Ok(report)
    }

    /// Drains the pending queue, rebuilding every queued bucket.
    ///
    /// Buckets past the reconciliation window are dropped; buckets that fail
    /// again stay queued for the next run.
    pub async fn reconcile_pending(&self) -> PendingReport {
        let mut report = PendingReport::default();
        for key in self.aggregator.pending().drain() {
            match self.reconcile_bucket(&key).await {
                Ok(_) => report.reconciled += 1,
                Err(err @ DomainError::ReconciliationWindowExpired { .. }) => {
                    warn!(error = %err, "dropping unreconcilable bucket");
                    report.expired += 1;
                }
                Err(err) => {
                    warn!(
                        event_date = %key.event_date,
                        event_type = %key.event_type,
                        error = %err,
                        "bucket reconciliation failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

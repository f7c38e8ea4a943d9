//! Raw and fast rollup queries.

use std::sync::Arc;

use pulse_core::clock::Clock;
use pulse_core::error::DomainError;
use pulse_core::range::DateRange;
use pulse_core::scan::{EventScan, ScanPredicate};
use pulse_core::store::{AggregateStore, EventStore};
use pulse_core::ttl::TtlPolicy;
use tracing::{debug, instrument};

use crate::domain::exact::ExactRollup;
use crate::domain::rows::{FastRollupRow, RawRollupRow};

/// Totals every `(date, event_type)` group in `range` exactly, scanning the
/// event store page by page.
///
/// # Errors
///
/// Propagates store errors.
pub async fn query_raw(
    store: &dyn EventStore,
    range: &DateRange,
) -> Result<Vec<RawRollupRow>, DomainError> {
    scan_exact(store, ScanPredicate::for_range(range)).await
}

async fn scan_exact(
    store: &dyn EventStore,
    predicate: ScanPredicate,
) -> Result<Vec<RawRollupRow>, DomainError> {
    let mut scan = EventScan::new(store, predicate);
    let mut rollup = ExactRollup::new();
    while let Some(page) = scan.next_page().await? {
        for event in &page {
            rollup.add(event);
        }
    }
    Ok(rollup.into_rows())
}

/// Finalizes every aggregate bucket dated within `range`.
///
/// # Errors
///
/// Propagates store errors, including `DomainError::CorruptState` for an
/// undecodable bucket.
pub async fn query_fast(
    store: &dyn AggregateStore,
    range: &DateRange,
) -> Result<Vec<FastRollupRow>, DomainError> {
    let buckets = store.list_buckets(range).await?;
    Ok(buckets
        .into_iter()
        .map(|(key, bucket)| FastRollupRow::new(key, bucket.states.finalize()))
        .collect())
}

/// Rollup queries clipped to what each store still retains.
///
/// Raw rollups never include events past the event TTL, even if the sweep
/// has not yet removed them; fast rollups never include buckets past the
/// aggregate TTL.
pub struct RollupService {
    events: Arc<dyn EventStore>,
    aggregates: Arc<dyn AggregateStore>,
    clock: Arc<dyn Clock>,
    ttl: TtlPolicy,
}

impl RollupService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        aggregates: Arc<dyn AggregateStore>,
        clock: Arc<dyn Clock>,
        ttl: TtlPolicy,
    ) -> Self {
        Self {
            events,
            aggregates,
            clock,
            ttl,
        }
    }

    /// Exact rollups over retained raw events.
    ///
    /// # Errors
    ///
    /// See [`query_raw`].
    #[instrument(name = "query_raw", skip_all, fields(start = %range.start, end = %range.end))]
    pub async fn raw(&self, range: &DateRange) -> Result<Vec<RawRollupRow>, DomainError> {
        let cutoff = self.ttl.event_cutoff(self.clock.now());
        let mut predicate = ScanPredicate::for_range(range);
        if predicate.until.is_some_and(|until| until <= cutoff) {
            debug!(%cutoff, "range lies past the event ttl");
            return Ok(Vec::new());
        }
        predicate.from = Some(predicate.from.map_or(cutoff, |from| from.max(cutoff)));
        let rows = scan_exact(self.events.as_ref(), predicate).await?;
        debug!(rows = rows.len(), "raw rollup served");
        Ok(rows)
    }

    /// Pre-aggregated rollups over retained buckets.
    ///
    /// # Errors
    ///
    /// See [`query_fast`].
    #[instrument(name = "query_fast", skip_all, fields(start = %range.start, end = %range.end))]
    pub async fn fast(&self, range: &DateRange) -> Result<Vec<FastRollupRow>, DomainError> {
        let cutoff = self.ttl.aggregate_cutoff(self.clock.now());
        if range.end < cutoff {
            debug!(%cutoff, "range lies past the aggregate ttl");
            return Ok(Vec::new());
        }
        let clipped = DateRange::new(range.start.max(cutoff), range.end)?;
        let rows = query_fast(self.aggregates.as_ref(), &clipped).await?;
        debug!(rows = rows.len(), "fast rollup served");
        Ok(rows)
    }
}

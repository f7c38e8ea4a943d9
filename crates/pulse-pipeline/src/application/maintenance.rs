//! Background maintenance: TTL sweeps and the reconciliation loop.
//!
//! The reconciliation loop drains the pending queue, then replays any
//! batch still unaggregated in the event store.
//!
//! Each job runs on its own interval until the shared cancellation token
//! fires. A failed cycle is logged and retried on the next tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::clock::Clock;
use pulse_core::error::DomainError;
use pulse_core::store::{AggregateStore, EventStore};
use pulse_core::ttl::TtlPolicy;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::reconcile::Reconciler;

/// How often each maintenance job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    /// Event TTL sweep period.
    pub event_sweep: Duration,
    /// Aggregate TTL sweep period.
    pub aggregate_sweep: Duration,
    /// Pending-reconciliation drain period.
    pub reconcile: Duration,
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self {
            event_sweep: Duration::from_secs(3_600),
            aggregate_sweep: Duration::from_secs(3_600),
            reconcile: Duration::from_secs(60),
        }
    }
}

/// Owns the stores the maintenance jobs act on.
pub struct Maintenance {
    events: Arc<dyn EventStore>,
    aggregates: Arc<dyn AggregateStore>,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    ttl: TtlPolicy,
}

impl Maintenance {
    /// Creates the maintenance jobs.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        aggregates: Arc<dyn AggregateStore>,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn Clock>,
        ttl: TtlPolicy,
    ) -> Self {
        Self {
            events,
            aggregates,
            reconciler,
            clock,
            ttl,
        }
    }

    /// Deletes raw events older than the event TTL.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Sweep` if the store rejects the purge.
    pub async fn sweep_events(&self) -> Result<u64, DomainError> {
        let cutoff = self.ttl.event_cutoff(self.clock.now());
        let removed = self
            .events
            .purge_before(cutoff)
            .await
            .map_err(|err| DomainError::Sweep(format!("event sweep: {err}")))?;
        debug!(%cutoff, removed, "event ttl sweep complete");
        Ok(removed)
    }

    /// Deletes aggregate buckets older than the aggregate TTL.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Sweep` if the store rejects the purge.
    pub async fn sweep_aggregates(&self) -> Result<u64, DomainError> {
        let cutoff = self.ttl.aggregate_cutoff(self.clock.now());
        let removed = self
            .aggregates
            .purge_before(cutoff)
            .await
            .map_err(|err| DomainError::Sweep(format!("aggregate sweep: {err}")))?;
        debug!(%cutoff, removed, "aggregate ttl sweep complete");
        Ok(removed)
    }

    /// Spawns the three periodic jobs. They stop when `cancel` fires.
    #[must_use]
    pub fn spawn(
        self: Arc<Self>,
        schedule: MaintenanceSchedule,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let events = Arc::clone(&self);
        let aggregates = Arc::clone(&self);
        let reconciler = Arc::clone(&self.reconciler);
        vec![
            tokio::spawn(run_periodic(
                "event_sweeper",
                schedule.event_sweep,
                cancel.clone(),
                move || {
                    let jobs = Arc::clone(&events);
                    async move {
                        if let Err(err) = jobs.sweep_events().await {
                            warn!(error = %err, "event sweep failed, retrying next cycle");
                        }
                    }
                },
            )),
            tokio::spawn(run_periodic(
                "aggregate_sweeper",
                schedule.aggregate_sweep,
                cancel.clone(),
                move || {
                    let jobs = Arc::clone(&aggregates);
                    async move {
                        if let Err(err) = jobs.sweep_aggregates().await {
                            warn!(error = %err, "aggregate sweep failed, retrying next cycle");
                        }
                    }
                },
            )),
            tokio::spawn(run_periodic(
                "reconciler",
                schedule.reconcile,
                cancel.clone(),
                move || {
                    let reconciler = Arc::clone(&reconciler);
                    async move {
                        let report = reconciler.reconcile_pending().await;
                        if report.reconciled + report.expired + report.failed > 0 {
                            info!(
                                reconciled = report.reconciled,
                                expired = report.expired,
                                failed = report.failed,
                                "pending buckets processed"
                            );
                        }
                        if let Err(err) = reconciler.recover_unaggregated().await {
                            warn!(error = %err, "batch recovery failed, retrying next cycle");
                        }
                    }
                },
            )),
        ]
    }
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(
        task = name,
        interval_secs = period.as_secs(),
        "maintenance task started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(task = name, "maintenance task shutting down");
                break;
            }
            _ = ticker.tick() => {
                job().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use pulse_aggregate_store::MemoryAggregateStore;
    use pulse_core::bucket::{BucketKey, Contribution};
    use pulse_core::event::ActivityEvent;
    use pulse_core::partial_state::PartialStateTriple;
    use pulse_event_store::MemoryEventStore;
    use pulse_test_support::{FailingEventStore, FixedClock, FlakyAggregateStore, new_event};

    use super::*;
    use crate::application::aggregator::IncrementalAggregator;
    use crate::application::ingest::Ingestor;
    use crate::domain::pending::PendingBuckets;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap()
    }

    fn activity(days_ago: i64) -> ActivityEvent {
        ActivityEvent {
            user_id: 1,
            event_type: "login".to_owned(),
            points_spent: 0,
            event_time: now() - TimeDelta::days(days_ago),
        }
    }

    fn maintenance(
        events: Arc<dyn EventStore>,
        aggregates: Arc<dyn AggregateStore>,
        pending: Arc<PendingBuckets>,
    ) -> Maintenance {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
        let aggregator = IncrementalAggregator::new(Arc::clone(&aggregates), pending);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&events),
            aggregator,
            Arc::clone(&clock),
            TtlPolicy::default(),
        ));
        Maintenance::new(events, aggregates, reconciler, clock, TtlPolicy::default())
    }

    #[tokio::test]
    async fn test_event_sweep_respects_thirty_day_ttl() {
        // Arrange
        let events = Arc::new(MemoryEventStore::new());
        events
            .append_batch(vec![activity(31), activity(29)])
            .await
            .unwrap();
        let jobs = maintenance(
            events.clone(),
            Arc::new(MemoryAggregateStore::new()),
            Arc::default(),
        );

        // Act
        let removed = jobs.sweep_events().await.unwrap();

        // Assert
        assert_eq!(removed, 1);
        assert_eq!(events.len().await, 1);
    }

    #[tokio::test]
    async fn test_aggregate_sweep_respects_one_eighty_day_ttl() {
        // Arrange
        let aggregates = Arc::new(MemoryAggregateStore::new());
        for days_ago in [181, 179] {
            let mut states = PartialStateTriple::default();
            states.add_event(1, 1);
            let key = BucketKey::new((now() - TimeDelta::days(days_ago)).date_naive(), "login");
            aggregates
                .merge_bucket(&key, &Contribution { batch_id: 1, states })
                .await
                .unwrap();
        }
        let jobs = maintenance(
            Arc::new(MemoryEventStore::new()),
            aggregates.clone(),
            Arc::default(),
        );

        // Act
        let removed = jobs.sweep_aggregates().await.unwrap();

        // Assert
        assert_eq!(removed, 1);
        assert_eq!(aggregates.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_failure_is_reported_as_sweep_error() {
        let jobs = maintenance(
            Arc::new(FailingEventStore),
            Arc::new(MemoryAggregateStore::new()),
            Arc::default(),
        );

        let result = jobs.sweep_events().await;

        assert!(matches!(result, Err(DomainError::Sweep(_))));
    }

    #[tokio::test]
    async fn test_spawned_tasks_run_and_stop_on_cancel() {
        // Arrange
        let events = Arc::new(MemoryEventStore::new());
        let aggregates = Arc::new(MemoryAggregateStore::new());
        let pending = Arc::new(PendingBuckets::new());
        let flaky: Arc<dyn AggregateStore> =
            Arc::new(FlakyAggregateStore::new(aggregates.clone(), 1));
        let ingestor = Ingestor::new(
            events.clone(),
            IncrementalAggregator::new(Arc::clone(&flaky), Arc::clone(&pending)),
            Arc::new(FixedClock(now())),
        );
        events.append_batch(vec![activity(40)]).await.unwrap();
        ingestor
            .append_batch(vec![new_event(2, "view", 0, now())])
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        let jobs = Arc::new(maintenance(events.clone(), flaky, Arc::clone(&pending)));
        let schedule = MaintenanceSchedule {
            event_sweep: Duration::from_millis(10),
            aggregate_sweep: Duration::from_millis(10),
            reconcile: Duration::from_millis(10),
        };
        let cancel = CancellationToken::new();

        // Act
        let handles = jobs.spawn(schedule, &cancel);
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }

        // Assert
        assert_eq!(events.len().await, 1);
        assert!(pending.is_empty());
        assert!(events.unaggregated_batches().await.unwrap().is_empty());
        let view = BucketKey::new(now().date_naive(), "view");
        assert!(aggregates.load_bucket(&view).await.unwrap().is_some());
    }
}

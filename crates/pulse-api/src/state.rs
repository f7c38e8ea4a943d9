//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use pulse_core::clock::Clock;
use pulse_core::store::{AggregateStore, EventStore};
use pulse_core::ttl::TtlPolicy;
use pulse_pipeline::application::aggregator::IncrementalAggregator;
use pulse_pipeline::application::ingest::Ingestor;
use pulse_pipeline::application::maintenance::Maintenance;
use pulse_pipeline::application::reconcile::Reconciler;
use pulse_pipeline::domain::pending::PendingBuckets;
use pulse_query::application::rollup::RollupService;
use pulse_retention::application::compute::RetentionService;
use pulse_retention::domain::cohort::CohortMaturity;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;

/// Tunables the services are built with.
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Event and aggregate lifetimes.
    pub ttl: TtlPolicy,
    /// Tolerated client clock lead on `event_time`.
    pub future_skew: TimeDelta,
    /// Time budget of one retention query.
    pub retention_timeout: Duration,
    /// Cohort maturity used when a request does not choose one.
    pub retention_maturity: CohortMaturity,
}

impl From<&Settings> for ServiceOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            ttl: settings.ttl,
            future_skew: settings.future_skew,
            retention_timeout: settings.retention_timeout,
            retention_maturity: settings.retention_maturity,
        }
    }
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Write path.
    pub ingestor: Arc<Ingestor>,
    /// Bucket repair.
    pub reconciler: Arc<Reconciler>,
    /// Raw and fast rollups.
    pub rollups: Arc<RollupService>,
    /// Retention cohorts.
    pub retention: Arc<RetentionService>,
    /// TTL sweeps, shared with the background jobs.
    pub maintenance: Arc<Maintenance>,
    /// Maturity applied when a retention request omits it.
    pub default_maturity: CohortMaturity,
    /// Cancelled on shutdown; long reads derive child tokens from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires every service over the given stores.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        aggregates: Arc<dyn AggregateStore>,
        clock: Arc<dyn Clock>,
        options: ServiceOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let aggregator =
            IncrementalAggregator::new(Arc::clone(&aggregates), Arc::new(PendingBuckets::new()));
        let ingestor = Ingestor::new(
            Arc::clone(&events),
            aggregator.clone(),
            Arc::clone(&clock),
        )
        .with_future_skew(options.future_skew);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&events),
            aggregator,
            Arc::clone(&clock),
            options.ttl,
        ));
        let rollups = RollupService::new(
            Arc::clone(&events),
            Arc::clone(&aggregates),
            Arc::clone(&clock),
            options.ttl,
        );
        let retention = RetentionService::new(Arc::clone(&events), Arc::clone(&clock))
            .with_timeout(options.retention_timeout);
        let maintenance = Maintenance::new(
            events,
            aggregates,
            Arc::clone(&reconciler),
            clock,
            options.ttl,
        );

        Self {
            ingestor: Arc::new(ingestor),
            reconciler,
            rollups: Arc::new(rollups),
            retention: Arc::new(retention),
            maintenance: Arc::new(maintenance),
            default_maturity: options.retention_maturity,
            shutdown,
        }
    }
}

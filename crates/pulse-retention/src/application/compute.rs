//! On-demand retention over the event store.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pulse_core::clock::Clock;
use pulse_core::error::DomainError;
use pulse_core::scan::{EventScan, ScanPredicate};
use pulse_core::store::EventStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::domain::cohort::{ActivityIndex, RetentionOptions, RetentionRow};

/// Default time budget for one retention query.
pub const DEFAULT_RETENTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Computes the cohort table as of `today` with one paged scan of `store`.
///
/// `cancel` is checked before every page; a cancelled query yields an error,
/// never partial rows.
///
/// # Errors
///
/// Returns `DomainError::InvalidQuery` for invalid options,
/// `DomainError::Cancelled` if `cancel` fires, and propagates store errors.
pub async fn compute_retention(
    store: &dyn EventStore,
    today: NaiveDate,
    options: RetentionOptions,
    cancel: &CancellationToken,
) -> Result<Vec<RetentionRow>, DomainError> {
    options.validate()?;

    let mut scan = EventScan::new(store, ScanPredicate::all());
    let mut index = ActivityIndex::new();
    let mut pages = 0_usize;
    loop {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let page = tokio::select! {
            () = cancel.cancelled() => return Err(DomainError::Cancelled),
            page = scan.next_page() => page?,
        };
        let Some(page) = page else {
            break;
        };
        index.record_all(&page);
        pages += 1;
    }

    let rows = index.cohorts(today, options);
    debug!(
        pages,
        users = index.user_count(),
        cohorts = rows.len(),
        "retention computed"
    );
    Ok(rows)
}

/// Runs [`compute_retention`] under a time budget.
///
/// # Errors
///
/// Returns `DomainError::Timeout` when `budget` elapses first, otherwise
/// whatever [`compute_retention`] returns.
pub async fn compute_retention_within(
    store: &dyn EventStore,
    today: NaiveDate,
    options: RetentionOptions,
    cancel: &CancellationToken,
    budget: Duration,
) -> Result<Vec<RetentionRow>, DomainError> {
    tokio::time::timeout(budget, compute_retention(store, today, options, cancel))
        .await
        .map_err(|_| DomainError::Timeout(budget))?
}

/// Retention queries bound to a store, a clock and a time budget.
pub struct RetentionService {
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl RetentionService {
    /// Creates a service with the default timeout.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events,
            clock,
            timeout: DEFAULT_RETENTION_TIMEOUT,
        }
    }

    /// Overrides the time budget of each query.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Computes retention as of the clock's current UTC date.
    ///
    /// # Errors
    ///
    /// See [`compute_retention_within`].
    #[instrument(
        name = "retention",
        skip_all,
        fields(window_days = options.window_days, maturity = %options.maturity)
    )]
    pub async fn retention(
        &self,
        options: RetentionOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetentionRow>, DomainError> {
        let today = self.clock.now().date_naive();
        let rows =
            compute_retention_within(self.events.as_ref(), today, options, cancel, self.timeout)
                .await?;
        info!(%today, cohorts = rows.len(), "retention query served");
        Ok(rows)
    }
}

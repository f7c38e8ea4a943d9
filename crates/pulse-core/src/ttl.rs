//! Time-to-live policy for raw and aggregated data.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};

/// Default lifetime of raw events.
pub const DEFAULT_EVENT_TTL: TimeDelta = TimeDelta::days(30);

/// Default lifetime of aggregate buckets.
pub const DEFAULT_AGGREGATE_TTL: TimeDelta = TimeDelta::days(180);

/// Retention thresholds for both stores.
///
/// The aggregate TTL is expected to outlive the event TTL: once raw events
/// expire, merged buckets are the only record of their contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// How long raw events are kept.
    pub event_ttl: TimeDelta,
    /// How long aggregate buckets are kept.
    pub aggregate_ttl: TimeDelta,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            event_ttl: DEFAULT_EVENT_TTL,
            aggregate_ttl: DEFAULT_AGGREGATE_TTL,
        }
    }
}

impl TtlPolicy {
    /// Events strictly before this instant are expired.
    #[must_use]
    pub fn event_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.event_ttl
    }

    /// Buckets dated strictly before this date are expired.
    #[must_use]
    pub fn aggregate_cutoff(&self, now: DateTime<Utc>) -> NaiveDate {
        (now - self.aggregate_ttl).date_naive()
    }

    /// The oldest date whose raw events are still complete.
    ///
    /// A day is only complete when its first second is not yet past the
    /// event cutoff.
    #[must_use]
    pub fn oldest_reconcilable_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let cutoff = self.event_cutoff(now);
        let cutoff_date = cutoff.date_naive();
        if cutoff.time() == NaiveTime::MIN {
            cutoff_date
        } else {
            cutoff_date.succ_opt().unwrap_or(cutoff_date)
        }
    }
}

//! Rollup rows returned to callers.

use chrono::NaiveDate;
use pulse_core::bucket::BucketKey;
use pulse_core::partial_state::BucketTotals;
use serde::Serialize;

/// One `(date, event_type)` group computed exactly from raw events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawRollupRow {
    /// UTC calendar date.
    pub date: NaiveDate,
    /// Event tag.
    pub event_type: String,
    /// Exact distinct users.
    pub unique_users: u64,
    /// Sum of `points_spent`.
    pub total_points: u64,
    /// Number of events.
    pub total_events: u64,
}

/// One finalized aggregate bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FastRollupRow {
    /// UTC calendar date.
    pub date: NaiveDate,
    /// Event tag.
    pub event_type: String,
    /// Estimated distinct users.
    pub unique_users: u64,
    /// Sum of `points_spent`.
    pub total_spent: u64,
    /// Number of events.
    pub total_actions: u64,
}

impl FastRollupRow {
    /// Builds a row from a bucket key and its finalized totals.
    #[must_use]
    pub fn new(key: BucketKey, totals: BucketTotals) -> Self {
        Self {
            date: key.event_date,
            event_type: key.event_type,
            unique_users: totals.unique_users,
            total_spent: totals.total_spent,
            total_actions: totals.total_actions,
        }
    }
}

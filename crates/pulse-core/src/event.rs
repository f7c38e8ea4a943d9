//! Activity event types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::ScanCursor;

/// An event as submitted by a caller, before validation.
///
/// `points_spent` is signed so that a negative value surfaces as a
/// validation failure instead of a decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// The acting user.
    pub user_id: u32,
    /// Open-ended event tag, e.g. `"purchase"`.
    pub event_type: String,
    /// Points spent by the action.
    pub points_spent: i64,
    /// When the action happened.
    pub event_time: DateTime<Utc>,
}

/// A validated event ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    /// The acting user.
    pub user_id: u32,
    /// Non-empty event tag.
    pub event_type: String,
    /// Points spent by the action.
    pub points_spent: u64,
    /// When the action happened, truncated to whole seconds.
    pub event_time: DateTime<Utc>,
}

impl ActivityEvent {
    /// UTC calendar date of the event.
    #[must_use]
    pub fn event_date(&self) -> NaiveDate {
        self.event_time.date_naive()
    }
}

/// An event as held by an event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    /// Batch the event was committed in.
    pub batch_id: u64,
    /// Position of the event inside its batch.
    pub sequence: u32,
    /// The acting user.
    pub user_id: u32,
    /// Event tag.
    pub event_type: String,
    /// Points spent by the action.
    pub points_spent: u64,
    /// When the action happened.
    pub event_time: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds the stored form of a validated event.
    #[must_use]
    pub fn from_activity(batch_id: u64, sequence: u32, event: ActivityEvent) -> Self {
        Self {
            batch_id,
            sequence,
            user_id: event.user_id,
            event_type: event.event_type,
            points_spent: event.points_spent,
            event_time: event.event_time,
        }
    }

    /// UTC calendar date of the event.
    #[must_use]
    pub fn event_date(&self) -> NaiveDate {
        self.event_time.date_naive()
    }

    /// Position of this event in the store's total order.
    #[must_use]
    pub fn cursor(&self) -> ScanCursor {
        ScanCursor {
            event_time: self.event_time,
            user_id: self.user_id,
            batch_id: self.batch_id,
            sequence: self.sequence,
        }
    }
}

/// Acknowledgement returned once a batch is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    /// Identifier assigned to the batch, increasing in commit order.
    pub batch_id: u64,
    /// Number of events committed.
    pub event_count: usize,
}

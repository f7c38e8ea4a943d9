//! Ingestion validation.
//!
//! A batch is accepted or rejected as a whole; the first offending event
//! determines the error.

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

use crate::error::ValidationError;
use crate::event::{ActivityEvent, NewEvent};

/// Default tolerance for client clocks running ahead of the server.
pub const DEFAULT_FUTURE_SKEW: TimeDelta = TimeDelta::seconds(300);

/// Validates every event of a batch against `now`.
///
/// # Errors
///
/// Returns the `ValidationError` of the first invalid event, or
/// `ValidationError::EmptyBatch` when `events` is empty.
pub fn validate_batch(
    events: Vec<NewEvent>,
    now: DateTime<Utc>,
    future_skew: TimeDelta,
) -> Result<Vec<ActivityEvent>, ValidationError> {
    if events.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    let latest_allowed = now + future_skew;

    events
        .into_iter()
        .enumerate()
        .map(|(index, event)| {
            let points_spent =
                u64::try_from(event.points_spent).map_err(|_| ValidationError::NegativePoints {
                    index,
                    points_spent: event.points_spent,
                })?;
            if event.event_type.trim().is_empty() {
                return Err(ValidationError::EmptyEventType { index });
            }
            if event.event_time > latest_allowed {
                return Err(ValidationError::FutureTimestamp {
                    index,
                    event_time: event.event_time,
                    tolerance_secs: future_skew.num_seconds(),
                });
            }
            Ok(ActivityEvent {
                user_id: event.user_id,
                event_type: event.event_type,
                points_spent,
                event_time: event.event_time.trunc_subsecs(0),
            })
        })
        .collect()
}

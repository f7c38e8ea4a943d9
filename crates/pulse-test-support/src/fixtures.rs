//! Event fixtures.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use pulse_core::event::NewEvent;

/// Builds a `NewEvent`.
#[must_use]
pub fn new_event(
    user_id: u32,
    event_type: &str,
    points_spent: i64,
    event_time: DateTime<Utc>,
) -> NewEvent {
    NewEvent {
        user_id,
        event_type: event_type.to_owned(),
        points_spent,
        event_time,
    }
}

/// `days_ago` days before `today`, at `hour:00` UTC.
///
/// # Panics
///
/// Panics if `hour` is not a valid hour of the day.
#[must_use]
pub fn at(today: NaiveDate, days_ago: i64, hour: u32) -> DateTime<Utc> {
    let day = today - TimeDelta::days(days_ago);
    day.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap())
        .and_utc()
}

/// Twenty events from six users spread over the ten days before `today`.
///
/// | cohort (days ago) | users   | returned within 7 days |
/// |-------------------|---------|------------------------|
/// | 10                | 1, 2, 3 | 1, 2, 3                |
/// | 9                 | 4       | none                   |
/// | 7                 | 5       | 5                      |
/// | 5                 | 6       | 6                      |
///
/// User 3 returns exactly seven days after first being seen, on the last
/// day of the window.
#[must_use]
pub fn retention_fixture(today: NaiveDate) -> Vec<NewEvent> {
    vec![
        // user 1
        new_event(1, "login", 0, at(today, 10, 9)),
        new_event(1, "purchase", 120, at(today, 10, 11)),
        new_event(1, "login", 0, at(today, 8, 9)),
        new_event(1, "view", 0, at(today, 3, 14)),
        // user 2
        new_event(2, "login", 0, at(today, 10, 10)),
        new_event(2, "view", 0, at(today, 6, 8)),
        new_event(2, "purchase", 45, at(today, 4, 19)),
        new_event(2, "login", 0, at(today, 1, 7)),
        // user 3
        new_event(3, "login", 0, at(today, 10, 12)),
        new_event(3, "purchase", 300, at(today, 10, 13)),
        new_event(3, "login", 0, at(today, 3, 20)),
        // user 4
        new_event(4, "login", 0, at(today, 9, 6)),
        new_event(4, "view", 0, at(today, 9, 7)),
        // user 5
        new_event(5, "login", 0, at(today, 7, 10)),
        new_event(5, "purchase", 60, at(today, 5, 10)),
        new_event(5, "view", 0, at(today, 2, 10)),
        new_event(5, "login", 0, at(today, 1, 10)),
        // user 6
        new_event(6, "login", 0, at(today, 5, 16)),
        new_event(6, "view", 0, at(today, 4, 16)),
        new_event(6, "purchase", 15, at(today, 1, 16)),
    ]
}

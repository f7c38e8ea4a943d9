//! Pulse Retention — cohort retention over raw events.
//!
//! A user's cohort is the UTC date of their first retained event. A cohort
//! member counts as returned when they have at least one event in the
//! `window_days` days following their cohort date. Results are computed on
//! demand from one ordered scan of the event store and are never cached.

pub mod application;
pub mod domain;

//! Retention queries against an event store.

pub mod compute;

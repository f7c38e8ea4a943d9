//! Shared test doubles and fixtures for the Pulse rollup engine.

mod clock;
mod fixtures;
mod stores;

pub use clock::{FixedClock, ManualClock};
pub use fixtures::{at, new_event, retention_fixture};
pub use stores::{FailingAggregateStore, FailingEventStore, FlakyAggregateStore};

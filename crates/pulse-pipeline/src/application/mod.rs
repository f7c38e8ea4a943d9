//! Services orchestrating the event store and the aggregate store.

pub mod aggregator;
pub mod ingest;
pub mod maintenance;
pub mod reconcile;

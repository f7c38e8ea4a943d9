//! Pulse Aggregate Store — keyed storage for mergeable partial states.
//!
//! Buckets are keyed by `(event_date, event_type)` and hold the three
//! partial states plus the highest batch identifier merged into them.
//! Both backends serialize merges per bucket, never globally.

pub mod memory_aggregate_store;
pub mod pg_aggregate_store;

pub use memory_aggregate_store::MemoryAggregateStore;
pub use pg_aggregate_store::PgAggregateStore;

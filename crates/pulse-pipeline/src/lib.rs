//! Pulse Pipeline — the write path.
//!
//! Validated batches are appended to the event store and, inside the same
//! commit section, folded into aggregate buckets by the incremental
//! aggregator. Buckets whose merge fails are queued for reconciliation,
//! which rebuilds them from raw events. Background tasks sweep expired
//! events and buckets and drain the reconciliation queue.

pub mod application;
pub mod domain;

//! Domain error types.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A batch was rejected before anything was written.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Durable storage could not be reached. Nothing was committed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Raw events were committed but some bucket merges failed.
    #[error(
        "aggregation inconsistency for batch {batch_id}: {failed_buckets} bucket merge(s) pending reconciliation"
    )]
    AggregationInconsistency {
        /// The batch whose contribution is incomplete.
        batch_id: u64,
        /// Number of buckets queued for reconciliation.
        failed_buckets: usize,
    },

    /// Raw events for the bucket may already be gone.
    #[error(
        "bucket dated {event_date} cannot be reconciled: raw history is only complete from {oldest_reconcilable}"
    )]
    ReconciliationWindowExpired {
        /// The bucket date that was requested.
        event_date: NaiveDate,
        /// The oldest date whose raw events are fully retained.
        oldest_reconcilable: NaiveDate,
    },

    /// A TTL sweep cycle failed. Retried on the next cycle.
    #[error("ttl sweep failed: {0}")]
    Sweep(String),

    /// A persisted partial state could not be decoded or merged.
    #[error("corrupt partial state: {0}")]
    CorruptState(String),

    /// A read request had invalid parameters.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation exceeded its time budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Reasons an ingestion batch is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The batch has no events.
    #[error("batch contains no events")]
    EmptyBatch,

    /// `points_spent` was negative.
    #[error("event {index}: points_spent must be non-negative, got {points_spent}")]
    NegativePoints {
        /// Position of the event in the batch.
        index: usize,
        /// The rejected value.
        points_spent: i64,
    },

    /// `event_type` was empty or whitespace.
    #[error("event {index}: event_type must not be empty")]
    EmptyEventType {
        /// Position of the event in the batch.
        index: usize,
    },

    /// `event_time` lies too far in the future.
    #[error("event {index}: event_time {event_time} is more than {tolerance_secs}s in the future")]
    FutureTimestamp {
        /// Position of the event in the batch.
        index: usize,
        /// The rejected timestamp.
        event_time: DateTime<Utc>,
        /// The configured skew tolerance.
        tolerance_secs: i64,
    },
}

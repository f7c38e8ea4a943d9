//! Aggregate bucket model.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::DomainError;
use crate::partial_state::{PartialState, PartialStateTriple};

/// Key of an aggregate bucket. Orders by date, then event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BucketKey {
    /// UTC calendar date of the contributing events.
    pub event_date: NaiveDate,
    /// Event tag of the contributing events.
    pub event_type: String,
}

impl BucketKey {
    /// Creates a bucket key.
    #[must_use]
    pub fn new(event_date: NaiveDate, event_type: impl Into<String>) -> Self {
        Self {
            event_date,
            event_type: event_type.into(),
        }
    }
}

/// Partial states produced by one ingestion batch for one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    /// The batch that produced these states.
    pub batch_id: u64,
    /// The partial states to merge.
    pub states: PartialStateTriple,
}

/// Outcome of merging a contribution into a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The contribution was folded into the bucket.
    Applied,
    /// The bucket already contains this batch; nothing changed.
    AlreadyApplied {
        /// The bucket's watermark at the time of the merge.
        last_batch_id: u64,
    },
}

/// Persisted state of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BucketState {
    /// Accumulated partial states.
    pub states: PartialStateTriple,
    /// Highest batch identifier folded into `states`.
    pub last_batch_id: u64,
}

impl BucketState {
    /// Returns `true` if no event has been folded into the bucket.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.events.finalize() == 0
    }

    /// Applies a contribution exactly once.
    ///
    /// Batch identifiers reach a bucket in increasing order, so any
    /// contribution at or below the watermark has already been merged.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::CorruptState` if the partial states cannot be
    /// merged; the bucket is unchanged in that case.
    pub fn apply(&mut self, contribution: &Contribution) -> Result<MergeOutcome, DomainError> {
        if contribution.batch_id <= self.last_batch_id {
            return Ok(MergeOutcome::AlreadyApplied {
                last_batch_id: self.last_batch_id,
            });
        }
        self.states.merge(&contribution.states)?;
        self.last_batch_id = contribution.batch_id;
        Ok(MergeOutcome::Applied)
    }
}

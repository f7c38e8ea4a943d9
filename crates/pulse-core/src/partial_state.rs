//! Mergeable partial aggregate states.
//!
//! Each aggregate function on the fast path is represented by a state that
//! can be built from one value, merged with another state of the same kind,
//! and finalized into a scalar. Merges are associative and commutative, so
//! contributions may be folded in any order or grouping. They are not
//! idempotent for sum and count: every contribution must be merged exactly
//! once (see `bucket::BucketState::apply`).

use pulse_sketch::HyperLogLog;
use serde::Serialize;

use crate::error::DomainError;

/// Contract shared by all partial aggregate states.
pub trait PartialState: Clone + Send + Sync + Sized {
    /// Value folded in per event.
    type Input;
    /// Finalized scalar.
    type Output;

    /// The identity state.
    fn empty() -> Self;

    /// Folds one input value into the state.
    fn update(&mut self, value: Self::Input);

    /// Folds another state into this one.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::CorruptState` if the states are incompatible.
    fn merge(&mut self, other: &Self) -> Result<(), DomainError>;

    /// Converts the state into its scalar result.
    fn finalize(&self) -> Self::Output;

    /// Serializes the state for persistence.
    fn encode(&self) -> Vec<u8>;

    /// Restores a state produced by [`PartialState::encode`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::CorruptState` on malformed input.
    fn decode(bytes: &[u8]) -> Result<Self, DomainError>;

    /// Builds a state holding a single value.
    fn init(value: Self::Input) -> Self {
        let mut state = Self::empty();
        state.update(value);
        state
    }
}

/// Approximate distinct users, backed by a HyperLogLog sketch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniqState(HyperLogLog);

impl UniqState {
    /// Borrows the underlying sketch.
    #[must_use]
    pub fn sketch(&self) -> &HyperLogLog {
        &self.0
    }
}

impl PartialState for UniqState {
    type Input = u32;
    type Output = u64;

    fn empty() -> Self {
        Self(HyperLogLog::new())
    }

    fn update(&mut self, user_id: u32) {
        self.0.insert(user_id);
    }

    fn merge(&mut self, other: &Self) -> Result<(), DomainError> {
        self.0
            .merge(&other.0)
            .map_err(|e| DomainError::CorruptState(e.to_string()))
    }

    fn finalize(&self) -> u64 {
        self.0.estimate()
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        HyperLogLog::from_bytes(bytes)
            .map(Self)
            .map_err(|e| DomainError::CorruptState(e.to_string()))
    }
}

/// Running sum. Saturates at `u64::MAX`, which keeps merges associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SumState(u64);

/// Running event count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountState(u64);

fn decode_u64(bytes: &[u8], what: &str) -> Result<u64, DomainError> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| {
        DomainError::CorruptState(format!("{what} state must be 8 bytes, got {}", bytes.len()))
    })?;
    Ok(u64::from_le_bytes(array))
}

impl PartialState for SumState {
    type Input = u64;
    type Output = u64;

    fn empty() -> Self {
        Self(0)
    }

    fn update(&mut self, value: u64) {
        self.0 = self.0.saturating_add(value);
    }

    fn merge(&mut self, other: &Self) -> Result<(), DomainError> {
        self.0 = self.0.saturating_add(other.0);
        Ok(())
    }

    fn finalize(&self) -> u64 {
        self.0
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        decode_u64(bytes, "sum").map(Self)
    }
}

impl PartialState for CountState {
    type Input = ();
    type Output = u64;

    fn empty() -> Self {
        Self(0)
    }

    fn update(&mut self, (): ()) {
        self.0 = self.0.saturating_add(1);
    }

    fn merge(&mut self, other: &Self) -> Result<(), DomainError> {
        self.0 = self.0.saturating_add(other.0);
        Ok(())
    }

    fn finalize(&self) -> u64 {
        self.0
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        decode_u64(bytes, "count").map(Self)
    }
}

/// The three partial states held by every aggregate bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialStateTriple {
    /// Unique users.
    pub unique_users: UniqState,
    /// Total points spent.
    pub points: SumState,
    /// Number of events.
    pub events: CountState,
}

impl Default for PartialStateTriple {
    fn default() -> Self {
        Self {
            unique_users: UniqState::empty(),
            points: SumState::empty(),
            events: CountState::empty(),
        }
    }
}

/// Finalized values of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketTotals {
    /// Approximate distinct users.
    pub unique_users: u64,
    /// Sum of `points_spent`.
    pub total_spent: u64,
    /// Number of events.
    pub total_actions: u64,
}

/// Serialized form of a [`PartialStateTriple`], one blob per function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTriple {
    /// Encoded unique-users sketch.
    pub unique_users: Vec<u8>,
    /// Encoded points sum.
    pub points: Vec<u8>,
    /// Encoded event count.
    pub events: Vec<u8>,
}

impl PartialStateTriple {
    /// Folds one event into all three states.
    pub fn add_event(&mut self, user_id: u32, points_spent: u64) {
        self.unique_users.update(user_id);
        self.points.update(points_spent);
        self.events.update(());
    }

    /// Merges another triple into this one.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::CorruptState` if the sketches are incompatible;
    /// `self` is unchanged in that case.
    pub fn merge(&mut self, other: &Self) -> Result<(), DomainError> {
        self.unique_users.merge(&other.unique_users)?;
        self.points.merge(&other.points)?;
        self.events.merge(&other.events)?;
        Ok(())
    }

    /// Finalizes all three states.
    #[must_use]
    pub fn finalize(&self) -> BucketTotals {
        BucketTotals {
            unique_users: self.unique_users.finalize(),
            total_spent: self.points.finalize(),
            total_actions: self.events.finalize(),
        }
    }

    /// Serializes all three states.
    #[must_use]
    pub fn encode(&self) -> EncodedTriple {
        EncodedTriple {
            unique_users: self.unique_users.encode(),
            points: self.points.encode(),
            events: self.events.encode(),
        }
    }

    /// Restores a triple from its encoded blobs.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::CorruptState` if any blob is malformed.
    pub fn decode(encoded: &EncodedTriple) -> Result<Self, DomainError> {
        Ok(Self {
            unique_users: UniqState::decode(&encoded.unique_users)?,
            points: SumState::decode(&encoded.points)?,
            events: CountState::decode(&encoded.events)?,
        })
    }
}

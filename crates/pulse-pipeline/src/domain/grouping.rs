//! Grouping of events into per-bucket partial states.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use pulse_core::bucket::{BucketKey, BucketState, Contribution};
use pulse_core::event::{ActivityEvent, StoredEvent};
use pulse_core::partial_state::PartialStateTriple;

/// The fields of an event that feed aggregation.
#[derive(Debug, Clone, Copy)]
pub struct EventFacts<'a> {
    /// UTC date of the event.
    pub event_date: NaiveDate,
    /// Event tag.
    pub event_type: &'a str,
    /// Acting user.
    pub user_id: u32,
    /// Points spent.
    pub points_spent: u64,
}

impl<'a> From<&'a ActivityEvent> for EventFacts<'a> {
    fn from(event: &'a ActivityEvent) -> Self {
        Self {
            event_date: event.event_date(),
            event_type: &event.event_type,
            user_id: event.user_id,
            points_spent: event.points_spent,
        }
    }
}

impl<'a> From<&'a StoredEvent> for EventFacts<'a> {
    fn from(event: &'a StoredEvent) -> Self {
        Self {
            event_date: event.event_date(),
            event_type: &event.event_type,
            user_id: event.user_id,
            points_spent: event.points_spent,
        }
    }
}

/// Partial states of one batch, one entry per bucket it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedBatch {
    groups: BTreeMap<BucketKey, PartialStateTriple>,
}

impl GroupedBatch {
    /// Groups events by `(event_date, event_type)`.
    #[must_use]
    pub fn from_events<'a, I, E>(events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EventFacts<'a>>,
    {
        let mut groups: BTreeMap<BucketKey, PartialStateTriple> = BTreeMap::new();
        for event in events {
            let facts: EventFacts<'a> = event.into();
            groups
                .entry(BucketKey::new(facts.event_date, facts.event_type))
                .or_default()
                .add_event(facts.user_id, facts.points_spent);
        }
        Self { groups }
    }

    /// Number of buckets touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` if the batch touches no bucket.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drops buckets dated before `oldest`. Returns how many were dropped.
    pub fn retain_from(&mut self, oldest: NaiveDate) -> usize {
        let before = self.groups.len();
        self.groups.retain(|key, _| key.event_date >= oldest);
        before - self.groups.len()
    }

    /// Bucket keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &BucketKey> {
        self.groups.keys()
    }

    /// Attaches `batch_id` to every group, yielding mergeable contributions
    /// in bucket order.
    pub fn into_contributions(
        self,
        batch_id: u64,
    ) -> impl Iterator<Item = (BucketKey, Contribution)> {
        self.groups
            .into_iter()
            .map(move |(key, states)| (key, Contribution { batch_id, states }))
    }
}

/// Incremental rebuild of one bucket from its raw events.
///
/// The watermark becomes the highest batch folded in.
#[derive(Debug, Default)]
pub struct BucketFold {
    state: Option<BucketState>,
}

impl BucketFold {
    /// Starts an empty fold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event in.
    pub fn add(&mut self, event: &StoredEvent) {
        let bucket = self.state.get_or_insert_with(BucketState::default);
        bucket.states.add_event(event.user_id, event.points_spent);
        bucket.last_batch_id = bucket.last_batch_id.max(event.batch_id);
    }

    /// The rebuilt bucket, or `None` if no event was folded in.
    #[must_use]
    pub fn finish(self) -> Option<BucketState> {
        self.state
    }
}

/// Folds every event of one bucket into a fresh state.
#[must_use]
pub fn fold_bucket<'a, I>(events: I) -> Option<BucketState>
where
    I: IntoIterator<Item = &'a StoredEvent>,
{
    let mut fold = BucketFold::new();
    for event in events {
        fold.add(event);
    }
    fold.finish()
}

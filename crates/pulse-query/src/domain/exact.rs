//! Exact per-bucket accumulation over raw events.

use std::collections::{BTreeMap, HashSet};

use pulse_core::bucket::BucketKey;
use pulse_core::event::StoredEvent;

use crate::domain::rows::RawRollupRow;

#[derive(Debug, Default)]
struct ExactTotals {
    users: HashSet<u32>,
    points: u64,
    events: u64,
}

/// Groups raw events by `(date, event_type)` and totals them exactly.
#[derive(Debug, Default)]
pub struct ExactRollup {
    groups: BTreeMap<BucketKey, ExactTotals>,
}

impl ExactRollup {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into its group.
    pub fn add(&mut self, event: &StoredEvent) {
        let totals = self
            .groups
            .entry(BucketKey::new(event.event_date(), event.event_type.as_str()))
            .or_default();
        totals.users.insert(event.user_id);
        totals.points = totals.points.saturating_add(event.points_spent);
        totals.events += 1;
    }

    /// Number of groups seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` if no event has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Finalizes the groups, ordered by date then event type.
    #[must_use]
    pub fn into_rows(self) -> Vec<RawRollupRow> {
        self.groups
            .into_iter()
            .map(|(key, totals)| RawRollupRow {
                date: key.event_date,
                event_type: key.event_type,
                unique_users: totals.users.len() as u64,
                total_points: totals.points,
                total_events: totals.events,
            })
            .collect()
    }
}

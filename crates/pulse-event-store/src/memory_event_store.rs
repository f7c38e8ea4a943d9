//! In-memory implementation of the `EventStore` trait.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use pulse_core::error::DomainError;
use pulse_core::event::{ActivityEvent, BatchReceipt, StoredEvent};
use pulse_core::scan::{ScanCursor, ScanPage, ScanPredicate};
use pulse_core::store::EventStore;

#[derive(Debug, Default)]
struct Inner {
    events: BTreeMap<ScanCursor, StoredEvent>,
    last_batch_id: u64,
    unaggregated: BTreeSet<u64>,
}

/// Event store backed by an ordered map behind a reader/writer lock.
///
/// Appends and sweeps hold the write lock only for the map mutation; scans
/// hold the read lock for one page at a time.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently retained.
    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Returns `true` if no events are retained.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.events.is_empty()
    }
}

fn floor_cursor(event_time: DateTime<Utc>) -> ScanCursor {
    ScanCursor {
        event_time,
        user_id: 0,
        batch_id: 0,
        sequence: 0,
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append_batch(&self, events: Vec<ActivityEvent>) -> Result<BatchReceipt, DomainError> {
        let event_count = events.len();
        let sequence_limit = u32::try_from(event_count).map_err(|_| {
            DomainError::StorageUnavailable(format!("batch of {event_count} events is too large"))
        })?;

        let mut inner = self.inner.write().await;
        let batch_id = inner.last_batch_id + 1;
        for (sequence, event) in (0..sequence_limit).zip(events) {
            let stored = StoredEvent::from_activity(batch_id, sequence, event);
            inner.events.insert(stored.cursor(), stored);
        }
        inner.last_batch_id = batch_id;
        inner.unaggregated.insert(batch_id);

        debug!(batch_id, event_count, "batch appended");
        Ok(BatchReceipt {
            batch_id,
            event_count,
        })
    }

    async fn scan(
        &self,
        predicate: &ScanPredicate,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<ScanPage, DomainError> {
        let lower = match (after, predicate.from) {
            (Some(cursor), Some(from)) if floor_cursor(from) > cursor => {
                Bound::Included(floor_cursor(from))
            }
            (Some(cursor), _) => Bound::Excluded(cursor),
            (None, Some(from)) => Bound::Included(floor_cursor(from)),
            (None, None) => Bound::Unbounded,
        };

        let inner = self.inner.read().await;
        let events: Vec<StoredEvent> = inner
            .events
            .range((lower, Bound::Unbounded))
            .map(|(_, event)| event)
            .take_while(|event| predicate.until.is_none_or(|until| event.event_time < until))
            .filter(|event| predicate.matches(event))
            .take(limit)
            .cloned()
            .collect();

        let next = if limit > 0 && events.len() == limit {
            events.last().map(StoredEvent::cursor)
        } else {
            None
        };
        Ok(ScanPage { events, next })
    }

    async fn load_batch(&self, batch_id: u64) -> Result<Vec<StoredEvent>, DomainError> {
        let inner = self.inner.read().await;
        let mut events: Vec<StoredEvent> = inner
            .events
            .values()
            .filter(|event| event.batch_id == batch_id)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.sequence);
        Ok(events)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut inner = self.inner.write().await;
        let retained = inner.events.split_off(&floor_cursor(cutoff));
        let expired = std::mem::replace(&mut inner.events, retained);
        Ok(expired.len() as u64)
    }

    async fn latest_batch_id(&self) -> Result<u64, DomainError> {
        Ok(self.inner.read().await.last_batch_id)
    }

    async fn mark_aggregated(&self, batch_id: u64) -> Result<(), DomainError> {
        self.inner.write().await.unaggregated.remove(&batch_id);
        Ok(())
    }

    async fn unaggregated_batches(&self) -> Result<Vec<u64>, DomainError> {
        Ok(self.inner.read().await.unaggregated.iter().copied().collect())
    }
}

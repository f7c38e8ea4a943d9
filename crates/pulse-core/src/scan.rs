//! Ordered, restartable scans over an event store.

use chrono::{DateTime, Utc};

use crate::error::DomainError;
use crate::event::StoredEvent;
use crate::range::DateRange;
use crate::store::EventStore;

/// Page size used when a caller does not choose one.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 1_024;

/// Filter applied to a scan. Every populated field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPredicate {
    /// Inclusive lower bound on `event_time`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `event_time`.
    pub until: Option<DateTime<Utc>>,
    /// Exact event type.
    pub event_type: Option<String>,
    /// Exact user.
    pub user_id: Option<u32>,
}

impl ScanPredicate {
    /// Matches every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches events on the days covered by `range`.
    #[must_use]
    pub fn for_range(range: &DateRange) -> Self {
        Self {
            from: Some(range.start_time()),
            until: range.end_time_exclusive(),
            ..Self::default()
        }
    }

    /// Restricts the predicate to one event type.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Restricts the predicate to one user.
    #[must_use]
    pub fn with_user(mut self, user_id: u32) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Returns `true` if `event` satisfies every populated field.
    #[must_use]
    pub fn matches(&self, event: &StoredEvent) -> bool {
        self.from.is_none_or(|from| event.event_time >= from)
            && self.until.is_none_or(|until| event.event_time < until)
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| event.event_type == t)
            && self.user_id.is_none_or(|u| event.user_id == u)
    }
}

/// Position in the store's total order `(event_time, user_id, batch_id, sequence)`.
///
/// A scan resumes strictly after its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanCursor {
    /// Event timestamp.
    pub event_time: DateTime<Utc>,
    /// Acting user.
    pub user_id: u32,
    /// Batch identifier.
    pub batch_id: u64,
    /// Position inside the batch.
    pub sequence: u32,
}

/// One page of scan results.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Matching events in store order.
    pub events: Vec<StoredEvent>,
    /// Cursor to resume from, or `None` once the scan is exhausted.
    pub next: Option<ScanCursor>,
}

/// Lazily pages through an event store.
///
/// The scan is finite (it stops at the last matching event present when each
/// page is read) and restartable via [`EventScan::restart`].
pub struct EventScan<'a> {
    store: &'a dyn EventStore,
    predicate: ScanPredicate,
    page_size: usize,
    cursor: Option<ScanCursor>,
    exhausted: bool,
}

impl<'a> EventScan<'a> {
    /// Creates a scan over `store` filtered by `predicate`.
    #[must_use]
    pub fn new(store: &'a dyn EventStore, predicate: ScanPredicate) -> Self {
        Self {
            store,
            predicate,
            page_size: DEFAULT_SCAN_PAGE_SIZE,
            cursor: None,
            exhausted: false,
        }
    }

    /// Overrides the page size (minimum 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetches the next page, or `None` once the scan is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates store errors. The cursor is not advanced on error, so the
    /// same page can be retried.
    pub async fn next_page(&mut self) -> Result<Option<Vec<StoredEvent>>, DomainError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .store
            .scan(&self.predicate, self.cursor, self.page_size)
            .await?;
        match page.next {
            Some(next) => self.cursor = Some(next),
            None => self.exhausted = true,
        }
        if page.events.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(Some(page.events))
    }

    /// Rewinds the scan to the beginning.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    /// Drains the remaining pages into one vector.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn collect_all(mut self) -> Result<Vec<StoredEvent>, DomainError> {
        let mut events = Vec::new();
        while let Some(page) = self.next_page().await? {
            events.extend(page);
        }
        Ok(events)
    }
}

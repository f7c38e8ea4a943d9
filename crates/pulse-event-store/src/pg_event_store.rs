//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;

use pulse_core::error::DomainError;
use pulse_core::event::{ActivityEvent, BatchReceipt, StoredEvent};
use pulse_core::scan::{ScanCursor, ScanPage, ScanPredicate};
use pulse_core::store::EventStore;

/// Rows per multi-row INSERT; six binds each stays under the protocol limit.
const INSERT_CHUNK_ROWS: usize = 8_000;

fn storage_error(err: sqlx::Error) -> DomainError {
    DomainError::StorageUnavailable(err.to_string())
}

fn out_of_range(what: &str, value: impl std::fmt::Display) -> DomainError {
    DomainError::CorruptState(format!("{what} {value} is outside the storable range"))
}

#[derive(Debug, FromRow)]
struct EventRow {
    event_time: DateTime<Utc>,
    user_id: i64,
    batch_id: i64,
    sequence: i32,
    event_type: String,
    points_spent: i64,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            batch_id: u64::try_from(row.batch_id)
                .map_err(|_| out_of_range("batch_id", row.batch_id))?,
            sequence: u32::try_from(row.sequence)
                .map_err(|_| out_of_range("sequence", row.sequence))?,
            user_id: u32::try_from(row.user_id)
                .map_err(|_| out_of_range("user_id", row.user_id))?,
            event_type: row.event_type,
            points_spent: u64::try_from(row.points_spent)
                .map_err(|_| out_of_range("points_spent", row.points_spent))?,
            event_time: row.event_time,
        })
    }
}

/// PostgreSQL-backed event store.
///
/// Events live in `activity_events`, whose primary key
/// `(event_time, user_id, batch_id, sequence)` is the scan order. Batch
/// identifiers come from `activity_batch_id_seq` inside the insert
/// transaction. The same transaction writes the batch's row in
/// `activity_batches`, which carries the aggregated marker and is the only
/// source of `latest_batch_id`: sequence values are not transactional, so
/// the sequence itself would expose ids of batches still being written.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append_batch(&self, events: Vec<ActivityEvent>) -> Result<BatchReceipt, DomainError> {
        let event_count = events.len();
        let mut rows = Vec::with_capacity(event_count);
        for (sequence, event) in events.into_iter().enumerate() {
            let sequence =
                i32::try_from(sequence).map_err(|_| out_of_range("sequence", sequence))?;
            let points = i64::try_from(event.points_spent)
                .map_err(|_| out_of_range("points_spent", event.points_spent))?;
            rows.push((event, sequence, points));
        }

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let batch_id: i64 = sqlx::query_scalar("SELECT nextval('activity_batch_id_seq')")
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_error)?;
        let count_param =
            i32::try_from(event_count).map_err(|_| out_of_range("event_count", event_count))?;
        sqlx::query("INSERT INTO activity_batches (batch_id, event_count) VALUES ($1, $2)")
            .bind(batch_id)
            .bind(count_param)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO activity_events \
                 (event_time, user_id, batch_id, sequence, event_type, points_spent) ",
            );
            builder.push_values(chunk, |mut row, (event, sequence, points)| {
                row.push_bind(event.event_time)
                    .push_bind(i64::from(event.user_id))
                    .push_bind(batch_id)
                    .push_bind(*sequence)
                    .push_bind(event.event_type.clone())
                    .push_bind(*points);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;

        let batch_id = u64::try_from(batch_id).map_err(|_| out_of_range("batch_id", batch_id))?;
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
        let limit_param = i64::try_from(limit).map_err(|_| out_of_range("limit", limit))?;
        let after_batch = match after {
            Some(cursor) => Some(
                i64::try_from(cursor.batch_id)
                    .map_err(|_| out_of_range("cursor batch_id", cursor.batch_id))?,
            ),
            None => None,
        };
        let rows: Vec<EventRow> = sqlx::query_as(
            r"
            SELECT event_time, user_id, batch_id, sequence, event_type, points_spent
            FROM activity_events
            WHERE ($1::timestamptz IS NULL OR event_time >= $1)
              AND ($2::timestamptz IS NULL OR event_time < $2)
              AND ($3::text IS NULL OR event_type = $3)
              AND ($4::bigint IS NULL OR user_id = $4)
              AND ($5::timestamptz IS NULL
                   OR (event_time, user_id, batch_id, sequence) > ($5, $6, $7, $8))
            ORDER BY event_time, user_id, batch_id, sequence
            LIMIT $9
            ",
        )
        .bind(predicate.from)
        .bind(predicate.until)
        .bind(predicate.event_type.as_deref())
        .bind(predicate.user_id.map(i64::from))
        .bind(after.map(|c| c.event_time))
        .bind(after.map(|c| i64::from(c.user_id)))
        .bind(after_batch)
        .bind(after.map(|c| i64::from(c.sequence)))
        .bind(limit_param)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let events = rows
            .into_iter()
            .map(StoredEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let next = if limit > 0 && events.len() == limit {
            events.last().map(StoredEvent::cursor)
        } else {
            None
        };
        Ok(ScanPage { events, next })
    }

    async fn load_batch(&self, batch_id: u64) -> Result<Vec<StoredEvent>, DomainError> {
        let batch_param =
            i64::try_from(batch_id).map_err(|_| out_of_range("batch_id", batch_id))?;
        let rows: Vec<EventRow> = sqlx::query_as(
            r"
            SELECT event_time, user_id, batch_id, sequence, event_type, points_spent
            FROM activity_events
            WHERE batch_id = $1
            ORDER BY sequence
            ",
        )
        .bind(batch_param)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let result = sqlx::query("DELETE FROM activity_events WHERE event_time < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        // The newest ledger row is kept so latest_batch_id never goes back.
        let batches = sqlx::query(
            r"
            DELETE FROM activity_batches b
            WHERE b.aggregated
              AND b.batch_id < (SELECT MAX(batch_id) FROM activity_batches)
              AND NOT EXISTS (SELECT 1 FROM activity_events e WHERE e.batch_id = b.batch_id)
            ",
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;

        debug!(
            events = result.rows_affected(),
            batches = batches.rows_affected(),
            "event store purged"
        );
        Ok(result.rows_affected())
    }

    async fn latest_batch_id(&self) -> Result<u64, DomainError> {
        let latest: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(batch_id), 0) FROM activity_batches")
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;
        u64::try_from(latest).map_err(|_| out_of_range("batch_id", latest))
    }

    async fn mark_aggregated(&self, batch_id: u64) -> Result<(), DomainError> {
        let batch_param =
            i64::try_from(batch_id).map_err(|_| out_of_range("batch_id", batch_id))?;
        sqlx::query("UPDATE activity_batches SET aggregated = TRUE WHERE batch_id = $1")
            .bind(batch_param)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn unaggregated_batches(&self) -> Result<Vec<u64>, DomainError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT batch_id FROM activity_batches WHERE NOT aggregated ORDER BY batch_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        ids.into_iter()
            .map(|id| u64::try_from(id).map_err(|_| out_of_range("batch_id", id)))
            .collect()
    }
}

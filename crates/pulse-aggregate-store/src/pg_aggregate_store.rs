//! `PostgreSQL` implementation of the `AggregateStore` trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;

use pulse_core::bucket::{BucketKey, BucketState, Contribution, MergeOutcome};
use pulse_core::error::DomainError;
use pulse_core::partial_state::{EncodedTriple, PartialStateTriple};
use pulse_core::range::DateRange;
use pulse_core::store::{AggregateStore, BucketSource};

const SELECT_COLUMNS: &str =
    "event_date, event_type, unique_users, points_sum, event_count, last_batch_id";

fn storage_error(err: sqlx::Error) -> DomainError {
    DomainError::StorageUnavailable(err.to_string())
}

#[derive(Debug, FromRow)]
struct BucketRow {
    event_date: NaiveDate,
    event_type: String,
    unique_users: Vec<u8>,
    points_sum: Vec<u8>,
    event_count: Vec<u8>,
    last_batch_id: i64,
}

impl TryFrom<BucketRow> for (BucketKey, BucketState) {
    type Error = DomainError;

    fn try_from(row: BucketRow) -> Result<Self, Self::Error> {
        let states = PartialStateTriple::decode(&EncodedTriple {
            unique_users: row.unique_users,
            points: row.points_sum,
            events: row.event_count,
        })?;
        let last_batch_id = u64::try_from(row.last_batch_id).map_err(|_| {
            DomainError::CorruptState(format!("negative last_batch_id {}", row.last_batch_id))
        })?;
        Ok((
            BucketKey::new(row.event_date, row.event_type),
            BucketState {
                states,
                last_batch_id,
            },
        ))
    }
}

fn watermark(state: &BucketState) -> Result<i64, DomainError> {
    i64::try_from(state.last_batch_id).map_err(|_| {
        DomainError::CorruptState(format!(
            "last_batch_id {} is outside the storable range",
            state.last_batch_id
        ))
    })
}

/// PostgreSQL-backed aggregate store.
///
/// Each bucket is one row of `aggregate_buckets`. Merges run in their own
/// transaction: the row is created empty if absent, then locked with
/// `SELECT ... FOR UPDATE`, so concurrent merges into the same bucket queue
/// on the row lock while other buckets proceed.
#[derive(Debug, Clone)]
pub struct PgAggregateStore {
    pool: PgPool,
}

impl PgAggregateStore {
    /// Creates a new `PgAggregateStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the row exists, then locks it for the rest of the transaction.
    async fn lock_bucket(
        tx: &mut Transaction<'_, Postgres>,
        key: &BucketKey,
    ) -> Result<BucketState, DomainError> {
        let empty = PartialStateTriple::default().encode();
        sqlx::query(
            "INSERT INTO aggregate_buckets \
             (event_date, event_type, unique_users, points_sum, event_count, last_batch_id) \
             VALUES ($1, $2, $3, $4, $5, 0) \
             ON CONFLICT (event_date, event_type) DO NOTHING",
        )
        .bind(key.event_date)
        .bind(&key.event_type)
        .bind(empty.unique_users)
        .bind(empty.points)
        .bind(empty.events)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;

        let row: BucketRow = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM aggregate_buckets \
             WHERE event_date = $1 AND event_type = $2 FOR UPDATE"
        ))
        .bind(key.event_date)
        .bind(&key.event_type)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage_error)?;

        let (_, state) = <(BucketKey, BucketState)>::try_from(row)?;
        Ok(state)
    }

    async fn write_bucket(
        tx: &mut Transaction<'_, Postgres>,
        key: &BucketKey,
        state: &BucketState,
    ) -> Result<(), DomainError> {
        let encoded = state.states.encode();
        sqlx::query(
            "UPDATE aggregate_buckets \
             SET unique_users = $3, points_sum = $4, event_count = $5, \
                 last_batch_id = $6, updated_at = NOW() \
             WHERE event_date = $1 AND event_type = $2",
        )
        .bind(key.event_date)
        .bind(&key.event_type)
        .bind(encoded.unique_users)
        .bind(encoded.points)
        .bind(encoded.events)
        .bind(watermark(state)?)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn delete_bucket(
        tx: &mut Transaction<'_, Postgres>,
        key: &BucketKey,
    ) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM aggregate_buckets WHERE event_date = $1 AND event_type = $2")
            .bind(key.event_date)
            .bind(&key.event_type)
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    async fn merge_bucket(
        &self,
        key: &BucketKey,
        contribution: &Contribution,
    ) -> Result<MergeOutcome, DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let mut state = Self::lock_bucket(&mut tx, key).await?;

        let outcome = state.apply(contribution)?;
        if outcome == MergeOutcome::Applied {
            Self::write_bucket(&mut tx, key, &state).await?;
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(outcome)
    }

    async fn load_bucket(&self, key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
        let row: Option<BucketRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM aggregate_buckets \
             WHERE event_date = $1 AND event_type = $2"
        ))
        .bind(key.event_date)
        .bind(&key.event_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(|row| <(BucketKey, BucketState)>::try_from(row).map(|(_, state)| state))
            .transpose()
    }

    async fn list_buckets(
        &self,
        range: &DateRange,
    ) -> Result<Vec<(BucketKey, BucketState)>, DomainError> {
        let rows: Vec<BucketRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM aggregate_buckets \
             WHERE event_date BETWEEN $1 AND $2 \
             ORDER BY event_date, event_type"
        ))
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn rebuild_bucket(
        &self,
        key: &BucketKey,
        source: &dyn BucketSource,
    ) -> Result<Option<BucketState>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        Self::lock_bucket(&mut tx, key).await?;

        let rebuilt = source.recompute(key).await?;
        match &rebuilt {
            Some(state) => Self::write_bucket(&mut tx, key, state).await?,
            None => Self::delete_bucket(&mut tx, key).await?,
        }
        tx.commit().await.map_err(storage_error)?;

        debug!(
            event_date = %key.event_date,
            event_type = %key.event_type,
            removed = rebuilt.is_none(),
            "bucket rebuilt"
        );
        Ok(rebuilt)
    }

    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM aggregate_buckets WHERE event_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected())
    }
}

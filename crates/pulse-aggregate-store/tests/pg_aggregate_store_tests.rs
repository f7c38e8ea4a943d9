//! Integration tests for `PgAggregateStore`.
//!
//! These need a PostgreSQL instance reachable through `DATABASE_URL`:
//! `cargo test -p pulse-aggregate-store -- --ignored`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use pulse_aggregate_store::PgAggregateStore;
use pulse_core::bucket::{BucketKey, BucketState, Contribution, MergeOutcome};
use pulse_core::error::DomainError;
use pulse_core::partial_state::PartialStateTriple;
use pulse_core::range::DateRange;
use pulse_core::store::{AggregateStore, BucketSource};
use sqlx::PgPool;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn contribution(batch_id: u64, users: &[u32], points: u64) -> Contribution {
    let mut states = PartialStateTriple::default();
    for &user_id in users {
        states.add_event(user_id, points);
    }
    Contribution { batch_id, states }
}

struct StaticSource(Option<BucketState>);

#[async_trait]
impl BucketSource for StaticSource {
    async fn recompute(&self, _key: &BucketKey) -> Result<Option<BucketState>, DomainError> {
        Ok(self.0.clone())
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_merge_round_trips_through_row(pool: PgPool) {
    // Arrange
    let store = PgAggregateStore::new(pool);
    let key = BucketKey::new(day(1), "purchase");

    // Act
    store
        .merge_bucket(&key, &contribution(1, &[1, 2], 10))
        .await
        .unwrap();
    store
        .merge_bucket(&key, &contribution(2, &[2, 3], 5))
        .await
        .unwrap();

    // Assert
    let bucket = store.load_bucket(&key).await.unwrap().unwrap();
    assert_eq!(bucket.last_batch_id, 2);
    let totals = bucket.states.finalize();
    assert_eq!(totals.unique_users, 3);
    assert_eq!(totals.total_spent, 30);
    assert_eq!(totals.total_actions, 4);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_replayed_batch_is_skipped(pool: PgPool) {
    let store = PgAggregateStore::new(pool);
    let key = BucketKey::new(day(1), "login");
    let batch = contribution(4, &[1], 3);
    store.merge_bucket(&key, &batch).await.unwrap();

    let outcome = store.merge_bucket(&key, &batch).await.unwrap();

    assert_eq!(outcome, MergeOutcome::AlreadyApplied { last_batch_id: 4 });
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_merges_lose_no_updates(pool: PgPool) {
    // Arrange
    let store = Arc::new(PgAggregateStore::new(pool));
    let key = BucketKey::new(day(2), "view");

    // Act
    let handles: Vec<_> = (1..=16_u64)
        .map(|batch_id| {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .merge_bucket(&key, &contribution(batch_id, &[7], 1))
                    .await
            })
        })
        .collect();
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == MergeOutcome::Applied {
            applied += 1;
        }
    }

    // Assert
    let totals = store.finalize_bucket(&key).await.unwrap().unwrap();
    assert_eq!(totals.total_actions, applied);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_list_rebuild_and_purge(pool: PgPool) {
    // Arrange
    let store = PgAggregateStore::new(pool);
    for d in 1..=4 {
        store
            .merge_bucket(&BucketKey::new(day(d), "login"), &contribution(1, &[1], 1))
            .await
            .unwrap();
    }
    let mut rebuilt = BucketState::default();
    rebuilt.apply(&contribution(9, &[5, 6], 2)).unwrap();

    // Act
    store
        .rebuild_bucket(&BucketKey::new(day(2), "login"), &StaticSource(Some(rebuilt.clone())))
        .await
        .unwrap();
    store
        .rebuild_bucket(&BucketKey::new(day(3), "login"), &StaticSource(None))
        .await
        .unwrap();
    let removed = store.purge_before(day(2)).await.unwrap();

    // Assert
    assert_eq!(removed, 1);
    let listed = store
        .list_buckets(&DateRange::new(day(1), day(4)).unwrap())
        .await
        .unwrap();
    let dates: Vec<NaiveDate> = listed.iter().map(|(key, _)| key.event_date).collect();
    assert_eq!(dates, vec![day(2), day(4)]);
    assert_eq!(listed[0].1, rebuilt);
}

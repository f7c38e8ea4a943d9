//! Fast rollups agree with raw rollups on retained data.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use pulse_aggregate_store::MemoryAggregateStore;
use pulse_core::event::NewEvent;
use pulse_core::range::DateRange;
use pulse_event_store::MemoryEventStore;
use pulse_pipeline::application::aggregator::IncrementalAggregator;
use pulse_pipeline::application::ingest::Ingestor;
use pulse_query::application::rollup::{query_fast, query_raw};
use pulse_test_support::{FixedClock, new_event};

const EVENT_TYPES: [&str; 3] = ["login", "purchase", "view"];

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 4, 23, 0, 0).unwrap()
}

fn range() -> DateRange {
    DateRange::new((now() - TimeDelta::days(6)).date_naive(), now().date_naive()).unwrap()
}

fn batch(batch: u32) -> Vec<NewEvent> {
    (0..500_u32)
        .map(|i| {
            let n = batch * 500 + i;
            new_event(
                n.wrapping_mul(7_919) % 4_000,
                EVENT_TYPES[(n % 3) as usize],
                i64::from(n % 11),
                now() - TimeDelta::days(i64::from(n % 5)) - TimeDelta::seconds(i64::from(n)),
            )
        })
        .collect()
}

async fn populated() -> (Arc<MemoryEventStore>, Arc<MemoryAggregateStore>) {
    let events = Arc::new(MemoryEventStore::new());
    let aggregates = Arc::new(MemoryAggregateStore::new());
    let ingestor = Ingestor::new(
        events.clone(),
        IncrementalAggregator::new(aggregates.clone(), Arc::default()),
        Arc::new(FixedClock(now())),
    );
    for n in 0..20 {
        ingestor.append_batch(batch(n)).await.unwrap();
    }
    (events, aggregates)
}

#[tokio::test]
async fn test_fast_matches_raw_for_every_bucket() {
    // Arrange
    let (events, aggregates) = populated().await;

    // Act
    let raw = query_raw(events.as_ref(), &range()).await.unwrap();
    let fast = query_fast(aggregates.as_ref(), &range()).await.unwrap();

    // Assert
    assert_eq!(raw.len(), 15);
    assert_eq!(raw.len(), fast.len());
    for (exact, approx) in raw.iter().zip(&fast) {
        assert_eq!(exact.date, approx.date);
        assert_eq!(exact.event_type, approx.event_type);
        assert_eq!(exact.total_points, approx.total_spent);
        assert_eq!(exact.total_events, approx.total_actions);
        let error = exact.unique_users.abs_diff(approx.unique_users);
        assert!(
            error * 50 <= exact.unique_users,
            "{} {}: exact {} estimated {}",
            exact.date,
            exact.event_type,
            exact.unique_users,
            approx.unique_users
        );
    }
}

#[tokio::test]
async fn test_totals_add_up_to_ingested_events() {
    let (events, aggregates) = populated().await;

    let raw = query_raw(events.as_ref(), &range()).await.unwrap();
    let fast = query_fast(aggregates.as_ref(), &range()).await.unwrap();

    assert_eq!(raw.iter().map(|row| row.total_events).sum::<u64>(), 10_000);
    assert_eq!(fast.iter().map(|row| row.total_actions).sum::<u64>(), 10_000);
}

#[tokio::test]
async fn test_narrow_range_only_returns_its_days() {
    let (events, aggregates) = populated().await;
    let day = DateRange::single_day((now() - TimeDelta::days(2)).date_naive());

    let raw = query_raw(events.as_ref(), &day).await.unwrap();
    let fast = query_fast(aggregates.as_ref(), &day).await.unwrap();

    assert_eq!(raw.len(), 3);
    assert_eq!(fast.len(), 3);
    assert!(fast.iter().all(|row| row.date == day.start));
}

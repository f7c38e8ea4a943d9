//! Integration tests for reconciliation.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use chrono::TimeDelta;
use pulse_aggregate_store::MemoryAggregateStore;
use pulse_core::store::AggregateStore;
use pulse_event_store::MemoryEventStore;
use pulse_test_support::FlakyAggregateStore;

fn day(days_ago: i64) -> String {
    (common::now() - TimeDelta::days(days_ago))
        .date_naive()
        .to_string()
}

/// App whose first `failures` bucket merges fail.
fn flaky_app(failures: usize) -> Router {
    let inner: Arc<dyn AggregateStore> = Arc::new(MemoryAggregateStore::new());
    common::build_test_app_with(
        Arc::new(MemoryEventStore::new()),
        Arc::new(FlakyAggregateStore::new(inner, failures)),
    )
}

async fn fast_rows(app: Router) -> Vec<serde_json::Value> {
    let uri = format!("/api/v1/rollups/fast?start={}&end={}", day(3), day(0));
    let (status, json) = common::get_json(app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    json["rows"].as_array().unwrap().clone()
}

#[tokio::test]
async fn test_failed_merge_is_repaired_by_pending_reconcile() {
    // Arrange
    let app = flaky_app(1);
    let (status, receipt) = common::post_json(
        app.clone(),
        "/api/v1/events",
        &common::event_json(4, "purchase", 12, 1),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["buckets_pending"], 1);
    assert!(fast_rows(app.clone()).await.is_empty());

    // Act
    let (status, report) = common::post_empty(app.clone(), "/api/v1/reconcile/pending").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["reconciled"], 1);
    assert_eq!(report["failed"], 0);
    let rows = fast_rows(app).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["total_spent"], 12);
}

#[tokio::test]
async fn test_bucket_reconcile_returns_rebuilt_totals() {
    // Arrange
    let app = flaky_app(1);
    let body = serde_json::json!({
        "events": [
            common::event_json(1, "login", 0, 2),
            common::event_json(2, "login", 0, 2),
        ]
    });
    common::post_json(app.clone(), "/api/v1/events/batch", &body).await;

    // Act
    let (status, json) = common::post_json(
        app.clone(),
        "/api/v1/reconcile/bucket",
        &serde_json::json!({ "event_date": day(2), "event_type": "login" }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"]["event_type"], "login");
    assert_eq!(json["totals"]["total_actions"], 2);
    assert_eq!(json["totals"]["unique_users"], 2);
}

#[tokio::test]
async fn test_replaying_batch_twice_does_not_double_count() {
    // Arrange
    let app = flaky_app(1);
    let (_, receipt) = common::post_json(
        app.clone(),
        "/api/v1/events",
        &common::event_json(9, "view", 3, 0),
    )
    .await;
    let batch_id = receipt["batch_id"].clone();

    // Act
    let (first_status, first) = common::post_json(
        app.clone(),
        "/api/v1/reconcile/batch",
        &serde_json::json!({ "batch_id": batch_id }),
    )
    .await;
    let (_, second) = common::post_json(
        app.clone(),
        "/api/v1/reconcile/batch",
        &serde_json::json!({ "batch_id": batch_id }),
    )
    .await;

    // Assert
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(first["applied"], 1);
    assert_eq!(second["applied"], 0);
    assert_eq!(second["already_applied"], 1);
    let rows = fast_rows(app).await;
    assert_eq!(rows[0]["total_actions"], 1);
    assert_eq!(rows[0]["total_spent"], 3);
}

#[tokio::test]
async fn test_bucket_past_event_ttl_returns_409() {
    let app = common::build_test_app();

    let (status, json) = common::post_json(
        app,
        "/api/v1/reconcile/bucket",
        &serde_json::json!({ "event_date": day(45), "event_type": "login" }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "reconciliation_window_expired");
}

#[tokio::test]
async fn test_recover_restores_batch_hidden_behind_later_merge() {
    // Arrange
    let app = flaky_app(1);
    for points in [8, 2] {
        common::post_json(
            app.clone(),
            "/api/v1/events",
            &common::event_json(points, "purchase", i64::from(points), 0),
        )
        .await;
    }
    assert_eq!(fast_rows(app.clone()).await[0]["total_spent"], 2);

    // Act
    let (status, report) = common::post_empty(app.clone(), "/api/v1/reconcile/recover").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["batches"], 1);
    assert_eq!(report["recovered"], 1);
    let rows = fast_rows(app).await;
    assert_eq!(rows[0]["total_spent"], 10);
    assert_eq!(rows[0]["total_actions"], 2);
}

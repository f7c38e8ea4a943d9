//! Integration tests for rollup queries.

mod common;

use axum::http::StatusCode;
use chrono::TimeDelta;

fn day(days_ago: i64) -> String {
    (common::now() - TimeDelta::days(days_ago))
        .date_naive()
        .to_string()
}

async fn seeded_app() -> axum::Router {
    let app = common::build_test_app();
    let body = serde_json::json!({
        "events": [
            common::event_json(1, "purchase", 10, 1),
            common::event_json(2, "purchase", 15, 1),
            common::event_json(1, "purchase", 5, 1),
            common::event_json(3, "view", 0, 1),
            common::event_json(3, "view", 0, 0),
        ]
    });
    let (status, _) = common::post_json(app.clone(), "/api/v1/events/batch", &body).await;
    assert_eq!(status, StatusCode::OK);
    app
}

#[tokio::test]
async fn test_raw_rollup_is_exact() {
    // Arrange
    let app = seeded_app().await;
    let uri = format!("/api/v1/rollups/raw?start={}&end={}", day(1), day(0));

    // Act
    let (status, json) = common::get_json(app, &uri).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["date"], day(1));
    assert_eq!(rows[0]["event_type"], "purchase");
    assert_eq!(rows[0]["unique_users"], 2);
    assert_eq!(rows[0]["total_points"], 30);
    assert_eq!(rows[0]["total_events"], 3);
}

#[tokio::test]
async fn test_fast_rollup_matches_raw_totals() {
    // Arrange
    let app = seeded_app().await;
    let query = format!("start={}&end={}", day(1), day(0));

    // Act
    let (_, raw) = common::get_json(app.clone(), &format!("/api/v1/rollups/raw?{query}")).await;
    let (status, fast) = common::get_json(app, &format!("/api/v1/rollups/fast?{query}")).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let raw = raw["rows"].as_array().unwrap();
    let fast = fast["rows"].as_array().unwrap();
    assert_eq!(raw.len(), fast.len());
    for (exact, approx) in raw.iter().zip(fast) {
        assert_eq!(exact["date"], approx["date"]);
        assert_eq!(exact["event_type"], approx["event_type"]);
        assert_eq!(exact["total_points"], approx["total_spent"]);
        assert_eq!(exact["total_events"], approx["total_actions"]);
        assert_eq!(exact["unique_users"], approx["unique_users"]);
    }
}

#[tokio::test]
async fn test_empty_range_returns_no_rows() {
    let app = seeded_app().await;
    let uri = format!("/api/v1/rollups/fast?start={}&end={}", day(20), day(10));

    let (status, json) = common::get_json(app, &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["rows"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_reversed_range_is_invalid_query() {
    let app = common::build_test_app();
    let uri = format!("/api/v1/rollups/raw?start={}&end={}", day(0), day(1));

    let (status, json) = common::get_json(app, &uri).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_query");
}

#[tokio::test]
async fn test_unparseable_date_is_malformed() {
    let app = common::build_test_app();

    let (status, json) =
        common::get_json(app, "/api/v1/rollups/fast?start=yesterday&end=today").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "malformed_request");
}

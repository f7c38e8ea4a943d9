//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use pulse_aggregate_store::MemoryAggregateStore;
use pulse_core::clock::Clock;
use pulse_core::store::{AggregateStore, EventStore};
use pulse_event_store::MemoryEventStore;
use pulse_test_support::FixedClock;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use pulse_api::config::Settings;
use pulse_api::routes;
use pulse_api::state::{AppState, ServiceOptions};

/// Fixed timestamp used across all integration tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 30, 15, 0, 0).unwrap()
}

fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(now()))
}

fn default_options() -> ServiceOptions {
    ServiceOptions::from(&Settings::from_lookup(|_| None).unwrap())
}

/// Build the full app router over fresh in-memory stores.
pub fn build_test_app() -> Router {
    build_test_app_with(
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemoryAggregateStore::new()),
    )
}

/// Build the full app router over the given stores and a fixed clock.
pub fn build_test_app_with(
    events: Arc<dyn EventStore>,
    aggregates: Arc<dyn AggregateStore>,
) -> Router {
    build_test_app_with_options(events, aggregates, default_options())
}

/// Build the full app router with custom service options.
pub fn build_test_app_with_options(
    events: Arc<dyn EventStore>,
    aggregates: Arc<dyn AggregateStore>,
    options: ServiceOptions,
) -> Router {
    let app_state = AppState::new(
        events,
        aggregates,
        fixed_clock(),
        options,
        CancellationToken::new(),
    );
    routes::router().with_state(app_state)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a POST request without a body and return the response.
pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// JSON for one event, `days_ago` days before `now()`.
pub fn event_json(
    user_id: u32,
    event_type: &str,
    points_spent: i64,
    days_ago: i64,
) -> serde_json::Value {
    let event_time = now() - chrono::TimeDelta::days(days_ago);
    serde_json::json!({
        "user_id": user_id,
        "event_type": event_type,
        "points_spent": points_spent,
        "event_time": event_time.to_rfc3339(),
    })
}

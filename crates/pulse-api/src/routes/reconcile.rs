//! Reconciliation endpoints.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use chrono::NaiveDate;
use pulse_core::bucket::BucketKey;
use pulse_core::partial_state::BucketTotals;
use pulse_pipeline::application::reconcile::{PendingReport, RecoveryReport, ReplayReport};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /api/v1/reconcile/bucket`.
#[derive(Debug, Deserialize)]
pub struct BucketRequest {
    /// Bucket date, `YYYY-MM-DD`.
    pub event_date: NaiveDate,
    /// Bucket event type.
    pub event_type: String,
}

/// Result of rebuilding one bucket.
#[derive(Debug, Serialize)]
pub struct BucketResponse {
    /// The rebuilt bucket.
    pub key: BucketKey,
    /// Finalized totals, or `null` if the bucket had no events and was removed.
    pub totals: Option<BucketTotals>,
}

/// Body of `POST /api/v1/reconcile/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Batch to replay.
    pub batch_id: u64,
}

/// POST /api/v1/reconcile/bucket
#[instrument(skip_all)]
async fn reconcile_bucket(
    State(state): State<AppState>,
    body: Result<Json<BucketRequest>, JsonRejection>,
) -> Result<Json<BucketResponse>, ApiError> {
    let Json(request) = body?;
    let key = BucketKey::new(request.event_date, request.event_type);
    let totals = state.reconciler.reconcile_bucket(&key).await?;
    Ok(Json(BucketResponse { key, totals }))
}

/// POST /api/v1/reconcile/batch
#[instrument(skip_all)]
async fn replay_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<ReplayReport>, ApiError> {
    let Json(request) = body?;
    let report = state.reconciler.replay_batch(request.batch_id).await?;
    Ok(Json(report))
}

/// POST /api/v1/reconcile/pending
async fn reconcile_pending(State(state): State<AppState>) -> Json<PendingReport> {
    Json(state.reconciler.reconcile_pending().await)
}

/// POST /api/v1/reconcile/recover
async fn recover_unaggregated(
    State(state): State<AppState>,
) -> Result<Json<RecoveryReport>, ApiError> {
    Ok(Json(state.reconciler.recover_unaggregated().await?))
}

/// Returns the router for reconciliation.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bucket", post(reconcile_bucket))
        .route("/batch", post(replay_batch))
        .route("/pending", post(reconcile_pending))
        .route("/recover", post(recover_unaggregated))
}

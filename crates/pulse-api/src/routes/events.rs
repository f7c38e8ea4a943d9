//! Event ingestion endpoints.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use pulse_core::event::NewEvent;
use pulse_pipeline::application::ingest::IngestReceipt;
use serde::Deserialize;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /api/v1/events/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Events committed together.
    pub events: Vec<NewEvent>,
}

/// POST /api/v1/events
#[instrument(skip_all)]
async fn append_event(
    State(state): State<AppState>,
    body: Result<Json<NewEvent>, JsonRejection>,
) -> Result<Json<IngestReceipt>, ApiError> {
    let Json(event) = body?;
    let receipt = state.ingestor.append_batch(vec![event]).await?;
    Ok(Json(receipt))
}

/// POST /api/v1/events/batch
#[instrument(skip_all)]
async fn append_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<IngestReceipt>, ApiError> {
    let Json(request) = body?;
    let receipt = state.ingestor.append_batch(request.events).await?;
    Ok(Json(receipt))
}

/// Returns the router for event ingestion.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(append_event))
        .route("/batch", post(append_batch))
}

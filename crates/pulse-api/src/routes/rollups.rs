//! Rollup query endpoints.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use pulse_core::range::DateRange;
use pulse_query::domain::rows::{FastRollupRow, RawRollupRow};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Query string shared by both rollup endpoints. Both ends are inclusive.
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    /// First date, `YYYY-MM-DD`.
    pub start: NaiveDate,
    /// Last date, `YYYY-MM-DD`.
    pub end: NaiveDate,
}

/// Rollup rows for the requested range.
#[derive(Debug, Serialize)]
pub struct RollupResponse<T> {
    /// The requested range.
    pub range: DateRange,
    /// One row per `(date, event_type)`, ordered by date then type.
    pub rows: Vec<T>,
}

fn parse_range(
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Result<DateRange, ApiError> {
    let Query(params) = params?;
    Ok(DateRange::new(params.start, params.end)?)
}

/// GET /api/v1/rollups/raw
async fn raw_rollups(
    State(state): State<AppState>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Result<Json<RollupResponse<RawRollupRow>>, ApiError> {
    let range = parse_range(params)?;
    let rows = state.rollups.raw(&range).await?;
    Ok(Json(RollupResponse { range, rows }))
}

/// GET /api/v1/rollups/fast
async fn fast_rollups(
    State(state): State<AppState>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Result<Json<RollupResponse<FastRollupRow>>, ApiError> {
    let range = parse_range(params)?;
    let rows = state.rollups.fast(&range).await?;
    Ok(Json(RollupResponse { range, rows }))
}

/// Returns the router for rollup queries.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/raw", get(raw_rollups))
        .route("/fast", get(fast_rollups))
}

//! Retention cohort endpoint.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use pulse_retention::domain::cohort::{
    CohortMaturity, DEFAULT_WINDOW_DAYS, RetentionOptions, RetentionRow,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Query string of `GET /api/v1/retention`.
#[derive(Debug, Default, Deserialize)]
pub struct RetentionParams {
    /// Return window in days; defaults to 7.
    pub window_days: Option<u32>,
    /// `lenient` or `strict`; defaults to the server setting.
    pub maturity: Option<CohortMaturity>,
}

/// Cohort table and the options it was computed with.
#[derive(Debug, Serialize)]
pub struct RetentionResponse {
    /// Return window in days.
    pub window_days: u32,
    /// Which cohorts were included.
    pub maturity: CohortMaturity,
    /// One row per cohort, oldest first.
    pub cohorts: Vec<RetentionRow>,
}

/// GET /api/v1/retention
async fn retention(
    State(state): State<AppState>,
    params: Result<Query<RetentionParams>, QueryRejection>,
) -> Result<Json<RetentionResponse>, ApiError> {
    let Query(params) = params?;
    let options = RetentionOptions {
        window_days: params.window_days.unwrap_or(DEFAULT_WINDOW_DAYS),
        maturity: params.maturity.unwrap_or(state.default_maturity),
    };
    let cancel = state.shutdown.child_token();
    let cohorts = state.retention.retention(options, &cancel).await?;
    Ok(Json(RetentionResponse {
        window_days: options.window_days,
        maturity: options.maturity,
        cohorts,
    }))
}

/// Returns the router for retention queries.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(retention))
}

//! Pulse — API error types.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pulse_core::error::DomainError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed at startup.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Telemetry exporter could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer error that implements `IntoResponse`.
#[derive(Debug)]
pub enum ApiError {
    /// A domain operation failed.
    Domain(DomainError),
    /// The request body or query string could not be decoded.
    Malformed(String),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

fn classify(err: &DomainError) -> (StatusCode, &'static str) {
    match err {
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        DomainError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "invalid_query"),
        DomainError::StorageUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
        }
        DomainError::ReconciliationWindowExpired { .. } => {
            (StatusCode::CONFLICT, "reconciliation_window_expired")
        }
        DomainError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        DomainError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        DomainError::CorruptState(_) => (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_state"),
        DomainError::AggregationInconsistency { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "aggregation_inconsistency",
        ),
        DomainError::Sweep(_) => (StatusCode::INTERNAL_SERVER_ERROR, "sweep_failed"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::Domain(err) => {
                let (status, code) = classify(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, code, "request failed");
                }
                (status, code, err.to_string())
            }
            Self::Malformed(message) => (StatusCode::BAD_REQUEST, "malformed_request", message),
        };

        let body = ErrorBody {
            error: error_code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

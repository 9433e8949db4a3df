use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::blob::BlobError;
use crate::services::gpx::GpxError;
use crate::services::provider::ProviderError;
use crate::services::timing::TimingError;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ExternalServiceError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal database error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

/// Failures of route creation and analysis.
///
/// Every variant has a stable [`kind`](AnalysisError::kind) string that is
/// sent to clients in terminal `error` events.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid track: {0}")]
    InvalidTrackFormat(#[from] GpxError),

    #[error("Route {0} not found")]
    RouteNotFound(String),

    #[error("Invalid timing: {0}")]
    InvalidTiming(#[from] TimingError),

    #[error("Wind data provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    NoWindData(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidTrackFormat(_) => "invalid_track_format",
            AnalysisError::RouteNotFound(_) => "route_not_found",
            AnalysisError::InvalidTiming(_) => "invalid_timing",
            AnalysisError::Provider(_) => "provider_error",
            AnalysisError::NoWindData(_) => "no_wind_data",
            AnalysisError::Storage(_) => "storage_failure",
        }
    }
}

impl From<sqlx::Error> for AnalysisError {
    fn from(err: sqlx::Error) -> Self {
        AnalysisError::Storage(err.to_string())
    }
}

impl From<BlobError> for AnalysisError {
    fn from(err: BlobError) -> Self {
        AnalysisError::Storage(err.to_string())
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::InvalidTrackFormat(e) => {
                AppError::BadRequest(format!("Invalid GPX: {}", e))
            }
            AnalysisError::RouteNotFound(id) => {
                AppError::NotFound(format!("Route {} not found", id))
            }
            AnalysisError::InvalidTiming(e) => AppError::BadRequest(e.to_string()),
            AnalysisError::Provider(ProviderError::UnknownProvider(name)) => {
                AppError::BadRequest(format!("Unknown provider: {}", name))
            }
            AnalysisError::Provider(e) => AppError::ExternalServiceError(e.to_string()),
            AnalysisError::NoWindData(msg) => AppError::NotFound(msg),
            AnalysisError::Storage(msg) => AppError::InternalError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_error_kinds() {
        assert_eq!(
            AnalysisError::from(GpxError::NoPoints).kind(),
            "invalid_track_format"
        );
        assert_eq!(
            AnalysisError::RouteNotFound("x".into()).kind(),
            "route_not_found"
        );
        assert_eq!(
            AnalysisError::from(ProviderError::UnknownProvider("x".into())).kind(),
            "provider_error"
        );
        assert_eq!(AnalysisError::NoWindData("none".into()).kind(), "no_wind_data");
        let overflow = TimingError {
            start: chrono::Utc::now(),
            hours: 1e12,
        };
        assert_eq!(AnalysisError::from(overflow).kind(), "invalid_timing");
        assert_eq!(AnalysisError::Storage("disk".into()).kind(), "storage_failure");
    }

    #[test]
    fn test_http_status_mapping() {
        let resp = AppError::from(AnalysisError::from(GpxError::NoPoints)).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::from(AnalysisError::RouteNotFound("r".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::from(AnalysisError::from(ProviderError::Status {
            status: 500,
            body: String::new(),
        }))
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}

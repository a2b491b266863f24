//! Error responses.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crawlq_core::{CrawlqError, ErrorResponse};
use crawlq_jobs::JobError;

/// Application error type for Axum.
///
/// Renders as `{"code": ..., "error": ...}` with the status derived from
/// [`CrawlqError::status_code`].
#[derive(Debug)]
pub struct AppError(pub CrawlqError);

impl From<CrawlqError> for AppError {
    fn from(err: CrawlqError) -> Self {
        Self(err)
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        Self(err.into())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(CrawlqError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self(CrawlqError::validation(rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(ErrorResponse::from_error(&self.0))).into_response()
    }
}

/// Result type for Axum handlers.
pub type ApiResult<T> = Result<Json<T>, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = AppError::from(JobError::Validation("payload is required".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unavailable_backend_maps_to_service_unavailable() {
        let response =
            AppError::from(JobError::BackendUnavailable("refused".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = AppError::from(JobError::ShuttingDown).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_internal_maps_to_server_error() {
        let response = AppError::from(JobError::Internal("boom".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

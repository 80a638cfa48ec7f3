//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, StoreError};
use service::ServiceError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Error raised while handling a message.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(err) => service_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn service_error_to_response(err: ServiceError) -> (StatusCode, String) {
    let status = match &err {
        ServiceError::InvalidSku(_) => StatusCode::BAD_REQUEST,
        ServiceError::Domain(DomainError::BatchNotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::Domain(
            DomainError::DuplicateBatch(_) | DomainError::SkuMismatch { .. },
        ) => StatusCode::BAD_REQUEST,
        ServiceError::Store(StoreError::DuplicateBatch(_)) => StatusCode::BAD_REQUEST,
        ServiceError::Store(StoreError::ConcurrencyConflict { .. }) => StatusCode::CONFLICT,
        _ => {
            tracing::error!(error = %err, "unhandled service error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{BatchReference, Sku, Version};

    fn status_of(err: ServiceError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            status_of(ServiceError::InvalidSku(Sku::new("NOPE"))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::BatchNotFound(BatchReference::new("b1")).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DomainError::DuplicateBatch(BatchReference::new("b1")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StoreError::DuplicateBatch(BatchReference::new("b1")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                StoreError::ConcurrencyConflict {
                    sku: Sku::new("LAMP"),
                    expected: Version::new(1),
                    actual: Some(Version::new(2)),
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn other_failures_are_internal() {
        assert_eq!(
            status_of(ServiceError::Publish("broker down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(StoreError::TransactionClosed.into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

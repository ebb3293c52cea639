use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::ModelError;
use crate::queue::QueueError;

/// Errors surfaced by the gateway pipelines.
///
/// Every variant maps to a distinct HTTP status so the collaboration server
/// can tell a bad signature apart from a missing document or a denied user.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed payload, document name, or missing fields.
    #[error("{0}")]
    Validation(String),
    /// Missing or unusable access token.
    #[error("{0}")]
    Authentication(String),
    /// The access gate denied the principal.
    #[error("{0}")]
    Authorization(String),
    /// Unknown token, document, or identity entity.
    #[error("{0}")]
    NotFound(String),
    /// Missing or malformed signature header, or a signature mismatch.
    #[error("{0}")]
    Protocol(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Authorization(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Protocol(_) => StatusCode::BAD_REQUEST,
            GatewayError::Database(_) | GatewayError::Queue(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Authentication(_) => "authentication_error",
            GatewayError::Authorization(_) => "authorization_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Protocol(_) => "protocol_error",
            GatewayError::Database(_) | GatewayError::Queue(_) | GatewayError::Internal(_) => {
                "internal_error"
            }
        }
    }
}

impl From<ModelError> for GatewayError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnknownType(_)
            | ModelError::NotCollaborative(_)
            | ModelError::NotPersisted(_)
            | ModelError::InvalidTable(_) => GatewayError::Validation(err.to_string()),
            ModelError::Database(e) => GatewayError::Database(e),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error: self.code(),
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            GatewayError::Authentication("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Authorization("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Protocol("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_model_errors_become_validation_errors() {
        let err: GatewayError = ModelError::NotCollaborative("App\\Models\\User".into()).into();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(err.code(), "validation_error");
    }
}

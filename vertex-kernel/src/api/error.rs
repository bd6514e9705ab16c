//! API Error Handling
//!
//! Unified error type for kernel responses. Every error is serialised as
//! `{ "code": ..., "message": ... }` so the agent can branch on the code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use vertex_core::dto::docker::{ApiErrorBody, error_code};

use crate::docker::DockerError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    ContainerNotFound(String),
    ImageNotFound(String),
    BadRequest(String),
    DockerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::ContainerNotFound(msg) => {
                tracing::debug!("Container not found: {}", msg);
                (StatusCode::NOT_FOUND, error_code::CONTAINER_NOT_FOUND, msg)
            }
            ApiError::ImageNotFound(msg) => {
                tracing::debug!("Image not found: {}", msg);
                (StatusCode::NOT_FOUND, error_code::IMAGE_NOT_FOUND, msg)
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_code::BAD_REQUEST, msg),
            ApiError::DockerError(msg) => {
                tracing::error!("Docker error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_code::DOCKER_ERROR,
                    msg,
                )
            }
        };

        let body = ApiErrorBody {
            code: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<DockerError> for ApiError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::ContainerNotFound(_) => ApiError::ContainerNotFound(err.to_string()),
            DockerError::ImageNotFound(_) => ApiError::ImageNotFound(err.to_string()),
            DockerError::Unsupported(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::DockerError(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status() {
        let response =
            ApiError::from(DockerError::ContainerNotFound("abc".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unsupported_is_bad_request() {
        let response =
            ApiError::from(DockerError::Unsupported("removed".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_command_failure_is_internal() {
        let response = ApiError::from(DockerError::Command {
            command: "start".to_string(),
            stderr: "daemon down".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Error types for the kernel client

use thiserror::Error;
use vertex_core::dto::docker::{ApiErrorBody, error_code};

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when calling the kernel
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (kernel unreachable, connection reset, ...)
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Kernel answered with `container_not_found`
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Kernel answered with `image_not_found`
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Kernel returned any other error status
    #[error("API error (status {status}, code {code}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Structured error code, empty when the body was not structured
        code: String,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Builds an error from a non-success status and its raw body
    ///
    /// Structured `{code, message}` bodies are mapped onto the dedicated
    /// not-found variants; anything else becomes an [`ClientError::ApiError`].
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(err) if err.code == error_code::CONTAINER_NOT_FOUND => {
                Self::ContainerNotFound(err.message)
            }
            Ok(err) if err.code == error_code::IMAGE_NOT_FOUND => Self::ImageNotFound(err.message),
            Ok(err) => Self::ApiError {
                status,
                code: err.code,
                message: err.message,
            },
            Err(_) => Self::ApiError {
                status,
                code: String::new(),
                message: body.to_string(),
            },
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_) | Self::ImageNotFound(_))
            || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

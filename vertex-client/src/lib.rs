//! Vertex Kernel Client
//!
//! A type-safe HTTP client for the privileged kernel process.
//!
//! The agent runs unprivileged and reaches Docker through the kernel's
//! localhost API. This crate wraps every endpoint of that API.
//!
//! # Example
//!
//! ```no_run
//! use vertex_client::KernelClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vertex_client::ClientError> {
//!     let client = KernelClient::new("http://127.0.0.1:6131");
//!
//!     for container in client.list_containers().await? {
//!         println!("{} {:?}", container.id, container.names);
//!     }
//!     Ok(())
//! }
//! ```

mod containers;
pub mod error;
mod images;

pub use error::{ClientError, Result};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::pin::Pin;

/// Chunked response body, as produced by the log and progress endpoints
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// HTTP client for the kernel Docker API
#[derive(Debug, Clone)]
pub struct KernelClient {
    /// Base URL of the kernel (e.g., "http://127.0.0.1:6131")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl KernelClient {
    /// Create a new kernel client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the kernel API (e.g., "http://127.0.0.1:6131")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new kernel client with a custom HTTP client
    ///
    /// Streaming endpoints (logs, wait, pull, build) stay open for as long as
    /// the container runs, so a custom client must not set a total request
    /// timeout; use `connect_timeout` instead.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the kernel
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/docker{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Fails with a [`ClientError`] built from the body if the status is not a success
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::from_body(status.as_u16(), &body))
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        self.check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check_status(response).await?;
        Ok(())
    }

    /// Handle a chunked API response, returning its body as a byte stream
    async fn handle_stream_response(&self, response: reqwest::Response) -> Result<ByteStream> {
        let response = self.check_status(response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::pin(stream))
    }
}

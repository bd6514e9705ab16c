//! API Module
//!
//! HTTP API layer of the kernel. Only the agent talks to it, over localhost.

pub mod docker;
pub mod error;
pub mod health;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::docker::DockerCli;

/// Create the main API router with all endpoints
pub fn create_router(docker: Arc<DockerCli>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Container endpoints
        .route("/api/docker/containers", get(docker::list_containers))
        .route("/api/docker/container", post(docker::create_container))
        .route("/api/docker/container/{id}", delete(docker::delete_container))
        .route(
            "/api/docker/container/{id}/start",
            post(docker::start_container),
        )
        .route(
            "/api/docker/container/{id}/stop",
            post(docker::stop_container),
        )
        .route(
            "/api/docker/container/{id}/info",
            get(docker::container_info),
        )
        .route(
            "/api/docker/container/{id}/logs/{pipe}",
            get(docker::container_logs),
        )
        .route(
            "/api/docker/container/{id}/wait/{condition}",
            get(docker::wait_container),
        )
        // Image endpoints
        .route("/api/docker/image/pull", post(docker::pull_image))
        .route("/api/docker/image/build", post(docker::build_image))
        .route("/api/docker/image/info", get(docker::image_info))
        // Add state and middleware
        .with_state(docker)
        .layer(TraceLayer::new_for_http())
}

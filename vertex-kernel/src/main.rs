//! Vertex Kernel
//!
//! Privileged companion of the agent. It owns access to the Docker socket
//! and exposes the few Docker operations the agent needs over a localhost
//! HTTP API.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod docker;

use crate::config::Config;
use crate::docker::DockerCli;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vertex_kernel=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Vertex Kernel...");

    let config = Config::from_env();
    let addr = config.validate()?;

    let docker = Arc::new(DockerCli::new(config.docker_bin.clone()));

    // Build router with all API endpoints
    let app = api::create_router(docker);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Kernel server failed")?;

    Ok(())
}

//! Docker API Handlers
//!
//! HTTP endpoints through which the agent drives Docker.

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use vertex_core::dto::docker::{
    BuildImageRequest, ContainerInfo, ContainerSummary, CreateContainerRequest,
    CreateContainerResponse, ImageInfo, LogPipe, PullImageRequest, WaitCondition,
};

use crate::api::error::{ApiError, ApiResult};
use crate::docker::{BodyStream, DockerCli};

// =============================================================================
// Containers
// =============================================================================

/// GET /api/docker/containers
pub async fn list_containers(
    State(docker): State<Arc<DockerCli>>,
) -> ApiResult<Json<Vec<ContainerSummary>>> {
    tracing::debug!("Listing containers");

    let containers = docker.list_containers().await?;
    Ok(Json(containers))
}

/// POST /api/docker/container
pub async fn create_container(
    State(docker): State<Arc<DockerCli>>,
    Json(req): Json<CreateContainerRequest>,
) -> ApiResult<Json<CreateContainerResponse>> {
    if req.image.trim().is_empty() {
        return Err(ApiError::BadRequest("image cannot be empty".to_string()));
    }
    if req.container_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "containerName cannot be empty".to_string(),
        ));
    }

    let created = docker.create_container(&req).await?;
    for warning in &created.warnings {
        tracing::warn!("Container {}: {}", req.container_name, warning);
    }

    Ok(Json(created))
}

/// POST /api/docker/container/{id}/start
pub async fn start_container(
    State(docker): State<Arc<DockerCli>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    docker.start_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/docker/container/{id}/stop
pub async fn stop_container(
    State(docker): State<Arc<DockerCli>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    docker.stop_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/docker/container/{id}
pub async fn delete_container(
    State(docker): State<Arc<DockerCli>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    docker.delete_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/docker/container/{id}/info
pub async fn container_info(
    State(docker): State<Arc<DockerCli>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ContainerInfo>> {
    let info = docker.container_info(&id).await?;
    Ok(Json(info))
}

/// GET /api/docker/container/{id}/logs/{pipe}
///
/// Chunked follow-mode stream of the selected pipe.
pub async fn container_logs(
    State(docker): State<Arc<DockerCli>>,
    Path((id, pipe)): Path<(String, String)>,
) -> ApiResult<Response> {
    let pipe = match pipe.as_str() {
        "stdout" => LogPipe::Stdout,
        "stderr" => LogPipe::Stderr,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown log pipe: {}",
                other
            )));
        }
    };

    let stream = docker.container_logs(&id, pipe).await?;
    Ok(streaming(stream, "application/octet-stream"))
}

/// GET /api/docker/container/{id}/wait/{condition}
///
/// Resolves once the condition is met; the connection stays open until then.
pub async fn wait_container(
    State(docker): State<Arc<DockerCli>>,
    Path((id, condition)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let condition: WaitCondition = condition.parse().map_err(ApiError::BadRequest)?;

    tracing::debug!("Waiting for container {} ({})", id, condition.as_str());
    docker.wait_container(&id, condition).await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Images
// =============================================================================

/// POST /api/docker/image/pull
pub async fn pull_image(
    State(docker): State<Arc<DockerCli>>,
    Json(req): Json<PullImageRequest>,
) -> ApiResult<Response> {
    if req.image.trim().is_empty() {
        return Err(ApiError::BadRequest("image cannot be empty".to_string()));
    }

    let stream = docker.pull_image(&req.image).await?;
    Ok(streaming(stream, "application/x-ndjson"))
}

/// POST /api/docker/image/build
pub async fn build_image(
    State(docker): State<Arc<DockerCli>>,
    Json(req): Json<BuildImageRequest>,
) -> ApiResult<Response> {
    if !std::path::Path::new(&req.dir).is_dir() {
        return Err(ApiError::BadRequest(format!(
            "build directory does not exist: {}",
            req.dir
        )));
    }

    let stream = docker.build_image(&req).await?;
    Ok(streaming(stream, "application/x-ndjson"))
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub image: String,
}

/// GET /api/docker/image/info?image=<reference>
pub async fn image_info(
    State(docker): State<Arc<DockerCli>>,
    Query(query): Query<ImageQuery>,
) -> ApiResult<Json<ImageInfo>> {
    let info = docker.image_info(&query.image).await?;
    Ok(Json(info))
}

fn streaming(stream: BodyStream, content_type: &'static str) -> Response {
    ([(header::CONTENT_TYPE, content_type)], Body::from_stream(stream)).into_response()
}

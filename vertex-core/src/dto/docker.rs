//! Docker DTOs exchanged between the agent and the kernel

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::log::DownloadProgress;

/// Error codes carried by [`ApiErrorBody`]
pub mod error_code {
    pub const CONTAINER_NOT_FOUND: &str = "container_not_found";
    pub const IMAGE_NOT_FOUND: &str = "image_not_found";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const DOCKER_ERROR: &str = "docker_error";
}

/// Structured error body returned by the kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

/// Container as listed by `GET /api/docker/containers`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    /// Docker reports names with a leading `/`
    pub names: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<ContainerMount>,
    pub image_id: String,
}

impl ContainerSummary {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMount {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    pub host_port: String,
}

/// Body of `POST /api/docker/container`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerRequest {
    pub image: String,
    /// Ports in `<port>/<proto>` form
    #[serde(default)]
    pub exposed_ports: Vec<String>,
    #[serde(default)]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    /// `<host>:<container>` bind mounts
    #[serde(default)]
    pub binds: Vec<String>,
    /// `KEY=VALUE` entries
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub sysctls: BTreeMap<String, String>,
    pub container_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContainerResponse {
    pub id: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Body of `GET /api/docker/container/{id}/info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub platform: String,
}

/// Body of `GET /api/docker/image/info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullImageRequest {
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildImageRequest {
    /// Build context directory on the host
    pub dir: String,
    /// Tag given to the built image
    pub name: String,
    /// Dockerfile path relative to `dir`
    pub dockerfile: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDetail {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

/// One NDJSON line of a pull or build progress stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerProgress {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressDetail>,
    /// Set on the last message of a failed pull or build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DockerProgress {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl From<DockerProgress> for DownloadProgress {
    fn from(msg: DockerProgress) -> Self {
        let (current, total) = match msg.progress {
            Some(detail) => (
                Some(detail.current),
                (detail.total > 0).then_some(detail.total),
            ),
            None => (None, None),
        };

        DownloadProgress {
            id: msg.id,
            status: msg.status,
            current,
            total,
        }
    }
}

/// Conditions accepted by `GET /api/docker/container/{id}/wait/{condition}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    NotRunning,
    NextExit,
    Removed,
}

impl WaitCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitCondition::NotRunning => "not-running",
            WaitCondition::NextExit => "next-exit",
            WaitCondition::Removed => "removed",
        }
    }
}

impl std::str::FromStr for WaitCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-running" => Ok(WaitCondition::NotRunning),
            "next-exit" => Ok(WaitCondition::NextExit),
            "removed" => Ok(WaitCondition::Removed),
            other => Err(format!("unknown wait condition: {}", other)),
        }
    }
}

/// Log pipes exposed by `GET /api/docker/container/{id}/logs/{pipe}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPipe {
    Stdout,
    Stderr,
}

impl LogPipe {
    pub fn as_str(self) -> &'static str {
        match self {
            LogPipe::Stdout => "stdout",
            LogPipe::Stderr => "stderr",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_wire_names() {
        let req = CreateContainerRequest {
            image: "redis:7".to_string(),
            container_name: "VERTEX_CONTAINER_x".to_string(),
            cap_add: vec!["NET_ADMIN".to_string()],
            ..Default::default()
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["containerName"], "VERTEX_CONTAINER_x");
        assert_eq!(json["capAdd"][0], "NET_ADMIN");
        assert!(json.get("portBindings").is_some());
    }

    #[test]
    fn test_container_has_name_ignores_slash() {
        let container = ContainerSummary {
            id: "abc".to_string(),
            names: vec!["/VERTEX_CONTAINER_1".to_string()],
            ..Default::default()
        };
        assert!(container.has_name("VERTEX_CONTAINER_1"));
        assert!(!container.has_name("other"));
    }

    #[test]
    fn test_progress_line_to_download() {
        let msg: DockerProgress = serde_json::from_str(
            r#"{"id":"a1","status":"Downloading","progress":{"current":5,"total":10}}"#,
        )
        .unwrap();
        let progress = DownloadProgress::from(msg);
        assert_eq!(progress.current, Some(5));
        assert_eq!(progress.total, Some(10));

        let msg: DockerProgress = serde_json::from_str(r#"{"status":"Pulling fs layer"}"#).unwrap();
        let progress = DownloadProgress::from(msg);
        assert_eq!(progress.id, "");
        assert_eq!(progress.current, None);
    }

    #[test]
    fn test_wait_condition_parse() {
        assert_eq!(
            "not-running".parse::<WaitCondition>(),
            Ok(WaitCondition::NotRunning)
        );
        assert!("whenever".parse::<WaitCondition>().is_err());
    }
}

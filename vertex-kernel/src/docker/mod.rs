//! Docker backend
//!
//! Drives the `docker` CLI on behalf of the agent:
//! - Listing and inspecting containers and images
//! - Creating, starting, stopping and removing containers
//! - Following container output and waiting for exit
//! - Pulling and building images with a progress stream
//!
//! The kernel runs with access to the Docker socket; the agent never does.

mod args;
mod context;
mod progress;

use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use vertex_core::dto::docker::{
    BuildImageRequest, ContainerInfo, ContainerMount, ContainerSummary, CreateContainerRequest,
    CreateContainerResponse, ImageInfo, LogPipe, WaitCondition,
};

pub use args::create_args;

/// Errors from Docker operations
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("No such container: {0}")]
    ContainerNotFound(String),

    #[error("No such image: {0}")]
    ImageNotFound(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    /// The docker CLI exited with a failure status
    #[error("docker {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse docker output: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DockerError>;

/// Chunked body produced by log and progress streams
pub type BodyStream = std::pin::Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Docker operations backed by the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    /// Creates a backend invoking `bin` (usually "docker")
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.bin);
        command.stdin(Stdio::null()).kill_on_drop(false);
        command
    }

    /// Runs a docker subcommand to completion and returns its stdout
    ///
    /// `target` is the object the command operates on; it is used to turn
    /// "No such ..." failures into not-found errors.
    async fn run(&self, args: &[String], target: &str) -> Result<String> {
        let subcommand = args.first().cloned().unwrap_or_default();
        debug!("Running docker {:?}", args);

        let output = self.command().args(args).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(classify_failure(subcommand, target, stderr));
        }

        if !stderr.is_empty() {
            debug!("docker {} stderr: {}", subcommand, stderr);
        }

        Ok(stdout)
    }

    // =============================================================================
    // Containers
    // =============================================================================

    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let ids = self
            .run(&strings(&["ps", "-aq", "--no-trunc"]), "")
            .await?;
        let ids: Vec<String> = ids.lines().map(str::to_string).collect();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = strings(&["inspect", "--type", "container"]);
        args.extend(ids);
        let output = self.run(&args, "").await?;

        let inspected: Vec<InspectContainer> = serde_json::from_str(&output)?;
        Ok(inspected.into_iter().map(ContainerSummary::from).collect())
    }

    pub async fn container_info(&self, id: &str) -> Result<ContainerInfo> {
        let output = self
            .run(&strings(&["inspect", "--type", "container", id]), id)
            .await?;

        let mut inspected: Vec<InspectContainer> = serde_json::from_str(&output)?;
        let container = inspected
            .pop()
            .ok_or_else(|| DockerError::ContainerNotFound(id.to_string()))?;

        Ok(ContainerInfo {
            id: container.id,
            name: container.name.trim_start_matches('/').to_string(),
            image: container.config.image,
            platform: container.platform,
        })
    }

    pub async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> Result<CreateContainerResponse> {
        info!(
            "Creating container {} from image {}",
            req.container_name, req.image
        );

        let output = self
            .command()
            .args(create_args(req))
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(classify_failure(
                "create".to_string(),
                &req.container_name,
                stderr,
            ));
        }

        let warnings = stderr
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();

        Ok(CreateContainerResponse {
            id: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            warnings,
        })
    }

    pub async fn start_container(&self, id: &str) -> Result<()> {
        info!("Starting container {}", id);
        self.run(&strings(&["start", id]), id).await?;
        Ok(())
    }

    pub async fn stop_container(&self, id: &str) -> Result<()> {
        info!("Stopping container {}", id);
        self.run(&strings(&["stop", id]), id).await?;
        Ok(())
    }

    pub async fn delete_container(&self, id: &str) -> Result<()> {
        info!("Removing container {}", id);
        self.run(&strings(&["rm", id]), id).await?;
        Ok(())
    }

    /// Follows one output pipe of a container until it stops
    pub async fn container_logs(&self, id: &str, pipe: LogPipe) -> Result<BodyStream> {
        // `docker logs` reports a missing container on stderr, which is not
        // forwarded for the stdout pipe: check existence first.
        self.container_info(id).await?;

        let mut command = self.command();
        command.args(["logs", "--follow", id]);
        match pipe {
            LogPipe::Stdout => command.stdout(Stdio::piped()).stderr(Stdio::null()),
            LogPipe::Stderr => command.stdout(Stdio::null()).stderr(Stdio::piped()),
        };

        let mut child = command.spawn()?;

        let stream: BodyStream = match pipe {
            LogPipe::Stdout => {
                let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
                Box::pin(ReaderStream::new(stdout))
            }
            LogPipe::Stderr => {
                let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
                Box::pin(ReaderStream::new(stderr))
            }
        };

        // Reap the follower once the container stops.
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!("docker logs for {} ended abnormally: {}", id, e);
            }
        });

        Ok(stream)
    }

    /// Blocks until the container satisfies `condition`
    pub async fn wait_container(&self, id: &str, condition: WaitCondition) -> Result<()> {
        match condition {
            WaitCondition::NotRunning | WaitCondition::NextExit => {
                self.run(&strings(&["wait", id]), id).await?;
                Ok(())
            }
            WaitCondition::Removed => Err(DockerError::Unsupported(format!(
                "wait condition '{}' is not supported",
                condition.as_str()
            ))),
        }
    }

    // =============================================================================
    // Images
    // =============================================================================

    pub async fn image_info(&self, image: &str) -> Result<ImageInfo> {
        let output = self
            .run(&strings(&["image", "inspect", image]), image)
            .await?;

        let mut inspected: Vec<InspectImage> = serde_json::from_str(&output)?;
        let found = inspected
            .pop()
            .ok_or_else(|| DockerError::ImageNotFound(image.to_string()))?;

        Ok(ImageInfo {
            id: found.id,
            tags: found.repo_tags.unwrap_or_default(),
        })
    }

    /// Pulls an image, streaming progress as NDJSON
    pub async fn pull_image(&self, image: &str) -> Result<BodyStream> {
        info!("Pulling image {}", image);

        let child = self
            .command()
            .args(["pull", image])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        progress::stream(child, "pull")
    }

    /// Builds an image from a host directory, streaming progress as NDJSON
    ///
    /// The directory is sent as a tar context without version-control
    /// metadata.
    pub async fn build_image(&self, req: &BuildImageRequest) -> Result<BodyStream> {
        info!("Building image {} from {}", req.name, req.dir);

        let dir = req.dir.clone();
        let archive = tokio::task::spawn_blocking(move || context::archive(Path::new(&dir)))
            .await
            .map_err(std::io::Error::other)??;

        let mut child = self
            .command()
            .args([
                "build",
                "--progress=plain",
                "-f",
                req.dockerfile.as_str(),
                "-t",
                req.name.as_str(),
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&archive).await {
                warn!("Failed to send build context: {}", e);
            }
            // stdin is dropped here, closing the context stream
        });

        progress::stream(child, "build")
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn missing_pipe(name: &str) -> DockerError {
    DockerError::Io(std::io::Error::other(format!(
        "docker child process has no {}",
        name
    )))
}

/// Maps a failed CLI invocation onto a [`DockerError`]
fn classify_failure(command: String, target: &str, stderr: String) -> DockerError {
    if stderr.contains("No such container") {
        DockerError::ContainerNotFound(target.to_string())
    } else if stderr.contains("No such image")
        || (command == "image" && stderr.contains("No such object"))
    {
        DockerError::ImageNotFound(target.to_string())
    } else {
        DockerError::Command { command, stderr }
    }
}

// =============================================================================
// `docker inspect` output
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectContainer {
    id: String,
    name: String,
    /// Image id (sha256:...)
    image: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    mounts: Vec<InspectMount>,
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    /// Image reference the container was created from
    #[serde(default)]
    image: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectImage {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

impl From<InspectContainer> for ContainerSummary {
    fn from(container: InspectContainer) -> Self {
        ContainerSummary {
            id: container.id,
            names: vec![container.name],
            mounts: container
                .mounts
                .into_iter()
                .map(|m| ContainerMount {
                    source: m.source,
                    destination: m.destination,
                })
                .collect(),
            image_id: container.image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_container_not_found() {
        let err = classify_failure(
            "start".to_string(),
            "abc",
            "Error response from daemon: No such container: abc".to_string(),
        );
        assert!(matches!(err, DockerError::ContainerNotFound(ref id) if id == "abc"));
    }

    #[test]
    fn test_classify_image_not_found() {
        let err = classify_failure(
            "image".to_string(),
            "redis:7",
            "Error: No such image: redis:7".to_string(),
        );
        assert!(matches!(err, DockerError::ImageNotFound(_)));
    }

    #[test]
    fn test_classify_other_failure() {
        let err = classify_failure(
            "create".to_string(),
            "x",
            "Conflict. The container name is already in use".to_string(),
        );
        assert!(matches!(err, DockerError::Command { .. }));
    }

    #[test]
    fn test_inspect_container_to_summary() {
        let json = r#"[{
            "Id": "abc123",
            "Name": "/VERTEX_CONTAINER_1",
            "Image": "sha256:deadbeef",
            "Platform": "linux",
            "Mounts": [{"Source": "/data", "Destination": "/var/lib/redis"}],
            "Config": {"Image": "redis:7"}
        }]"#;

        let mut inspected: Vec<InspectContainer> = serde_json::from_str(json).unwrap();
        let summary = ContainerSummary::from(inspected.pop().unwrap());

        assert_eq!(summary.id, "abc123");
        assert!(summary.has_name("VERTEX_CONTAINER_1"));
        assert_eq!(summary.image_id, "sha256:deadbeef");
        assert_eq!(summary.mounts[0].destination, "/var/lib/redis");
    }
}

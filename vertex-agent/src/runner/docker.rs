//! Docker runner
//!
//! Runs container-backed instances through the kernel. A start goes
//! through these steps, in order:
//! 1. Build: pull the manifest image, or build the instance's Dockerfile
//! 2. Resolve the container by its deterministic name, creating it if absent
//! 3. Start it
//! 4. Copy its stdout/stderr logs into the streams handed to the caller
//!
//! A background watcher waits for the container to stop running and
//! reports `Off`; it is the only source of that transition for containers
//! that exit on their own.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vertex_client::{ByteStream, KernelClient};
use vertex_core::domain::instance::{Instance, InstanceStatus, InstanceUpdate};
use vertex_core::domain::log::DownloadProgress;
use vertex_core::domain::service::{BuildMethod, DockerMethod};
use vertex_core::dto::docker::{
    BuildImageRequest, ContainerInfo, ContainerSummary, CreateContainerRequest,
    CreateContainerResponse, DockerProgress, ImageInfo, LogPipe, WaitCondition,
};

use super::container_config::{self, container_name, image_name};
use super::{Result, RunObserver, RunStreams, Runner, RunnerError, RunnerInfo};

/// Buffer size of each output pipe
const PIPE_CAPACITY: usize = 64 * 1024;

// =============================================================================
// Kernel API
// =============================================================================

/// Docker operations offered by the kernel
///
/// Implemented by [`KernelClient`]; tests substitute an in-memory double.
#[async_trait]
pub trait DockerApi: Send + Sync {
    async fn list_containers(&self) -> vertex_client::Result<Vec<ContainerSummary>>;

    async fn container_info(&self, id: &str) -> vertex_client::Result<ContainerInfo>;

    async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> vertex_client::Result<CreateContainerResponse>;

    async fn start_container(&self, id: &str) -> vertex_client::Result<()>;

    async fn stop_container(&self, id: &str) -> vertex_client::Result<()>;

    async fn delete_container(&self, id: &str) -> vertex_client::Result<()>;

    async fn container_logs(&self, id: &str, pipe: LogPipe) -> vertex_client::Result<ByteStream>;

    async fn wait_container(&self, id: &str, condition: WaitCondition)
    -> vertex_client::Result<()>;

    async fn pull_image(&self, image: &str) -> vertex_client::Result<ByteStream>;

    async fn build_image(&self, req: &BuildImageRequest) -> vertex_client::Result<ByteStream>;

    async fn image_info(&self, image: &str) -> vertex_client::Result<ImageInfo>;
}

#[async_trait]
impl DockerApi for KernelClient {
    async fn list_containers(&self) -> vertex_client::Result<Vec<ContainerSummary>> {
        KernelClient::list_containers(self).await
    }

    async fn container_info(&self, id: &str) -> vertex_client::Result<ContainerInfo> {
        KernelClient::container_info(self, id).await
    }

    async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> vertex_client::Result<CreateContainerResponse> {
        KernelClient::create_container(self, req).await
    }

    async fn start_container(&self, id: &str) -> vertex_client::Result<()> {
        KernelClient::start_container(self, id).await
    }

    async fn stop_container(&self, id: &str) -> vertex_client::Result<()> {
        KernelClient::stop_container(self, id).await
    }

    async fn delete_container(&self, id: &str) -> vertex_client::Result<()> {
        KernelClient::delete_container(self, id).await
    }

    async fn container_logs(&self, id: &str, pipe: LogPipe) -> vertex_client::Result<ByteStream> {
        KernelClient::container_logs(self, id, pipe).await
    }

    async fn wait_container(
        &self,
        id: &str,
        condition: WaitCondition,
    ) -> vertex_client::Result<()> {
        KernelClient::wait_container(self, id, condition).await
    }

    async fn pull_image(&self, image: &str) -> vertex_client::Result<ByteStream> {
        KernelClient::pull_image(self, image).await
    }

    async fn build_image(&self, req: &BuildImageRequest) -> vertex_client::Result<ByteStream> {
        KernelClient::build_image(self, req).await
    }

    async fn image_info(&self, image: &str) -> vertex_client::Result<ImageInfo> {
        KernelClient::image_info(self, image).await
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Runner for instances with a `docker` method
pub struct DockerRunner {
    api: Arc<dyn DockerApi>,
}

impl DockerRunner {
    pub fn new(api: Arc<dyn DockerApi>) -> Self {
        Self { api }
    }

    /// Looks up the container of an instance by name
    async fn find_container(&self, uuid: Uuid) -> Result<ContainerSummary> {
        find_container(self.api.as_ref(), uuid).await
    }

    async fn container_id(&self, uuid: Uuid) -> Result<String> {
        Ok(self.find_container(uuid).await?.id)
    }
}

fn docker_method(instance: &Instance) -> Result<&DockerMethod> {
    instance
        .service
        .methods
        .docker
        .as_ref()
        .ok_or(RunnerError::MissingBuildMethod)
}

async fn find_container(api: &dyn DockerApi, uuid: Uuid) -> Result<ContainerSummary> {
    let name = container_name(uuid);

    api.list_containers()
        .await?
        .into_iter()
        .find(|c| c.has_name(&name))
        .ok_or(RunnerError::ContainerNotFound(name))
}

/// Reads an NDJSON progress stream to its end
///
/// Fails with [`RunnerError::BuildFailed`] on the first message carrying an
/// error.
async fn consume_progress(
    stream: ByteStream,
    mut on_progress: impl FnMut(DownloadProgress),
) -> Result<()> {
    let mut lines = StreamReader::new(stream).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let message: DockerProgress = serde_json::from_str(&line)?;
        if let Some(error) = message.error {
            return Err(RunnerError::BuildFailed(error));
        }
        on_progress(message.into());
    }

    Ok(())
}

#[async_trait]
impl Runner for DockerRunner {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn start(
        &self,
        instance: &Instance,
        dir: &Path,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunStreams> {
        let method = docker_method(instance)?;
        let build = method
            .build_method()
            .ok_or(RunnerError::MissingBuildMethod)?;

        let (job, image) = match build {
            BuildMethod::Image(image) => (BuildJob::Pull(image.to_string()), image.to_string()),
            BuildMethod::Dockerfile(dockerfile) => {
                let name = image_name(instance.uuid);
                let request = BuildImageRequest {
                    dir: dir.display().to_string(),
                    name: name.clone(),
                    dockerfile: dockerfile.to_string(),
                };
                (BuildJob::Build(request), name)
            }
        };

        // Manifest errors surface here, before the instance reaches Building
        let request = container_config::create_request(instance, dir, method, &image)?;

        let (stdout, stdout_writer) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr, stderr_writer) = tokio::io::duplex(PIPE_CAPACITY);
        let (started_tx, started_rx) = oneshot::channel();

        let pipeline = Pipeline {
            api: Arc::clone(&self.api),
            uuid: instance.uuid,
            job,
            request,
            observer,
        };

        tokio::spawn(pipeline.run(stdout_writer, stderr_writer, started_tx));

        Ok(RunStreams {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            started: started_rx,
        })
    }

    async fn stop(&self, instance: &Instance) -> Result<()> {
        let id = self.container_id(instance.uuid).await?;

        info!("Stopping container {} of instance {}", id, instance.uuid);
        self.api.stop_container(&id).await?;
        Ok(())
    }

    async fn delete(&self, instance: &Instance) -> Result<()> {
        let id = self.container_id(instance.uuid).await?;

        info!("Deleting container {} of instance {}", id, instance.uuid);
        self.api.delete_container(&id).await?;
        Ok(())
    }

    async fn info(&self, instance: &Instance) -> Result<RunnerInfo> {
        let id = self.container_id(instance.uuid).await?;
        let info = self.api.container_info(&id).await?;
        Ok(RunnerInfo::Docker(info))
    }

    async fn check_for_updates(&self, instance: &Instance) -> Result<Option<InstanceUpdate>> {
        let image = match docker_method(instance)?.build_method() {
            Some(BuildMethod::Image(image)) => image,
            Some(BuildMethod::Dockerfile(_)) => {
                return Err(RunnerError::UpdatesUnsupported("Dockerfile-based instances"));
            }
            None => return Err(RunnerError::MissingBuildMethod),
        };

        let container = match self.find_container(instance.uuid).await {
            Ok(container) => container,
            Err(e) if e.is_container_not_found() => {
                debug!("Instance {} has no container yet, nothing to update", instance.uuid);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let stream = self.api.pull_image(image).await?;
        consume_progress(stream, |_| {}).await?;

        let latest = self.api.image_info(image).await?;
        if latest.id == container.image_id {
            return Ok(None);
        }

        info!(
            "Update available for instance {}: {} -> {}",
            instance.uuid, container.image_id, latest.id
        );
        Ok(Some(InstanceUpdate {
            current_version: container.image_id,
            latest_version: latest.id,
        }))
    }
}

// =============================================================================
// Start Pipeline
// =============================================================================

enum BuildJob {
    Pull(String),
    Build(BuildImageRequest),
}

/// Background part of a start
struct Pipeline {
    api: Arc<dyn DockerApi>,
    uuid: Uuid,
    job: BuildJob,
    request: CreateContainerRequest,
    observer: Arc<dyn RunObserver>,
}

impl Pipeline {
    async fn run(
        self,
        stdout: DuplexStream,
        stderr: DuplexStream,
        started: oneshot::Sender<Result<()>>,
    ) {
        let id = match self.launch().await {
            Ok(id) => id,
            Err(e) => {
                // Dropping the writers closes the caller's streams
                let _ = started.send(Err(e));
                return;
            }
        };

        self.watch_exit(id.clone());
        let _ = started.send(Ok(()));

        tokio::join!(
            self.copy_logs(&id, LogPipe::Stdout, stdout),
            self.copy_logs(&id, LogPipe::Stderr, stderr),
        );
        debug!("Log streams of container {} closed", id);
    }

    /// Builds, resolves or creates, then starts the container
    async fn launch(&self) -> Result<String> {
        self.observer.on_status(InstanceStatus::Building);
        self.build().await?;

        let id = match find_container(self.api.as_ref(), self.uuid).await {
            Ok(container) => container.id,
            Err(RunnerError::ContainerNotFound(name)) => {
                debug!("No container named {}, creating it", name);
                let created = self.api.create_container(&self.request).await?;
                for warning in &created.warnings {
                    warn!("Container {}: {}", name, warning);
                }
                created.id
            }
            Err(e) => return Err(e),
        };

        self.api.start_container(&id).await?;
        info!("Container {} of instance {} started", id, self.uuid);

        self.observer.on_status(InstanceStatus::Running);
        Ok(id)
    }

    async fn build(&self) -> Result<()> {
        let stream = match &self.job {
            BuildJob::Pull(image) => {
                info!("Pulling image {} for instance {}", image, self.uuid);
                self.api.pull_image(image).await?
            }
            BuildJob::Build(req) => {
                info!("Building image {} for instance {}", req.name, self.uuid);
                self.api.build_image(req).await?
            }
        };

        consume_progress(stream, |progress| self.observer.on_progress(progress)).await
    }

    fn watch_exit(&self, id: String) {
        let api = Arc::clone(&self.api);
        let observer = Arc::clone(&self.observer);
        let uuid = self.uuid;

        tokio::spawn(async move {
            match api.wait_container(&id, WaitCondition::NotRunning).await {
                Ok(()) => {
                    info!("Container {} of instance {} is no longer running", id, uuid);
                    observer.on_status(InstanceStatus::Off);
                }
                Err(e) => {
                    warn!("Lost track of container {}: {}", id, e);
                    observer.on_error(format!("Lost track of container {}: {}", id, e));
                    observer.on_status(InstanceStatus::Error);
                }
            }
        });
    }

    async fn copy_logs(&self, id: &str, pipe: LogPipe, mut writer: DuplexStream) {
        let stream = match self.api.container_logs(id, pipe).await {
            Ok(stream) => stream,
            Err(e) => {
                self.observer.on_error(format!(
                    "Failed to attach to {} of container {}: {}",
                    pipe.as_str(),
                    id,
                    e
                ));
                return;
            }
        };

        let mut reader = StreamReader::new(stream);
        if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
            debug!("Stopped copying {} of container {}: {}", pipe.as_str(), id, e);
        }
    }
}

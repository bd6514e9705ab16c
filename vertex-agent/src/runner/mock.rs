//! In-memory kernel double for tests
//!
//! Simulates the Docker API without a kernel: containers are records in a
//! list, a container "runs" from its start call until it is stopped or
//! [`MockDockerApi::simulate_exit`] is called.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, future, stream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use vertex_client::{ByteStream, ClientError};
use vertex_core::domain::instance::InstanceStatus;
use vertex_core::domain::log::DownloadProgress;
use vertex_core::dto::docker::{
    BuildImageRequest, ContainerInfo, ContainerSummary, CreateContainerRequest,
    CreateContainerResponse, DockerProgress, ImageInfo, LogPipe, WaitCondition,
};

use super::RunObserver;
use super::docker::DockerApi;

#[derive(Default)]
struct MockState {
    containers: Vec<ContainerSummary>,
    created: Vec<CreateContainerRequest>,
    pull_progress: Vec<DockerProgress>,
    stdout: Vec<String>,
    stderr: Vec<String>,
    latest_image: String,
}

pub(crate) struct MockDockerApi {
    state: Mutex<MockState>,
    running: watch::Sender<bool>,
    hold_pull: AtomicBool,
    pull_gate: Notify,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_wait: AtomicBool,
    pub pull_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl MockDockerApi {
    pub fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self {
            state: Mutex::new(MockState {
                latest_image: "sha256:latest".to_string(),
                ..Default::default()
            }),
            running,
            hold_pull: AtomicBool::new(false),
            pull_gate: Notify::new(),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_wait: AtomicBool::new(false),
            pull_calls: AtomicUsize::new(0),
            build_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_pull_progress(&self, progress: Vec<DockerProgress>) {
        self.state.lock().unwrap().pull_progress = progress;
    }

    /// Lines the container prints on stdout and stderr
    pub fn set_output(&self, stdout: Vec<&str>, stderr: Vec<&str>) {
        let mut state = self.state.lock().unwrap();
        state.stdout = stdout.into_iter().map(String::from).collect();
        state.stderr = stderr.into_iter().map(String::from).collect();
    }

    pub fn set_latest_image(&self, id: &str) {
        self.state.lock().unwrap().latest_image = id.to_string();
    }

    pub fn add_container(&self, name: &str, image_id: &str) {
        let mut state = self.state.lock().unwrap();
        let id = format!("container-{}", state.containers.len() + 1);
        state.containers.push(ContainerSummary {
            id,
            names: vec![format!("/{}", name)],
            mounts: Vec::new(),
            image_id: image_id.to_string(),
        });
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn created_requests(&self) -> Vec<CreateContainerRequest> {
        self.state.lock().unwrap().created.clone()
    }

    /// Makes pulls block until [`MockDockerApi::release_pull`]
    pub fn hold_pulls(&self) {
        self.hold_pull.store(true, Ordering::SeqCst);
    }

    pub fn release_pull(&self) {
        self.hold_pull.store(false, Ordering::SeqCst);
        self.pull_gate.notify_waiters();
        self.pull_gate.notify_one();
    }

    /// The running container exits on its own
    pub fn simulate_exit(&self) {
        self.running.send_replace(false);
    }

    fn progress_stream(&self) -> ByteStream {
        let lines: Vec<std::io::Result<Bytes>> = self
            .state
            .lock()
            .unwrap()
            .pull_progress
            .iter()
            .map(|p| {
                let mut line = serde_json::to_vec(p).unwrap();
                line.push(b'\n');
                Ok(Bytes::from(line))
            })
            .collect();
        Box::pin(stream::iter(lines))
    }

    fn has_container(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .any(|c| c.id == id)
    }

    fn not_found(id: &str) -> ClientError {
        ClientError::ContainerNotFound(id.to_string())
    }
}

/// Resolves once the simulated container is not running
async fn until_stopped(mut rx: watch::Receiver<bool>) {
    loop {
        let running = *rx.borrow_and_update();
        if !running {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl DockerApi for MockDockerApi {
    async fn list_containers(&self) -> vertex_client::Result<Vec<ContainerSummary>> {
        Ok(self.state.lock().unwrap().containers.clone())
    }

    async fn container_info(&self, id: &str) -> vertex_client::Result<ContainerInfo> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::not_found(id))?;

        Ok(ContainerInfo {
            id: container.id.clone(),
            name: container.names.first().cloned().unwrap_or_default(),
            image: container.image_id.clone(),
            platform: "linux".to_string(),
        })
    }

    async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> vertex_client::Result<CreateContainerResponse> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let image_id = self.state.lock().unwrap().latest_image.clone();
        self.add_container(&req.container_name, &image_id);

        let mut state = self.state.lock().unwrap();
        state.created.push(req.clone());
        let id = state.containers.last().map(|c| c.id.clone()).unwrap_or_default();

        Ok(CreateContainerResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn start_container(&self, id: &str) -> vertex_client::Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        if !self.has_container(id) {
            return Err(Self::not_found(id));
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ClientError::ApiError {
                status: 500,
                code: "docker_error".to_string(),
                message: "port is already allocated".to_string(),
            });
        }

        self.running.send_replace(true);
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> vertex_client::Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        if !self.has_container(id) {
            return Err(Self::not_found(id));
        }
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(ClientError::ApiError {
                status: 500,
                code: "docker_error".to_string(),
                message: "cannot stop container".to_string(),
            });
        }

        self.running.send_replace(false);
        Ok(())
    }

    async fn delete_container(&self, id: &str) -> vertex_client::Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);

        if state.containers.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn container_logs(&self, id: &str, pipe: LogPipe) -> vertex_client::Result<ByteStream> {
        if !self.has_container(id) {
            return Err(Self::not_found(id));
        }

        let lines: Vec<std::io::Result<Bytes>> = {
            let state = self.state.lock().unwrap();
            let lines = match pipe {
                LogPipe::Stdout => &state.stdout,
                LogPipe::Stderr => &state.stderr,
            };
            lines
                .iter()
                .map(|l| Ok(Bytes::from(format!("{}\n", l))))
                .collect()
        };

        // Follow mode: the stream stays open while the container runs
        let tail = stream::once(until_stopped(self.running.subscribe()))
            .filter_map(|()| future::ready(None::<std::io::Result<Bytes>>));

        Ok(Box::pin(stream::iter(lines).chain(tail)))
    }

    async fn wait_container(
        &self,
        id: &str,
        condition: WaitCondition,
    ) -> vertex_client::Result<()> {
        if !self.has_container(id) {
            return Err(Self::not_found(id));
        }
        assert_eq!(condition, WaitCondition::NotRunning);
        if self.fail_wait.load(Ordering::SeqCst) {
            return Err(ClientError::ApiError {
                status: 502,
                code: "docker_error".to_string(),
                message: "connection reset by peer".to_string(),
            });
        }

        until_stopped(self.running.subscribe()).await;
        Ok(())
    }

    async fn pull_image(&self, _image: &str) -> vertex_client::Result<ByteStream> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);

        while self.hold_pull.load(Ordering::SeqCst) {
            let released = self.pull_gate.notified();
            if !self.hold_pull.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }

        Ok(self.progress_stream())
    }

    async fn build_image(&self, _req: &BuildImageRequest) -> vertex_client::Result<ByteStream> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.progress_stream())
    }

    async fn image_info(&self, image: &str) -> vertex_client::Result<ImageInfo> {
        Ok(ImageInfo {
            id: self.state.lock().unwrap().latest_image.clone(),
            tags: vec![image.to_string()],
        })
    }
}

/// Observer that records everything it is told
#[derive(Default)]
pub(crate) struct RecordingObserver {
    statuses: Mutex<Vec<InstanceStatus>>,
    progress: Mutex<Vec<DownloadProgress>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn statuses(&self) -> Vec<InstanceStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<DownloadProgress> {
        self.progress.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub async fn wait_for_status(&self, status: InstanceStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.statuses().contains(&status) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("status was never reported");
    }
}

impl RunObserver for RecordingObserver {
    fn on_status(&self, status: InstanceStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn on_progress(&self, progress: DownloadProgress) {
        self.progress.lock().unwrap().push(progress);
    }

    fn on_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }
}

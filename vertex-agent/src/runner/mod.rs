//! Runner adapters
//!
//! A runner turns an instance manifest into a running workload and back.
//! The lifecycle service picks the runner from the manifest's methods:
//! - [`docker::DockerRunner`]: build or pull, create, start and watch a container
//!   through the kernel
//! - [`script::ScriptRunner`]: run an executable from the instance directory
//!
//! Runners report progress through a [`RunObserver`] and hand back the
//! workload's output as two byte streams.

pub mod container_config;
pub mod docker;
#[cfg(test)]
pub(crate) mod mock;
pub mod script;

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use vertex_client::ClientError;
use vertex_core::domain::instance::{Instance, InstanceStatus, InstanceUpdate};
use vertex_core::domain::log::DownloadProgress;
use vertex_core::dto::docker::ContainerInfo;

pub use docker::{DockerApi, DockerRunner};
pub use script::ScriptRunner;

/// Errors from runner operations
#[derive(Debug, Error)]
pub enum RunnerError {
    /// No container exists for the instance; expected on first start
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Service declares neither an image nor a Dockerfile")]
    MissingBuildMethod,

    #[error("Malformed port '{port}': {reason}")]
    MalformedPort { port: String, reason: String },

    #[error("Malformed volume '{volume}': {reason}")]
    MalformedVolume { volume: String, reason: String },

    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Update checks are not supported for {0}")]
    UpdatesUnsupported(&'static str),

    #[error("Instance is not running")]
    NotRunning,

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Dependency '{0}' not found on PATH")]
    MissingDependency(String),

    /// The start pipeline ended without reporting an outcome
    #[error("Start was aborted")]
    Aborted,

    #[error("Kernel error: {0}")]
    Kernel(ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid progress message: {0}")]
    Progress(#[from] serde_json::Error),
}

impl From<ClientError> for RunnerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ContainerNotFound(id) => RunnerError::ContainerNotFound(id),
            other => RunnerError::Kernel(other),
        }
    }
}

impl RunnerError {
    pub fn is_container_not_found(&self) -> bool {
        matches!(self, RunnerError::ContainerNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Receives what happens to a workload while and after it starts
///
/// Calls arrive from runner tasks in the order the runner produced them.
pub trait RunObserver: Send + Sync {
    fn on_status(&self, status: InstanceStatus);

    fn on_progress(&self, progress: DownloadProgress);

    /// A failure that did not end the start call, e.g. a broken exit watch
    fn on_error(&self, message: String);
}

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Output of a started workload
pub struct RunStreams {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    /// Resolves once the workload runs, or with the error that stopped it
    pub started: oneshot::Receiver<Result<()>>,
}

/// Runtime details of an instance's workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerInfo {
    Docker(ContainerInfo),
    Script { pid: Option<u32> },
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type identifier ("docker", "script")
    fn kind(&self) -> &'static str;

    /// Starts the workload of `instance`
    ///
    /// Manifest errors are returned before anything is reported to the
    /// observer. Otherwise the call returns as soon as the output streams
    /// exist and the rest of the start happens in the background.
    ///
    /// # Arguments
    /// * `instance` - Snapshot of the instance to start
    /// * `dir` - Instance directory
    /// * `observer` - Receives status and progress updates
    async fn start(
        &self,
        instance: &Instance,
        dir: &Path,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunStreams>;

    async fn stop(&self, instance: &Instance) -> Result<()>;

    /// Removes the workload's runtime resources (container, cached handles)
    async fn delete(&self, instance: &Instance) -> Result<()>;

    async fn info(&self, instance: &Instance) -> Result<RunnerInfo>;

    /// Returns the pending update, or `None` when the workload is up to date
    async fn check_for_updates(&self, instance: &Instance) -> Result<Option<InstanceUpdate>>;
}

//! Lifecycle service errors

use thiserror::Error;
use uuid::Uuid;
use vertex_core::domain::instance::InstanceStatus;

use crate::env::EnvError;
use crate::logger::LoggerError;
use crate::runner::RunnerError;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Instance not found: {0}")]
    NotFound(Uuid),

    #[error("Instance is already running")]
    AlreadyRunning,

    #[error("Instance is not running")]
    NotRunning,

    /// Deletion refused because the workload may still be alive
    #[error("Instance {0} is still {1}")]
    StillRunning(Uuid, InstanceStatus),

    /// A start is in flight
    #[error("Instance {0} is busy")]
    Busy(Uuid),

    #[error("Invalid service manifest: {0}")]
    Manifest(String),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("Env file error: {0}")]
    Env(#[from] EnvError),

    #[error("Logger error: {0}")]
    Logger(#[from] LoggerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid service file: {0}")]
    ServiceFile(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, InstanceError>;

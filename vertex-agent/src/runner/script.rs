//! Script runner
//!
//! Runs instances whose manifest declares a `script` method as a child
//! process of the agent, inside the instance directory and with the
//! instance env applied.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vertex_core::domain::instance::{Instance, InstanceStatus, InstanceUpdate};

use super::{Result, RunObserver, RunStreams, Runner, RunnerError, RunnerInfo};

struct ProcessHandle {
    pid: Option<u32>,
    /// Asks the waiter to kill the process; it acks once the process is gone
    kill: oneshot::Sender<oneshot::Sender<()>>,
}

/// Runner for instances with a `script` method
#[derive(Clone, Default)]
pub struct ScriptRunner {
    processes: Arc<Mutex<HashMap<Uuid, ProcessHandle>>>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn processes(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ProcessHandle>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self, uuid: Uuid) -> bool {
        self.processes().contains_key(&uuid)
    }
}

#[async_trait]
impl Runner for ScriptRunner {
    fn kind(&self) -> &'static str {
        "script"
    }

    async fn start(
        &self,
        instance: &Instance,
        dir: &Path,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunStreams> {
        let script = instance
            .service
            .methods
            .script
            .as_ref()
            .ok_or(RunnerError::MissingBuildMethod)?;

        let path = dir.join(&script.filename);
        let path = match std::fs::canonicalize(&path) {
            Ok(path) if path.is_file() => path,
            _ => return Err(RunnerError::ScriptNotFound(path.display().to_string())),
        };

        if let Some(missing) = script
            .dependencies
            .iter()
            .find(|dependency| find_on_path(dependency).is_none())
        {
            return Err(RunnerError::MissingDependency(missing.clone()));
        }

        observer.on_status(InstanceStatus::Building);

        let mut child = Command::new(&path)
            .current_dir(dir)
            .envs(&instance.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(RunnerError::Io(std::io::Error::other(
                    "child process has no output pipes",
                )));
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        self.processes().insert(
            instance.uuid,
            ProcessHandle {
                pid,
                kill: kill_tx,
            },
        );

        info!(
            "Script {} of instance {} running (pid {:?})",
            script.filename, instance.uuid, pid
        );
        observer.on_status(InstanceStatus::Running);

        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            instance.uuid,
            Arc::clone(&self.processes),
            observer,
        ));

        let (started_tx, started_rx) = oneshot::channel();
        let _ = started_tx.send(Ok(()));

        Ok(RunStreams {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            started: started_rx,
        })
    }

    async fn stop(&self, instance: &Instance) -> Result<()> {
        let handle = self
            .processes()
            .remove(&instance.uuid)
            .ok_or(RunnerError::NotRunning)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        if handle.kill.send(ack_tx).is_err() {
            // Waiter already gone: the process exited on its own
            return Ok(());
        }

        let _ = ack_rx.await;
        Ok(())
    }

    async fn delete(&self, instance: &Instance) -> Result<()> {
        if self.is_running(instance.uuid) {
            self.stop(instance).await?;
        }
        Ok(())
    }

    async fn info(&self, instance: &Instance) -> Result<RunnerInfo> {
        let pid = self
            .processes()
            .get(&instance.uuid)
            .map(|handle| handle.pid)
            .ok_or(RunnerError::NotRunning)?;

        Ok(RunnerInfo::Script { pid })
    }

    async fn check_for_updates(&self, _instance: &Instance) -> Result<Option<InstanceUpdate>> {
        Err(RunnerError::UpdatesUnsupported("script instances"))
    }
}

/// Resolves a binary name against the agent's `PATH`
fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Waits for the child to exit or to be killed, then reports the outcome
async fn wait_for_exit(
    mut child: Child,
    kill: oneshot::Receiver<oneshot::Sender<()>>,
    uuid: Uuid,
    processes: Arc<Mutex<HashMap<Uuid, ProcessHandle>>>,
    observer: Arc<dyn RunObserver>,
) {
    tokio::select! {
        status = child.wait() => {
            processes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&uuid);

            match status {
                Ok(status) if status.success() => {
                    info!("Script of instance {} exited", uuid);
                    observer.on_status(InstanceStatus::Off);
                }
                Ok(status) => {
                    warn!("Script of instance {} failed: {}", uuid, status);
                    observer.on_error(format!("Process exited with {}", status));
                    observer.on_status(InstanceStatus::Error);
                }
                Err(e) => {
                    observer.on_error(format!("Failed to wait for process: {}", e));
                    observer.on_status(InstanceStatus::Error);
                }
            }
        }
        ack = kill => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill script of instance {}: {}", uuid, e);
            }
            debug!("Script of instance {} killed", uuid);
            observer.on_status(InstanceStatus::Off);

            if let Ok(ack) = ack {
                let _ = ack.send(());
            }
        }
    }
}

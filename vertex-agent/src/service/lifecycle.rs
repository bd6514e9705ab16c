//! Instance lifecycle service
//!
//! Holds every installed instance and drives it along its state machine:
//!
//! ```text
//! Off | Error -> Building -> Running | Error
//! Running -> Stopping -> Off | Running
//! Running -> Off   (reported by the runner when the workload exits)
//! ```
//!
//! Each instance carries two busy flags, one for starts and one for stops,
//! taken with a single compare-and-swap. A second start or stop issued
//! while one is in flight is a no-op rather than an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vertex_core::domain::event::Event;
use vertex_core::domain::instance::{EnvVariables, Instance, InstanceStatus, InstanceUpdate};
use vertex_core::domain::log::{LogLine, LogLineKind, LogMessage};
use vertex_core::domain::service::Service;

use super::error::{InstanceError, Result};
use super::output::{Observer, pump};
use crate::bus::EventBus;
use crate::env;
use crate::logger::LoggerRegistry;
use crate::runner::{RunObserver, Runner, RunnerError, RunnerInfo};

/// Agent metadata directory inside an instance
const VERTEX_DIR: &str = ".vertex";
const SERVICE_FILE: &str = "service.yml";

// =============================================================================
// Instance Entry
// =============================================================================

/// In-memory record of one instance
pub(super) struct InstanceEntry {
    pub(super) uuid: Uuid,
    dir: PathBuf,
    state: Mutex<Instance>,
    /// Held while a status change is applied and dispatched, so listeners
    /// see changes of one instance in the order they were made
    transitions: Mutex<()>,
    starting: AtomicBool,
    stopping: AtomicBool,
    /// Set when the env changed while the workload was alive; the next
    /// start discards the old workload first
    stale: AtomicBool,
}

impl InstanceEntry {
    fn new(instance: Instance, dir: PathBuf) -> Self {
        Self {
            uuid: instance.uuid,
            dir,
            state: Mutex::new(instance),
            transitions: Mutex::new(()),
            starting: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            stale: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Instance> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> InstanceStatus {
        self.lock().status
    }

    fn snapshot(&self) -> Instance {
        self.lock().clone()
    }
}

/// Busy flag held for the duration of a start or stop
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    /// Takes the flag, or returns `None` if it is already taken
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Service
// =============================================================================

struct Inner {
    instances_dir: PathBuf,
    bus: Arc<EventBus>,
    logs: Arc<LoggerRegistry>,
    docker: Arc<dyn Runner>,
    script: Arc<dyn Runner>,
    instances: RwLock<HashMap<Uuid, Arc<InstanceEntry>>>,
}

/// Owner of every instance and its lifecycle
#[derive(Clone)]
pub struct InstanceService {
    inner: Arc<Inner>,
}

impl InstanceService {
    /// Creates the service
    ///
    /// # Arguments
    /// * `instances_dir` - Directory holding one sub-directory per instance
    /// * `bus` - Bus on which status and log events are published
    /// * `logs` - Registry of instance loggers
    /// * `docker` - Runner for instances with a `docker` method
    /// * `script` - Runner for instances with a `script` method
    pub fn new(
        instances_dir: impl Into<PathBuf>,
        bus: Arc<EventBus>,
        logs: Arc<LoggerRegistry>,
        docker: Arc<dyn Runner>,
        script: Arc<dyn Runner>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                instances_dir: instances_dir.into(),
                bus,
                logs,
                docker,
                script,
                instances: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn instances_dir(&self) -> &Path {
        &self.inner.instances_dir
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts an instance
    ///
    /// This call is long-lived: it returns once the workload's output streams
    /// close, usually when the workload stops. Watch `StatusChange` events to
    /// learn when the instance is running.
    ///
    /// A start issued while the instance is building or stopping, or while
    /// another start is in flight, does nothing and returns `Ok`.
    ///
    /// # Returns
    /// * `Err(AlreadyRunning)` if the instance is running
    /// * The runner error if the start failed; the instance is then in `Error`
    pub async fn start(&self, uuid: Uuid) -> Result<()> {
        let entry = self.entry(uuid)?;

        match entry.status() {
            InstanceStatus::Running => return Err(InstanceError::AlreadyRunning),
            status if !status.can_start() => {
                debug!("Ignoring start of instance {}: it is {}", uuid, status);
                return Ok(());
            }
            _ => {}
        }

        let Some(guard) = BusyGuard::acquire(&entry.starting) else {
            debug!("Ignoring start of instance {}: a start is in flight", uuid);
            return Ok(());
        };

        // A start that completed before we took the flag may have moved the status
        match entry.status() {
            InstanceStatus::Running => return Err(InstanceError::AlreadyRunning),
            status if status.is_transitional() => return Ok(()),
            _ => {}
        }

        info!("Starting instance {}", uuid);
        self.log(uuid, LogLineKind::AgentOut, "Starting instance...");

        let instance = entry.snapshot();
        let runner = match self.runner_for(&instance) {
            Ok(runner) => runner,
            Err(e) => {
                self.fail(&entry, format!("Failed to start instance: {}", e));
                return Err(e);
            }
        };

        if entry.stale.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.reset_workload(runner.as_ref(), &instance).await {
                entry.stale.store(true, Ordering::Release);
                self.fail(&entry, format!("Failed to start instance: {}", e));
                return Err(e);
            }
        }

        let observer: Arc<dyn RunObserver> = Arc::new(Observer {
            service: self.clone(),
            entry: Arc::clone(&entry),
        });

        let streams = match runner.start(&instance, &entry.dir, observer).await {
            Ok(streams) => streams,
            Err(e) => {
                self.fail(&entry, format!("Failed to start instance: {}", e));
                return Err(e.into());
            }
        };

        let stdout = tokio::spawn(pump(
            self.clone(),
            uuid,
            streams.stdout,
            LogLineKind::ProcessOut,
        ));
        let stderr = tokio::spawn(pump(
            self.clone(),
            uuid,
            streams.stderr,
            LogLineKind::ProcessErr,
        ));

        let started = streams
            .started
            .await
            .unwrap_or(Err(RunnerError::Aborted));

        // The start phase is over; stop and later starts may proceed
        drop(guard);

        if let Err(e) = started {
            let _ = tokio::join!(stdout, stderr);
            self.fail(&entry, format!("Failed to start instance: {}", e));
            return Err(e.into());
        }

        // Stream closure does not change the status: the runner reports exits
        let _ = tokio::join!(stdout, stderr);
        debug!("Output of instance {} closed", uuid);
        Ok(())
    }

    /// Stops a running instance
    ///
    /// On failure the instance goes back to `Running`.
    ///
    /// # Returns
    /// `Err(NotRunning)` if the instance is not running; no event is emitted
    pub async fn stop(&self, uuid: Uuid) -> Result<()> {
        let entry = self.entry(uuid)?;

        if entry.status() != InstanceStatus::Running {
            return Err(InstanceError::NotRunning);
        }

        let Some(_guard) = BusyGuard::acquire(&entry.stopping) else {
            debug!("Ignoring stop of instance {}: a stop is in flight", uuid);
            return Ok(());
        };

        if !self.set_status(&entry, InstanceStatus::Stopping) {
            return Err(InstanceError::NotRunning);
        }

        info!("Stopping instance {}", uuid);
        self.log(uuid, LogLineKind::AgentOut, "Stopping instance...");

        let instance = entry.snapshot();
        let result = match self.runner_for(&instance) {
            Ok(runner) => runner.stop(&instance).await.map_err(InstanceError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.set_status(&entry, InstanceStatus::Off);
                self.log(uuid, LogLineKind::AgentOut, "Instance stopped.");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to stop instance {}: {}", uuid, e);
                self.log(
                    uuid,
                    LogLineKind::AgentErr,
                    format!("Failed to stop instance: {}", e),
                );
                self.set_status(&entry, InstanceStatus::Running);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Installs a new instance of `service`
    ///
    /// Creates `<instances_dir>/<uuid>/` with the manifest and a default
    /// `.env`, then registers the instance in `Off`.
    pub async fn install(&self, service: Service) -> Result<Uuid> {
        let uuid = Uuid::new_v4();
        let dir = self.inner.instances_dir.join(uuid.to_string());

        tokio::fs::create_dir_all(dir.join(VERTEX_DIR)).await?;
        tokio::fs::write(service_file(&dir), serde_yaml::to_string(&service)?).await?;

        let instance = Instance::new(uuid, service);
        env::write(&dir, &instance.env).await?;

        let service_id = instance.service.id.clone();
        info!("Installed instance {} of service {}", uuid, service_id);

        self.register(instance, dir)?;
        self.inner.bus.dispatch(Event::InstanceCreated {
            instance_uuid: uuid,
            service_id,
        });
        self.inner.bus.dispatch(Event::InstancesChange);

        Ok(uuid)
    }

    /// Loads every instance found in the instances directory
    ///
    /// Instances that fail to load are skipped with a warning.
    ///
    /// # Returns
    /// The number of instances loaded
    pub async fn load_all(&self) -> Result<usize> {
        let dir = &self.inner.instances_dir;

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(dir).await?;
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            let Some(uuid) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };

            if self.contains(uuid) || !service_file(&path).is_file() {
                continue;
            }

            match self.load(uuid, path).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Failed to load instance {}: {}", uuid, e),
            }
        }

        info!("Loaded {} instance(s) from {}", loaded, dir.display());
        if loaded > 0 {
            self.inner.bus.dispatch(Event::InstancesChange);
        }
        Ok(loaded)
    }

    async fn load(&self, uuid: Uuid, dir: PathBuf) -> Result<()> {
        let yaml = tokio::fs::read_to_string(service_file(&dir)).await?;
        let service: Service = serde_yaml::from_str(&yaml)?;

        // Declared defaults fill in variables the saved env lacks
        let mut instance = Instance::new(uuid, service);
        instance.env.extend(env::read(&dir).await?);

        self.register(instance, dir)
    }

    fn register(&self, instance: Instance, dir: PathBuf) -> Result<()> {
        let uuid = instance.uuid;
        self.inner.logs.register(uuid, &dir)?;

        self.instances()
            .insert(uuid, Arc::new(InstanceEntry::new(instance, dir)));
        Ok(())
    }

    /// Deletes an instance, its workload and its directory
    ///
    /// # Returns
    /// * `Err(StillRunning)` unless the instance is `Off` or `Error`
    /// * `Err(Busy)` while a start is in flight
    pub async fn delete(&self, uuid: Uuid) -> Result<()> {
        let entry = self.entry(uuid)?;

        let Some(_guard) = BusyGuard::acquire(&entry.starting) else {
            return Err(InstanceError::Busy(uuid));
        };

        let instance = entry.snapshot();
        if !matches!(instance.status, InstanceStatus::Off | InstanceStatus::Error) {
            return Err(InstanceError::StillRunning(uuid, instance.status));
        }

        if let Ok(runner) = self.runner_for(&instance) {
            match runner.delete(&instance).await {
                Ok(()) => {}
                Err(e) if e.is_container_not_found() => {
                    debug!("Instance {} has no container to delete", uuid);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match tokio::fs::remove_dir_all(&entry.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.inner.logs.unregister(uuid) {
            debug!("{}", e);
        }
        self.instances().remove(&uuid);

        info!("Deleted instance {}", uuid);
        self.inner.bus.dispatch(Event::InstanceDeleted {
            instance_uuid: uuid,
            service_id: instance.service.id,
        });
        self.inner.bus.dispatch(Event::InstancesChange);

        Ok(())
    }

    /// Replaces the env of an instance and persists it to `.env`
    ///
    /// The workload is recreated with the new values: immediately when the
    /// instance is stopped, otherwise on its next start.
    pub async fn save_env(&self, uuid: Uuid, env: EnvVariables) -> Result<()> {
        let entry = self.entry(uuid)?;

        let Some(_guard) = BusyGuard::acquire(&entry.starting) else {
            return Err(InstanceError::Busy(uuid));
        };

        env::write(&entry.dir, &env).await?;

        let instance = {
            let mut state = entry.lock();
            state.env = env;
            state.clone()
        };

        if !matches!(instance.status, InstanceStatus::Off | InstanceStatus::Error) {
            // The live workload keeps its old env until the next start
            entry.stale.store(true, Ordering::Release);
        } else if let Ok(runner) = self.runner_for(&instance) {
            if let Err(e) = self.reset_workload(runner.as_ref(), &instance).await {
                warn!("Failed to reset workload of instance {}: {}", uuid, e);
                entry.stale.store(true, Ordering::Release);
            }
        }

        self.inner.bus.dispatch(Event::InstancesChange);
        Ok(())
    }

    /// Checks whether a newer image exists and records the result
    ///
    /// A failed check leaves the status untouched.
    pub async fn check_for_updates(&self, uuid: Uuid) -> Result<Option<InstanceUpdate>> {
        let entry = self.entry(uuid)?;
        let instance = entry.snapshot();

        let runner = self.runner_for(&instance)?;
        let update = runner.check_for_updates(&instance).await?;

        entry.lock().update = update.clone();
        self.inner.bus.dispatch(Event::InstancesChange);

        Ok(update)
    }

    pub async fn info(&self, uuid: Uuid) -> Result<RunnerInfo> {
        let instance = self.get(uuid)?;
        let runner = self.runner_for(&instance)?;
        Ok(runner.info(&instance).await?)
    }

    /// Snapshot of an instance
    pub fn get(&self, uuid: Uuid) -> Result<Instance> {
        Ok(self.entry(uuid)?.snapshot())
    }

    /// Snapshots of every instance, sorted by name
    pub fn list(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self
            .inner
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.snapshot())
            .collect();

        instances.sort_by(|a, b| a.name().cmp(b.name()).then(a.uuid.cmp(&b.uuid)));
        instances
    }

    /// Latest buffered log lines of an instance, oldest first
    pub fn latest_logs(&self, uuid: Uuid) -> Result<Vec<LogLine>> {
        Ok(self.inner.logs.latest(uuid)?)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.inner
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&uuid)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn instances(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<InstanceEntry>>> {
        self.inner
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, uuid: Uuid) -> Result<Arc<InstanceEntry>> {
        self.inner
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uuid)
            .cloned()
            .ok_or(InstanceError::NotFound(uuid))
    }

    /// Deletes the workload of a stopped instance so the next start recreates it
    async fn reset_workload(&self, runner: &dyn Runner, instance: &Instance) -> Result<()> {
        match runner.delete(instance).await {
            Ok(()) => {
                debug!("Workload of instance {} reset after env change", instance.uuid);
                Ok(())
            }
            Err(e) if e.is_container_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn runner_for(&self, instance: &Instance) -> Result<Arc<dyn Runner>> {
        let methods = &instance.service.methods;

        if methods.docker.is_some() {
            Ok(Arc::clone(&self.inner.docker))
        } else if methods.script.is_some() {
            Ok(Arc::clone(&self.inner.script))
        } else {
            Err(InstanceError::Manifest(format!(
                "service {} declares neither a docker nor a script method",
                instance.service.id
            )))
        }
    }

    /// Moves an instance to `status` and publishes the change
    ///
    /// Repeated and illegal transitions are dropped.
    ///
    /// # Returns
    /// `true` if the status changed
    pub(super) fn set_status(&self, entry: &InstanceEntry, status: InstanceStatus) -> bool {
        let _order = entry
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (service_id, name) = {
            let mut instance = entry.lock();
            let current = instance.status;

            if current == status {
                return false;
            }
            if !current.can_transition_to(status) {
                warn!(
                    "Ignoring transition of instance {} from {} to {}",
                    entry.uuid, current, status
                );
                return false;
            }

            instance.status = status;
            (instance.service.id.clone(), instance.service.name.clone())
        };

        info!("Instance {} is now {}", entry.uuid, status);
        self.inner.bus.dispatch(Event::StatusChange {
            instance_uuid: entry.uuid,
            service_id,
            name,
            status,
        });
        true
    }

    /// Appends a line to the instance logger and publishes it
    pub(super) fn log(&self, uuid: Uuid, kind: LogLineKind, message: impl Into<LogMessage>) {
        let message = message.into();

        if let Err(e) = self.inner.logs.push(uuid, kind, message.clone()) {
            debug!("{}", e);
        }

        self.inner.bus.dispatch(Event::Log {
            instance_uuid: uuid,
            kind,
            message,
        });
    }

    /// Records a failure: an error line followed by the `Error` status
    fn fail(&self, entry: &InstanceEntry, message: String) {
        warn!("Instance {}: {}", entry.uuid, message);
        self.log(entry.uuid, LogLineKind::AgentErr, message);
        self.set_status(entry, InstanceStatus::Error);
    }
}

fn service_file(dir: &Path) -> PathBuf {
    dir.join(VERTEX_DIR).join(SERVICE_FILE)
}

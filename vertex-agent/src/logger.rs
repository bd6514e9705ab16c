//! Instance logger
//!
//! Every instance gets a bounded ring buffer of its most recent lines, used
//! for "latest output" queries, and a date-stamped file under
//! `<instance>/.vertex/logs/` that keeps the full history. A daily task
//! swaps the file at local midnight.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vertex_core::domain::log::{LogLine, LogLineKind, LogMessage};

/// Lines kept in memory per instance
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("No logger registered for instance {0}")]
    NotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LoggerError>;

// =============================================================================
// Ring Buffer
// =============================================================================

/// Fixed-capacity FIFO that evicts its oldest entry when full
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer (capacity is at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an item, returning the evicted one if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

// =============================================================================
// Instance Logger
// =============================================================================

struct LoggerState {
    buffer: RingBuffer<LogLine>,
    file: File,
    date: NaiveDate,
    next_id: u64,
}

/// Ring buffer and rotating file sink for one instance
pub struct InstanceLogger {
    uuid: Uuid,
    logs_dir: PathBuf,
    state: Mutex<LoggerState>,
    rotation: Mutex<Option<JoinHandle<()>>>,
}

impl InstanceLogger {
    /// Opens the logger of the instance stored in `instance_dir`
    ///
    /// # Arguments
    /// * `uuid` - Instance the logger belongs to
    /// * `instance_dir` - Instance directory; files go to `.vertex/logs/`
    /// * `capacity` - Lines kept in memory
    pub fn open(uuid: Uuid, instance_dir: &Path, capacity: usize) -> Result<Self> {
        let logs_dir = instance_dir.join(".vertex").join("logs");
        std::fs::create_dir_all(&logs_dir)?;

        let date = Local::now().date_naive();
        let file = open_log_file(&logs_dir, date)?;

        Ok(Self {
            uuid,
            logs_dir,
            state: Mutex::new(LoggerState {
                buffer: RingBuffer::new(capacity),
                file,
                date,
                next_id: 0,
            }),
            rotation: Mutex::new(None),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Path of the file currently written to
    pub fn current_file(&self) -> PathBuf {
        log_file_path(&self.logs_dir, self.lock_state().date)
    }

    /// Appends a line to the buffer and the file
    ///
    /// File errors are logged and do not fail the push: the in-memory copy
    /// is always kept.
    pub fn push(&self, kind: LogLineKind, message: impl Into<LogMessage>) -> LogLine {
        let mut state = self.lock_state();

        let line = LogLine {
            id: state.next_id,
            kind,
            message: message.into(),
        };
        state.next_id += 1;

        // Blocking write under the state lock: file order matches id order.
        // Lines are short and local, so async callers are held only briefly.
        if let Err(e) = write_line(&mut state.file, &line.message) {
            warn!("Failed to write log line for instance {}: {}", self.uuid, e);
        }

        state.buffer.push(line.clone());
        line
    }

    /// Buffered lines from oldest to newest
    pub fn latest(&self) -> Vec<LogLine> {
        self.lock_state().buffer.iter().cloned().collect()
    }

    /// Switches to the file of the current local date
    pub fn rotate(&self) -> Result<()> {
        self.rotate_to(Local::now().date_naive())
    }

    fn rotate_to(&self, date: NaiveDate) -> Result<()> {
        let file = open_log_file(&self.logs_dir, date)?;

        let mut state = self.lock_state();
        if let Err(e) = state.file.flush() {
            warn!("Failed to flush log file for instance {}: {}", self.uuid, e);
        }
        state.file = file;
        state.date = date;

        debug!(
            "Instance {} now logging to {}",
            self.uuid,
            log_file_path(&self.logs_dir, date).display()
        );
        Ok(())
    }

    /// Arms the daily rotation task, replacing any previous one
    ///
    /// The task holds a weak reference and ends by itself once the logger
    /// is dropped.
    pub fn start_rotation(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                let delay = until_next_midnight(Local::now().naive_local());
                tokio::time::sleep(delay).await;

                let Some(logger) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = logger.rotate() {
                    error!("Failed to rotate logs of instance {}: {}", logger.uuid, e);
                }
            }
        });

        let previous = self.lock_rotation().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancels the rotation task
    ///
    /// # Returns
    /// `false` if no task was armed
    pub fn stop_rotation(&self) -> bool {
        match self.lock_rotation().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_rotating(&self) -> bool {
        self.lock_rotation().is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_rotation(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.rotation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InstanceLogger {
    fn drop(&mut self) {
        self.stop_rotation();
    }
}

fn log_file_path(logs_dir: &Path, date: NaiveDate) -> PathBuf {
    logs_dir.join(format!("logs_{}.txt", date.format("%Y-%m-%d")))
}

fn open_log_file(logs_dir: &Path, date: NaiveDate) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(logs_dir, date))
}

/// Writes every physical line of `message`, each newline-terminated
fn write_line(file: &mut File, message: &LogMessage) -> std::io::Result<()> {
    let text = message.to_string();
    let mut out = String::with_capacity(text.len() + 1);

    for line in text.lines() {
        out.push_str(line);
        out.push('\n');
    }
    if out.is_empty() {
        out.push('\n');
    }

    file.write_all(out.as_bytes())
}

/// Time left until the next local midnight
pub fn until_next_midnight(now: NaiveDateTime) -> Duration {
    let next = now
        .date()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0));

    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
        // Past the last representable date; check again in a day
        None => Duration::from_secs(24 * 60 * 60),
    }
}

// =============================================================================
// Registry
// =============================================================================

/// UUID-keyed owner of every instance logger
pub struct LoggerRegistry {
    loggers: RwLock<HashMap<Uuid, Arc<InstanceLogger>>>,
    capacity: usize,
}

impl LoggerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            loggers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Opens and registers the logger of an instance, arming its rotation
    ///
    /// Registering an instance twice returns the existing logger.
    pub fn register(&self, uuid: Uuid, instance_dir: &Path) -> Result<Arc<InstanceLogger>> {
        if let Some(existing) = self.get(uuid) {
            return Ok(existing);
        }

        let logger = Arc::new(InstanceLogger::open(uuid, instance_dir, self.capacity)?);

        let mut loggers = self.loggers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = loggers.get(&uuid) {
            return Ok(Arc::clone(existing));
        }

        logger.start_rotation();
        loggers.insert(uuid, Arc::clone(&logger));

        info!("Logger registered for instance {}", uuid);
        Ok(logger)
    }

    /// Removes a logger and cancels its rotation
    ///
    /// Fails with [`LoggerError::NotFound`] if the instance has no logger,
    /// so a duplicate call is harmless.
    pub fn unregister(&self, uuid: Uuid) -> Result<()> {
        let removed = self
            .loggers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&uuid)
            .ok_or(LoggerError::NotFound(uuid))?;

        removed.stop_rotation();
        info!("Logger unregistered for instance {}", uuid);
        Ok(())
    }

    pub fn get(&self, uuid: Uuid) -> Option<Arc<InstanceLogger>> {
        self.loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uuid)
            .cloned()
    }

    pub fn push(
        &self,
        uuid: Uuid,
        kind: LogLineKind,
        message: impl Into<LogMessage>,
    ) -> Result<LogLine> {
        let logger = self.get(uuid).ok_or(LoggerError::NotFound(uuid))?;
        Ok(logger.push(kind, message))
    }

    pub fn latest(&self, uuid: Uuid) -> Result<Vec<LogLine>> {
        let logger = self.get(uuid).ok_or(LoggerError::NotFound(uuid))?;
        Ok(logger.latest())
    }
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

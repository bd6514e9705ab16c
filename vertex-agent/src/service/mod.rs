//! Service layer
//!
//! The lifecycle service owns the authoritative state of every instance.
//! It serializes start/stop requests per instance, delegates the work to a
//! runner and forwards everything the workload prints to the logger and
//! the event bus.

mod error;
mod lifecycle;
mod output;

pub use error::{InstanceError, Result};
pub use lifecycle::InstanceService;
pub use output::DOWNLOAD_MARKER;

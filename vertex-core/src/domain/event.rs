//! Event types broadcast on the agent's event bus
//!
//! Events are immutable values copied to every listener. New variants are a
//! compile-time checked addition: listeners match exhaustively.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::instance::InstanceStatus;
use crate::domain::log::{LogLineKind, LogMessage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An instance moved along its state machine
    StatusChange {
        instance_uuid: Uuid,
        service_id: String,
        name: String,
        status: InstanceStatus,
    },
    /// A line of output for an instance
    Log {
        instance_uuid: Uuid,
        kind: LogLineKind,
        message: LogMessage,
    },
    /// The set of instances or one of their properties changed
    InstancesChange,
    InstanceCreated {
        instance_uuid: Uuid,
        service_id: String,
    },
    InstanceDeleted {
        instance_uuid: Uuid,
        service_id: String,
    },
}

impl Event {
    /// The instance this event is about, if any
    pub fn instance_uuid(&self) -> Option<Uuid> {
        match self {
            Event::StatusChange { instance_uuid, .. }
            | Event::Log { instance_uuid, .. }
            | Event::InstanceCreated { instance_uuid, .. }
            | Event::InstanceDeleted { instance_uuid, .. } => Some(*instance_uuid),
            Event::InstancesChange => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let uuid = Uuid::new_v4();
        let event = Event::StatusChange {
            instance_uuid: uuid,
            service_id: "redis".to_string(),
            name: "Redis".to_string(),
            status: InstanceStatus::Running,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_change");
        assert_eq!(json["status"], "running");
        assert_eq!(event.instance_uuid(), Some(uuid));
    }

    #[test]
    fn test_instances_change_has_no_instance() {
        assert_eq!(Event::InstancesChange.instance_uuid(), None);
    }
}

//! Instance domain types
//!
//! An instance is one manifest-described workload: a single Docker
//! container or OS process, identified by a UUID.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::service::Service;

/// Environment of an instance, persisted to `<instance>/.env`
pub type EnvVariables = BTreeMap<String, String>;

/// An installed instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: Uuid,
    pub service: Service,
    pub env: EnvVariables,
    pub status: InstanceStatus,
    /// Populated by a check-for-updates pass, cleared once versions match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<InstanceUpdate>,
}

impl Instance {
    /// Creates an instance in the `Off` state with the manifest's default env
    pub fn new(uuid: Uuid, service: Service) -> Self {
        let env = service.default_env();
        Self {
            uuid,
            service,
            env,
            status: InstanceStatus::Off,
            update: None,
        }
    }

    /// Display name of the instance
    pub fn name(&self) -> &str {
        &self.service.name
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }
}

/// Lifecycle state of an instance
///
/// ```text
/// Off -> Building -> Running | Error
/// Running -> Stopping -> Off
/// Running -> Off          (workload exited on its own)
/// Stopping -> Running     (stop failed)
/// Error -> Building       (restart after failure)
/// *  -> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Off,
    Building,
    Running,
    Stopping,
    Error,
}

impl InstanceStatus {
    /// Whether moving from `self` to `next` follows an edge of the state machine
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;

        matches!(
            (self, next),
            (Off, Building)
                | (Error, Building)
                | (Building, Running)
                | (Running, Stopping)
                | (Running, Off)
                | (Stopping, Off)
                | (Stopping, Running)
                | (_, Error)
        ) && self != next
    }

    /// States from which `start` is accepted
    pub fn can_start(self) -> bool {
        matches!(self, InstanceStatus::Off | InstanceStatus::Error)
    }

    /// Transitional states during which the instance is busy
    pub fn is_transitional(self) -> bool {
        matches!(self, InstanceStatus::Building | InstanceStatus::Stopping)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Off => write!(f, "off"),
            InstanceStatus::Building => write!(f, "building"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopping => write!(f, "stopping"),
            InstanceStatus::Error => write!(f, "error"),
        }
    }
}

/// Version pair recorded when a newer image is available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceUpdate {
    pub current_version: String,
    pub latest_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceStatus::*;

    #[test]
    fn test_start_edges() {
        assert!(Off.can_transition_to(Building));
        assert!(Error.can_transition_to(Building));
        assert!(Building.can_transition_to(Running));
        assert!(Building.can_transition_to(Error));
    }

    #[test]
    fn test_off_never_jumps_to_running() {
        assert!(!Off.can_transition_to(Running));
        assert!(!Off.can_transition_to(Stopping));
    }

    #[test]
    fn test_stop_edges() {
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Off));
        assert!(Stopping.can_transition_to(Running));
        assert!(Running.can_transition_to(Off));
        assert!(!Building.can_transition_to(Stopping));
    }

    #[test]
    fn test_same_status_is_not_a_transition() {
        for status in [Off, Building, Running, Stopping, Error] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_any_state_can_fail() {
        for status in [Off, Building, Running, Stopping] {
            assert!(status.can_transition_to(Error));
        }
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(Running.to_string(), "running");
    }

    #[test]
    fn test_new_instance_is_off() {
        let instance = Instance::new(Uuid::new_v4(), Service::default());
        assert_eq!(instance.status, Off);
        assert!(instance.update.is_none());
        assert!(!instance.is_running());
    }
}

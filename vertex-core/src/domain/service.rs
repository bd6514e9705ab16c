//! Service manifest types
//!
//! A service manifest (`.vertex/service.yml`) describes how to build and run
//! an instance. It is immutable for a given service version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declarative description of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Environment variables the service expects
    #[serde(default)]
    pub env: Vec<EnvDefinition>,
    #[serde(default)]
    pub methods: ServiceMethods,
}

impl Service {
    /// Default environment derived from the declared variables
    ///
    /// Variables without a default are present with an empty value so that
    /// the `.env` file always lists every declared key.
    pub fn default_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|def| (def.name.clone(), def.default.clone().unwrap_or_default()))
            .collect()
    }
}

/// Declaration of a single environment variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvDefinition {
    /// Value type hint for UIs (e.g. "port", "string", "url")
    #[serde(rename = "type", default)]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub secret: bool,
}

/// Ways a service can be run
///
/// When both are declared, Docker takes precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMethods {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptMethod>,
}

/// Container-backed run method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerMethod {
    /// Base image to pull, e.g. `redis:7`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Dockerfile path relative to the instance directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Container port (`6379` or `6379/udp`) -> name of the env variable holding the host port
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    /// Host path (relative to `volumes/` unless absolute) -> container path
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    /// Manifest env variable name -> name inside the container
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub sysctls: BTreeMap<String, String>,
}

/// How the image of a Docker instance is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMethod<'a> {
    Image(&'a str),
    Dockerfile(&'a str),
}

impl DockerMethod {
    /// Returns the build method, preferring a Dockerfile over a base image
    pub fn build_method(&self) -> Option<BuildMethod<'_>> {
        if let Some(dockerfile) = self.dockerfile.as_deref() {
            return Some(BuildMethod::Dockerfile(dockerfile));
        }
        self.image.as_deref().map(BuildMethod::Image)
    }
}

/// Process-backed run method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptMethod {
    /// Executable relative to the instance directory
    pub filename: String,
    /// Binaries expected on the host PATH
    #[serde(default)]
    pub dependencies: Vec<String>,
}

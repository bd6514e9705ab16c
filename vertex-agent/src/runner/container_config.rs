//! Manifest to container translation
//!
//! Builds the create-container request of a Docker instance from its
//! manifest and env.

use std::collections::BTreeMap;
use std::path::{Component, Path};
use uuid::Uuid;
use vertex_core::domain::instance::Instance;
use vertex_core::domain::service::DockerMethod;
use vertex_core::dto::docker::{CreateContainerRequest, PortBinding};

use super::{Result, RunnerError};

const PROTOCOLS: [&str; 3] = ["tcp", "udp", "sctp"];

/// Deterministic container name of an instance
pub fn container_name(uuid: Uuid) -> String {
    format!("VERTEX_CONTAINER_{}", uuid)
}

/// Tag given to images built from an instance's Dockerfile
pub fn image_name(uuid: Uuid) -> String {
    format!("vertex_image_{}", uuid)
}

/// Builds the create-container request for `instance`
///
/// # Arguments
/// * `instance` - Instance whose env provides host ports and variable values
/// * `dir` - Instance directory; relative volumes live under `<dir>/volumes`
/// * `method` - Docker method of the manifest
/// * `image` - Image to run (pulled reference or built tag)
pub fn create_request(
    instance: &Instance,
    dir: &Path,
    method: &DockerMethod,
    image: &str,
) -> Result<CreateContainerRequest> {
    let (exposed_ports, port_bindings) = ports(instance, method)?;

    Ok(CreateContainerRequest {
        image: image.to_string(),
        exposed_ports,
        port_bindings,
        binds: binds(dir, method)?,
        env: environment(instance, method),
        cap_add: method.capabilities.clone(),
        sysctls: method.sysctls.clone(),
        container_name: container_name(instance.uuid),
    })
}

/// Translates `container port -> env variable` entries into exposed ports and
/// bindings, reading host ports from the instance env
fn ports(
    instance: &Instance,
    method: &DockerMethod,
) -> Result<(Vec<String>, BTreeMap<String, Vec<PortBinding>>)> {
    let mut exposed = Vec::new();
    let mut bindings = BTreeMap::new();

    for (spec, var) in &method.ports {
        let malformed = |reason: String| RunnerError::MalformedPort {
            port: spec.clone(),
            reason,
        };

        let (number, protocol) = spec.split_once('/').unwrap_or((spec.as_str(), "tcp"));

        number
            .trim()
            .parse::<u16>()
            .map_err(|_| malformed(format!("'{}' is not a port number", number)))?;

        if !PROTOCOLS.contains(&protocol) {
            return Err(malformed(format!("unknown protocol '{}'", protocol)));
        }

        let host_port = instance
            .env
            .get(var)
            .ok_or_else(|| malformed(format!("env variable {} is not set", var)))?;

        host_port.trim().parse::<u16>().map_err(|_| {
            malformed(format!(
                "host port '{}' from {} is not a port number",
                host_port, var
            ))
        })?;

        let key = format!("{}/{}", number.trim(), protocol);
        exposed.push(key.clone());
        bindings.insert(
            key,
            vec![PortBinding {
                host_ip: String::new(),
                host_port: host_port.trim().to_string(),
            }],
        );
    }

    Ok((exposed, bindings))
}

/// Resolves `host -> container` volume entries into bind mounts
fn binds(dir: &Path, method: &DockerMethod) -> Result<Vec<String>> {
    let volumes_dir = dir.join("volumes");

    method
        .volumes
        .iter()
        .map(|(source, target)| {
            let malformed = |reason: &str| RunnerError::MalformedVolume {
                volume: format!("{}:{}", source, target),
                reason: reason.to_string(),
            };

            if source.trim().is_empty() {
                return Err(malformed("host path is empty"));
            }
            if !target.starts_with('/') {
                return Err(malformed("container path must be absolute"));
            }

            let source_path = Path::new(source);
            let host = if source_path.is_absolute() {
                source_path.to_path_buf()
            } else {
                if source_path
                    .components()
                    .any(|c| matches!(c, Component::ParentDir))
                {
                    return Err(malformed("relative host path leaves the volumes directory"));
                }
                volumes_dir.join(source_path)
            };

            Ok(format!("{}:{}", host.display(), target))
        })
        .collect()
}

/// Maps manifest variables onto their container-internal names
///
/// Variables missing from the instance env are skipped.
fn environment(instance: &Instance, method: &DockerMethod) -> Vec<String> {
    method
        .environment
        .iter()
        .filter_map(|(var, container_var)| {
            instance
                .env
                .get(var)
                .map(|value| format!("{}={}", container_var, value))
        })
        .collect()
}

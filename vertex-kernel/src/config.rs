//! Kernel configuration

use std::net::SocketAddr;

/// Kernel configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the API listens on; must stay on loopback
    pub addr: String,

    /// Docker CLI binary
    pub docker_bin: String,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - VERTEX_KERNEL_ADDR (optional, default: 127.0.0.1:6131)
    /// - VERTEX_DOCKER_BIN (optional, default: docker)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            addr: std::env::var("VERTEX_KERNEL_ADDR").unwrap_or(defaults.addr),
            docker_bin: std::env::var("VERTEX_DOCKER_BIN").unwrap_or(defaults.docker_bin),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<SocketAddr> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid kernel address '{}': {}", self.addr, e))?;

        if !addr.ip().is_loopback() {
            anyhow::bail!("kernel address must be a loopback address, got {}", addr);
        }

        if self.docker_bin.is_empty() {
            anyhow::bail!("docker_bin cannot be empty");
        }

        Ok(addr)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6131".to_string(),
            docker_bin: "docker".to_string(),
        }
    }
}

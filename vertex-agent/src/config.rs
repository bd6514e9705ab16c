//! Agent configuration
//!
//! Settings for the instances directory, the kernel connection and the
//! in-memory limits of the logger and event bus.

use std::path::PathBuf;

use crate::bus::DEFAULT_MAX_ROUNDS;
use crate::logger::DEFAULT_BUFFER_CAPACITY;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the agent's data; instances live under `<data_dir>/instances`
    pub data_dir: PathBuf,

    /// Kernel base URL (e.g., "http://127.0.0.1:6131")
    pub kernel_url: String,

    /// Lines kept in memory per instance
    pub log_buffer_size: usize,

    /// Maximum notification rounds per bus dispatch
    pub dispatch_rounds: usize,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(data_dir: impl Into<PathBuf>, kernel_url: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            kernel_url: kernel_url.into(),
            log_buffer_size: DEFAULT_BUFFER_CAPACITY,
            dispatch_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - VERTEX_DATA_DIR (optional, default: ./live)
    /// - VERTEX_KERNEL_URL (optional, default: http://127.0.0.1:6131)
    /// - VERTEX_LOG_BUFFER_SIZE (optional, default: 50)
    /// - VERTEX_DISPATCH_ROUNDS (optional, default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("VERTEX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let kernel_url = std::env::var("VERTEX_KERNEL_URL").unwrap_or(defaults.kernel_url);

        let log_buffer_size = std::env::var("VERTEX_LOG_BUFFER_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.log_buffer_size);

        let dispatch_rounds = std::env::var("VERTEX_DISPATCH_ROUNDS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.dispatch_rounds);

        Self {
            data_dir,
            kernel_url,
            log_buffer_size,
            dispatch_rounds,
        }
    }

    /// Directory holding one sub-directory per instance
    pub fn instances_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("data_dir cannot be empty");
        }

        if !self.kernel_url.starts_with("http://") && !self.kernel_url.starts_with("https://") {
            anyhow::bail!("kernel_url must start with http:// or https://");
        }

        if self.log_buffer_size == 0 {
            anyhow::bail!("log_buffer_size must be greater than 0");
        }

        if self.dispatch_rounds == 0 {
            anyhow::bail!("dispatch_rounds must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("live", "http://127.0.0.1:6131")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_buffer_size, 50);
        assert_eq!(config.dispatch_rounds, 10);
        assert_eq!(config.instances_dir(), PathBuf::from("live/instances"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.kernel_url = "127.0.0.1:6131".to_string();
        assert!(config.validate().is_err());

        config.kernel_url = "http://127.0.0.1:6131".to_string();
        config.log_buffer_size = 0;
        assert!(config.validate().is_err());

        config.log_buffer_size = 50;
        config.dispatch_rounds = 0;
        assert!(config.validate().is_err());
    }
}

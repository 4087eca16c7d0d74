// Configuration management
// Handles quince.toml loading, defaults, and validation

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Server configuration.
///
/// The timeout governs three things at once: the per-operation socket
/// deadline, the idle-expiration threshold, and the expirer's sweep
/// period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session timeout in nanoseconds.
    #[serde(default = "default_timeout_ns")]
    pub timeout_ns: u64,

    /// Maximum number of connections held open at once.
    #[serde(default = "default_fd_limit")]
    pub fd_limit: usize,
}

// Default value functions
fn default_timeout_ns() -> u64 {
    5_000_000_000 // 5 s
}

fn default_fd_limit() -> usize {
    200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ns: default_timeout_ns(),
            fd_limit: default_fd_limit(),
        }
    }
}

impl Config {
    /// Smallest accepted timeout, in nanoseconds.
    pub const MIN_TIMEOUT_NS: u64 = 2;

    /// The timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_ns)
    }

    /// Convenience constructor from a `Duration`.
    pub fn with_timeout(timeout: Duration, fd_limit: usize) -> Self {
        Self {
            timeout_ns: timeout.as_nanos() as u64,
            fd_limit,
        }
    }

    /// Load configuration from a toml file, or fall back to defaults when
    /// the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let contents = std::fs::read_to_string(path)
                .context("Failed to read configuration file")?;

            let config: Config =
                toml::from_str(&contents).context("Failed to parse configuration file")?;

            config.validate()?;
            Ok(config)
        } else {
            warn!("Configuration file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ns < Self::MIN_TIMEOUT_NS {
            anyhow::bail!(
                "Timeout must be at least {} ns, got {}",
                Self::MIN_TIMEOUT_NS,
                self.timeout_ns
            );
        }

        if self.fd_limit == 0 {
            anyhow::bail!("FD limit must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timeout_ns, 5_000_000_000);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.fd_limit, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_timeout() {
        let mut config = Config::default();
        config.timeout_ns = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_fd_limit() {
        let mut config = Config::default();
        config.fd_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/definitely/not/here/quince.toml").unwrap();
        assert_eq!(config.fd_limit, 200);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quince.toml");
        std::fs::write(&path, "fd_limit = 32\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.fd_limit, 32);
        assert_eq!(config.timeout_ns, 5_000_000_000);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quince.toml");
        std::fs::write(&path, "timeout_ns = 1\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}

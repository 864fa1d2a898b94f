//! Coordinator configuration.
//!
//! A single source of truth for runtime options, with sensible defaults and
//! validation. Values come from CLI flags or `MADRONE_*` environment
//! variables (wired up in `main`); tests construct the struct directly.

use std::path::PathBuf;
use std::time::Duration;

use snafu::Snafu;

/// Default listen port for the coordinator.
pub const DEFAULT_PORT: u16 = 7320;

/// Default session lease duration in milliseconds.
pub const DEFAULT_LEASE_INTERVAL_MS: u64 = 20_000;

/// Default keep-alive (and expiry sweep) period in milliseconds.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 10_000;

/// Configuration validation errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("invalid value for {key}: {reason}"))]
    InvalidValue { key: String, reason: String },
}

/// Runtime configuration for a coordinator instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory hosting the namespace. Required; the process takes an
    /// exclusive advisory lock on it at startup.
    pub base_dir: PathBuf,
    /// UDP listen port.
    pub port: u16,
    /// Session lease duration.
    pub lease_interval: Duration,
    /// Keep-alive period; also the expiry sweep period.
    pub keepalive_interval: Duration,
    /// Raise the default log filter to debug.
    pub verbose: bool,
}

impl Config {
    /// Create a configuration with defaults for everything but the base
    /// directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            port: DEFAULT_PORT,
            lease_interval: Duration::from_millis(DEFAULT_LEASE_INTERVAL_MS),
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
            verbose: false,
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "base_dir".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.lease_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "lease_interval".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "keepalive_interval".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        // Clients renew on the keep-alive period; a period longer than the
        // lease would expire every well-behaved session.
        if self.keepalive_interval > self.lease_interval {
            return Err(ConfigError::InvalidValue {
                key: "keepalive_interval".to_string(),
                reason: format!(
                    "must not exceed the lease interval ({} ms)",
                    self.lease_interval.as_millis()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::new("/tmp/madrone").validate().is_ok());
    }

    #[test]
    fn keepalive_longer_than_lease_rejected() {
        let mut config = Config::new("/tmp/madrone");
        config.lease_interval = Duration::from_millis(1_000);
        config.keepalive_interval = Duration::from_millis(5_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_base_dir_rejected() {
        assert!(Config::new("").validate().is_err());
    }

    #[test]
    fn zero_intervals_rejected() {
        let mut config = Config::new("/tmp/madrone");
        config.lease_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::new("/tmp/madrone");
        config.keepalive_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}

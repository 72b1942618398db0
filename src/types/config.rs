//! Configuration structures.
//!
//! Configuration is plain data with serde derives; embedders construct it
//! directly or deserialize it from a config file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Kernel timing configuration.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Kernel timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Timeout applied to process stops during global shutdown and
    /// fire-and-forget process teardown.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// A process stop exceeding this duration is logged as a slow-shutdown
    /// warning.
    #[serde(with = "humantime_serde")]
    pub slow_stop_warning: Duration,

    /// Re-arm interval for service directory waits; each elapsed interval
    /// logs a warning and resets the deadline.
    #[serde(with = "humantime_serde")]
    pub directory_wait_interval: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            slow_stop_warning: Duration::from_secs(1),
            directory_wait_interval: Duration::from_secs(10),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = KernelConfig::default();
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.slow_stop_warning, Duration::from_secs(1));
        assert_eq!(config.directory_wait_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kernel.shutdown_timeout, config.kernel.shutdown_timeout);
        assert_eq!(parsed.observability.log_level, config.observability.log_level);
    }
}

//! Configuration system using Figment.
//!
//! Configuration is loaded from a TOML file merged with environment
//! variables prefixed with `PLC_LOGGER_`, then validated semantically.
//! Duration fields accept humantime strings ("60s", "1h").
//!
//! # Example
//! ```no_run
//! use plc_logger::config::LoggerConfig;
//!
//! # fn main() -> Result<(), plc_logger::error::LoggerError> {
//! let config = LoggerConfig::load_from("config/plc_logger.toml")?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::Device;
use crate::error::{AppResult, LoggerError};

/// Top-level logger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Application-level settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition loop settings.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Storage and retention settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Controllers to poll.
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Path of the known-device sidecar file.
    #[serde(default = "default_device_info_path")]
    pub device_info_path: PathBuf,
}

/// Acquisition loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Time between poll cycles.
    #[serde(with = "humantime_serde", default = "default_sample_interval")]
    pub sample_interval: Duration,
    /// Points per protocol read request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retry attempts per device per cycle.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for the linear per-device retry backoff.
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,
    /// Connect timeout for new protocol clients.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Capacity of the in-memory sample history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Consecutive cycle failures that trip the circuit breaker.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Base delay for the exponential cycle-error backoff.
    #[serde(with = "humantime_serde", default = "default_error_delay")]
    pub error_delay: Duration,
}

/// Storage and retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local fallback directory when no removable volume qualifies.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    /// Time before a forced file rotation.
    #[serde(with = "humantime_serde", default = "default_save_interval")]
    pub save_interval: Duration,
    /// Active file size that forces rotation.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Buffered rows that trigger a flush.
    #[serde(default = "default_flush_rows")]
    pub flush_rows: usize,
    /// Elapsed time since the last flush that triggers one.
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,
    /// Age after which raw files are compressed and compressed files deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Minimum free space a removable volume must offer to be selected.
    #[serde(default = "default_min_free_space_bytes")]
    pub min_free_space_bytes: u64,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_info_path() -> PathBuf {
    PathBuf::from("device_info.json")
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_history_limit() -> usize {
    1000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_error_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_save_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_flush_rows() -> usize {
    10
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retention_days() -> u32 {
    30
}

fn default_min_free_space_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device_info_path: default_device_info_path(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            connect_timeout: default_connect_timeout(),
            history_limit: default_history_limit(),
            max_consecutive_errors: default_max_consecutive_errors(),
            error_delay: default_error_delay(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            save_interval: default_save_interval(),
            max_file_bytes: default_max_file_bytes(),
            flush_rows: default_flush_rows(),
            flush_interval: default_flush_interval(),
            retention_days: default_retention_days(),
            min_free_space_bytes: default_min_free_space_bytes(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            acquisition: AcquisitionConfig::default(),
            storage: StorageConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl LoggerConfig {
    /// Load configuration from a TOML file merged with `PLC_LOGGER_` env vars.
    ///
    /// Example override: `PLC_LOGGER_APPLICATION_LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PLC_LOGGER_").split("_"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(LoggerError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.sample_interval.is_zero() {
            return Err(LoggerError::Configuration(
                "sample_interval must be non-zero".to_string(),
            ));
        }

        if self.acquisition.batch_size == 0 {
            return Err(LoggerError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if self.acquisition.history_limit == 0 {
            return Err(LoggerError::Configuration(
                "history_limit must be at least 1".to_string(),
            ));
        }

        if self.storage.flush_rows == 0 {
            return Err(LoggerError::Configuration(
                "flush_rows must be at least 1".to_string(),
            ));
        }

        let mut addresses = std::collections::HashSet::new();
        for device in &self.devices {
            if !addresses.insert(&device.address) {
                return Err(LoggerError::Configuration(format!(
                    "Duplicate device address: {}",
                    device.address
                )));
            }
            if device.points.is_empty() {
                return Err(LoggerError::Configuration(format!(
                    "Device {} has no points configured",
                    device.address
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = LoggerConfig::default();
        assert_eq!(config.acquisition.sample_interval, Duration::from_secs(60));
        assert_eq!(config.acquisition.batch_size, 10);
        assert_eq!(config.acquisition.max_retries, 3);
        assert_eq!(config.acquisition.history_limit, 1000);
        assert_eq!(config.acquisition.max_consecutive_errors, 5);
        assert_eq!(config.acquisition.error_delay, Duration::from_secs(30));
        assert_eq!(config.storage.save_interval, Duration::from_secs(3600));
        assert_eq!(config.storage.max_file_bytes, 100 * 1024 * 1024);
        assert_eq!(config.storage.flush_rows, 10);
        assert_eq!(config.storage.retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_toml_with_humantime_durations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plc_logger.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[acquisition]
sample_interval = "1s"
history_limit = 5

[storage]
save_interval = "10s"
retention_days = 7

[[devices]]
address = "10.13.50.100"
points = ["Line1_Speed", "Line1_Count"]
"#
        )
        .unwrap();

        let config = LoggerConfig::load_from(&path).unwrap();
        assert_eq!(config.acquisition.sample_interval, Duration::from_secs(1));
        assert_eq!(config.acquisition.history_limit, 5);
        assert_eq!(config.storage.save_interval, Duration::from_secs(10));
        assert_eq!(config.storage.retention_days, 7);
        assert_eq!(config.devices.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_device_addresses_rejected() {
        let mut config = LoggerConfig::default();
        config.devices = vec![
            Device {
                address: "10.0.0.1".into(),
                points: vec!["A".into()],
            },
            Device {
                address: "10.0.0.1".into(),
                points: vec!["B".into()],
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn device_without_points_rejected() {
        let mut config = LoggerConfig::default();
        config.devices = vec![Device {
            address: "10.0.0.1".into(),
            points: vec![],
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut config = LoggerConfig::default();
        config.application.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }
}

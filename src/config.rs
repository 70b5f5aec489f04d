use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Printer address and alert threshold, persisted between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Printer host, optionally with a port (e.g. "192.168.1.100" or "printer.local:7125").
    pub address: String,

    /// Bed temperature in °C at which the alert fires. Always > 0.
    pub target_temperature: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: constants::DEFAULT_ADDRESS.to_string(),
            target_temperature: constants::DEFAULT_TARGET_TEMPERATURE,
        }
    }
}

/// On-disk shape of the config file.
///
/// Older files store `target_temp` as the raw text of the input field, so
/// both numbers and numeric strings are accepted on read.
#[derive(Debug, Deserialize)]
struct StoredConfig {
    ip: Option<String>,
    target_temp: Option<StoredTemperature>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredTemperature {
    Number(f64),
    Text(String),
}

#[derive(Debug, Serialize)]
struct StoredConfigRef<'a> {
    ip: &'a str,
    target_temp: f64,
}

/// Loads and saves [`Config`] as a small JSON file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted config, falling back to defaults.
    ///
    /// A missing file silently yields the defaults. Unreadable or malformed
    /// files are reported with a warning and also yield the defaults; this
    /// never fails.
    pub fn load(&self) -> Config {
        match self.try_load() {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(
                    "No config file at {}, using defaults",
                    self.path.display()
                );
                Config::default()
            }
            Err(e) => {
                warn!("{}. Using default settings.", e);
                Config::default()
            }
        }
    }

    /// Load the persisted config, reporting what went wrong.
    ///
    /// Returns `Ok(None)` when the file does not exist. Keys missing from an
    /// otherwise valid file take their default value.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file exists but cannot be read
    /// - The content is not a JSON object of the expected shape
    /// - The stored target temperature is not a positive number
    pub fn try_load(&self) -> Result<Option<Config>, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::ReadFailed {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let stored: StoredConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        let target_temperature = match stored.target_temp {
            None => constants::DEFAULT_TARGET_TEMPERATURE,
            Some(StoredTemperature::Number(value)) => value,
            Some(StoredTemperature::Text(text)) => {
                text.trim()
                    .parse::<f64>()
                    .map_err(|_| ConfigError::InvalidValue {
                        field: "target_temp".to_string(),
                        value: text.clone(),
                        reason: "not a number".to_string(),
                    })?
            }
        };

        if !target_temperature.is_finite() || target_temperature <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "target_temp".to_string(),
                value: target_temperature.to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Some(Config {
            address: stored
                .ip
                .unwrap_or_else(|| constants::DEFAULT_ADDRESS.to_string()),
            target_temperature,
        }))
    }

    /// Persist the config.
    ///
    /// The JSON is written to a sibling `.tmp` file first and then renamed
    /// over the target, so a crash never leaves a half-written config.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, the temporary write, or the rename
    /// fails. Callers treat this as a warning.
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let write_failed = |reason: String| ConfigError::WriteFailed {
            path: self.path.display().to_string(),
            reason,
        };

        let stored = StoredConfigRef {
            ip: &config.address,
            target_temp: config.target_temperature,
        };
        let json = serde_json::to_string_pretty(&stored).map_err(|e| write_failed(e.to_string()))?;

        let tmp_path = self.temp_path();
        fs::write(&tmp_path, json).map_err(|e| write_failed(e.to_string()))?;
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(write_failed(e.to_string()));
        }

        debug!("Saved config to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| constants::CONFIG_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(constants::CONFIG_FILE)
    }
}

/// Timing knobs for the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    /// Delay between two polls.
    pub poll_interval: Duration,

    /// Minimum spacing between two "bed temperature" log lines.
    pub log_interval: Duration,

    /// Bound for a single HTTP request to the printer.
    pub request_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(constants::POLL_INTERVAL_SECONDS),
            log_interval: Duration::from_secs(constants::LOG_INTERVAL_SECONDS),
            request_timeout: Duration::from_secs(constants::REQUEST_TIMEOUT_SECONDS),
        }
    }
}

impl MonitorSettings {
    /// Load monitor timings from environment variables.
    ///
    /// All values are in seconds and may be fractional:
    /// - `BED_ALARM_POLL_INTERVAL`: delay between polls (default: 5)
    /// - `BED_ALARM_LOG_INTERVAL`: spacing of temperature log lines (default: 30)
    /// - `BED_ALARM_REQUEST_TIMEOUT`: HTTP timeout (default: 10)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not hold a valid duration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            poll_interval: parse_seconds(
                "BED_ALARM_POLL_INTERVAL",
                std::env::var("BED_ALARM_POLL_INTERVAL").ok().as_deref(),
                constants::POLL_INTERVAL_SECONDS,
                false,
            )?,
            log_interval: parse_seconds(
                "BED_ALARM_LOG_INTERVAL",
                std::env::var("BED_ALARM_LOG_INTERVAL").ok().as_deref(),
                constants::LOG_INTERVAL_SECONDS,
                true,
            )?,
            request_timeout: parse_seconds(
                "BED_ALARM_REQUEST_TIMEOUT",
                std::env::var("BED_ALARM_REQUEST_TIMEOUT").ok().as_deref(),
                constants::REQUEST_TIMEOUT_SECONDS,
                false,
            )?,
        })
    }
}

/// Parse a seconds value, using `default_seconds` when `raw` is unset.
pub(crate) fn parse_seconds(
    var_name: &str,
    raw: Option<&str>,
    default_seconds: u64,
    allow_zero: bool,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(default_seconds));
    };

    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && (*secs > 0.0 || (allow_zero && *secs == 0.0)))
        .map(Duration::from_secs_f64)
        .ok_or_else(|| ConfigError::InvalidEnv {
            var_name: var_name.to_string(),
            value: raw.to_string(),
        })
}

/// Application constants used throughout the system.
pub mod constants {
    /// Config file name, relative to the working directory.
    pub const CONFIG_FILE: &str = "printer_config.json";

    /// Printer address used when no config is stored.
    pub const DEFAULT_ADDRESS: &str = "192.168.1.100";

    /// Target bed temperature (°C) used when no config is stored.
    pub const DEFAULT_TARGET_TEMPERATURE: f64 = 60.0;

    /// Delay between two polls in seconds.
    pub const POLL_INTERVAL_SECONDS: u64 = 5;

    /// Minimum spacing of temperature log lines in seconds.
    pub const LOG_INTERVAL_SECONDS: u64 = 30;

    /// HTTP timeout for one printer request in seconds.
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;

    /// Capacity of the worker-to-controller event queue.
    pub const EVENT_QUEUE_CAPACITY: usize = 32;
}

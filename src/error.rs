use std::fmt;

/// Custom error types for the bed alarm.
///
/// Printer errors are transient: the monitor loop logs them and keeps
/// polling, the connection test reports them as its result. Input errors
/// block the requested action. Config errors never escape `ConfigStore::load`.

/// Main error type for bed alarm operations.
#[derive(Debug)]
pub enum BedAlarmError {
    /// Errors talking to the printer API.
    PrinterError(PrinterError),

    /// Errors from monitor commands.
    MonitorError(MonitorError),

    /// Configuration load/save errors.
    ConfigError(ConfigError),
}

/// Errors produced by a single printer query.
#[derive(Debug)]
pub enum PrinterError {
    /// The request did not complete within the configured timeout.
    ConnectTimeout { url: String, timeout_seconds: f64 },

    /// The printer could not be reached (connection refused, no route, DNS).
    ConnectionRefused { url: String, reason: String },

    /// The printer answered, but not with the expected status or JSON shape.
    MalformedResponse { url: String, reason: String },

    /// Any other network fault.
    TransportError { url: String, reason: String },
}

/// Errors returned by monitor commands.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// User supplied an unusable address or temperature.
    InvalidInput {
        field: String,
        value: String,
        reason: String,
    },

    /// The controller is in a state that does not accept the command.
    Busy { state: String },

    /// The background worker thread could not be started.
    SpawnFailed { reason: String },
}

/// Errors related to the persisted config and runtime settings.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file exists but could not be read.
    ReadFailed { path: String, reason: String },

    /// Config file is not valid JSON or has the wrong shape.
    ParseFailed { path: String, reason: String },

    /// Config file parsed but holds a value that breaks an invariant.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Config file could not be written.
    WriteFailed { path: String, reason: String },

    /// An environment variable holds an unparsable value.
    InvalidEnv { var_name: String, value: String },
}

impl PrinterError {
    /// URL of the request that failed.
    pub fn url(&self) -> &str {
        match self {
            PrinterError::ConnectTimeout { url, .. }
            | PrinterError::ConnectionRefused { url, .. }
            | PrinterError::MalformedResponse { url, .. }
            | PrinterError::TransportError { url, .. } => url,
        }
    }
}

impl MonitorError {
    pub(crate) fn invalid_input(field: &str, value: &str, reason: &str) -> Self {
        MonitorError::InvalidInput {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for BedAlarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BedAlarmError::PrinterError(e) => write!(f, "Printer error: {}", e),
            BedAlarmError::MonitorError(e) => write!(f, "Monitor error: {}", e),
            BedAlarmError::ConfigError(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl fmt::Display for PrinterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterError::ConnectTimeout {
                url,
                timeout_seconds,
            } => {
                write!(
                    f,
                    "Request to '{}' timed out after {} seconds",
                    url, timeout_seconds
                )
            }
            PrinterError::ConnectionRefused { url, reason } => {
                write!(f, "Failed to connect to printer at '{}': {}", url, reason)
            }
            PrinterError::MalformedResponse { url, reason } => {
                write!(f, "Unexpected response from '{}': {}", url, reason)
            }
            PrinterError::TransportError { url, reason } => {
                write!(f, "Network request to '{}' failed: {}", url, reason)
            }
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::InvalidInput {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid {} '{}': {}", field, value, reason)
            }
            MonitorError::Busy { state } => {
                write!(f, "Command not accepted while {}", state)
            }
            MonitorError::SpawnFailed { reason } => {
                write!(f, "Failed to start worker thread: {}", reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed { path, reason } => {
                write!(f, "Failed to read config file '{}': {}", path, reason)
            }
            ConfigError::ParseFailed { path, reason } => {
                write!(f, "Failed to parse config file '{}': {}", path, reason)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
            ConfigError::WriteFailed { path, reason } => {
                write!(f, "Failed to write config file '{}': {}", path, reason)
            }
            ConfigError::InvalidEnv { var_name, value } => {
                write!(
                    f,
                    "Invalid value '{}' for environment variable '{}'",
                    value, var_name
                )
            }
        }
    }
}

impl std::error::Error for BedAlarmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BedAlarmError::PrinterError(e) => Some(e),
            BedAlarmError::MonitorError(e) => Some(e),
            BedAlarmError::ConfigError(e) => Some(e),
        }
    }
}

impl std::error::Error for PrinterError {}
impl std::error::Error for MonitorError {}
impl std::error::Error for ConfigError {}

impl From<PrinterError> for BedAlarmError {
    fn from(err: PrinterError) -> Self {
        BedAlarmError::PrinterError(err)
    }
}

impl From<MonitorError> for BedAlarmError {
    fn from(err: MonitorError) -> Self {
        BedAlarmError::MonitorError(err)
    }
}

impl From<ConfigError> for BedAlarmError {
    fn from(err: ConfigError) -> Self {
        BedAlarmError::ConfigError(err)
    }
}

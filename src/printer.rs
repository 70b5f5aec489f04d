use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::time::Duration;

use crate::error::PrinterError;

/// One bed temperature sample taken from the printer.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureReading {
    /// Measured bed temperature in °C.
    pub current: f64,

    /// Bed setpoint reported by the printer firmware in °C.
    pub target: f64,

    pub observed_at: DateTime<Local>,
}

/// Outcome of a successful connection test.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionReport {
    pub reading: TemperatureReading,

    /// Axes the toolhead reports as homed (e.g. "xyz"), if the printer sent
    /// a toolhead object.
    pub homed_axes: Option<String>,
}

/// Anything that can report the bed temperature of a printer.
///
/// [`PrinterClient`] is the real implementation; the monitor only depends
/// on this trait.
pub trait TemperatureSource: Send + Sync {
    /// Query the heated bed once.
    fn query_bed_temperature(&self, address: &str) -> Result<TemperatureReading, PrinterError>;

    /// Query the bed and toolhead once to check the printer is reachable.
    fn test_connection(&self, address: &str) -> Result<ConnectionReport, PrinterError>;
}

/// Moonraker object query envelope: `{"result": {"status": {...}}}`.
#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    status: ObjectStatus,
}

#[derive(Debug, Deserialize)]
struct ObjectStatus {
    heater_bed: HeaterBedStatus,
    #[serde(default)]
    toolhead: Option<ToolheadStatus>,
}

#[derive(Debug, Deserialize)]
struct HeaterBedStatus {
    temperature: f64,
    target: f64,
}

#[derive(Debug, Deserialize)]
struct ToolheadStatus {
    #[serde(default)]
    homed_axes: Option<String>,
}

/// Read-only client for the Moonraker printer API.
///
/// Every call performs exactly one request; retrying is left to the caller.
pub struct PrinterClient {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl PrinterClient {
    /// Create a new PrinterClient whose requests give up after `timeout`.
    ///
    /// Printers live on the local network, so system proxy settings are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialise).
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch `url` and return the body of a `200 OK` response.
    fn get_body(&self, url: &str) -> Result<String, PrinterError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.classify(url, e))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(PrinterError::MalformedResponse {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response.text().map_err(|e| self.classify(url, e))
    }

    fn query(&self, address: &str, objects: &str) -> Result<ObjectStatus, PrinterError> {
        let url = query_url(address, objects);
        let body = self.get_body(&url)?;
        parse_object_status(&body).map_err(|reason| PrinterError::MalformedResponse { url, reason })
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> PrinterError {
        let url = url.to_string();
        if err.is_timeout() {
            PrinterError::ConnectTimeout {
                url,
                timeout_seconds: self.timeout.as_secs_f64(),
            }
        } else if err.is_connect() {
            PrinterError::ConnectionRefused {
                url,
                reason: error_chain(&err),
            }
        } else if err.is_decode() {
            PrinterError::MalformedResponse {
                url,
                reason: error_chain(&err),
            }
        } else {
            PrinterError::TransportError {
                url,
                reason: error_chain(&err),
            }
        }
    }
}

impl TemperatureSource for PrinterClient {
    fn query_bed_temperature(&self, address: &str) -> Result<TemperatureReading, PrinterError> {
        let status = self.query(address, "heater_bed")?;
        Ok(reading_from(&status.heater_bed))
    }

    fn test_connection(&self, address: &str) -> Result<ConnectionReport, PrinterError> {
        let status = self.query(address, "toolhead&heater_bed")?;
        Ok(ConnectionReport {
            reading: reading_from(&status.heater_bed),
            homed_axes: status.toolhead.and_then(|t| t.homed_axes),
        })
    }
}

fn reading_from(bed: &HeaterBedStatus) -> TemperatureReading {
    TemperatureReading {
        current: bed.temperature,
        target: bed.target,
        observed_at: Local::now(),
    }
}

/// Turn a user-entered address into the API base URL.
///
/// Surrounding whitespace and trailing slashes are dropped, and `http://` is
/// prepended unless a scheme is already present.
pub fn base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn query_url(address: &str, objects: &str) -> String {
    format!("{}/printer/objects/query?{}", base_url(address), objects)
}

fn parse_object_status(body: &str) -> Result<ObjectStatus, String> {
    serde_json::from_str::<QueryEnvelope>(body)
        .map(|envelope| envelope.result.status)
        .map_err(|e| e.to_string())
}

/// Render an error with all of its sources, e.g.
/// "error sending request: tcp connect error: Connection refused".
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

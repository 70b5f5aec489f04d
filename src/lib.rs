//! Bed Alarm - heated bed temperature alarm for Moonraker/Klipper 3D printers.
//!
//! This library polls a printer's Moonraker API at a fixed interval, reports
//! the heated bed temperature, and alerts once a target temperature is reached.
//!
//! # Core Components
//!
//! * [`config`] - Persisted printer settings and runtime timings
//! * [`printer`] - Moonraker object queries for the heated bed
//! * [`monitor`] - Monitoring state machine and background polling
//! * [`alerts`] - User-visible and audible goal notifications
//! * [`error`] - Error types and handling
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bed_alarm::*;
//!
//! struct Quiet;
//!
//! impl MonitorListener for Quiet {
//!     fn on_state_changed(&mut self, _state: MonitorState) {}
//!     fn on_temperature_updated(&mut self, reading: &TemperatureReading) {
//!         println!("{:.1}°C", reading.current);
//!     }
//!     fn on_log_line(&mut self, entry: &LogEntry) {
//!         println!("{}", entry);
//!     }
//!     fn on_alert(&mut self, _current: f64, _target: f64) {}
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = MonitorSettings::from_env()?;
//! let client = PrinterClient::new(settings.request_timeout)?;
//! let notifier = ConsoleNotifier::new(alerts::select_chime(true));
//!
//! let mut controller = MonitorController::new(
//!     Arc::new(client),
//!     ConfigStore::default(),
//!     Box::new(notifier),
//!     Box::new(Quiet),
//!     settings,
//! );
//! controller.start("192.168.1.100", 60.0)?;
//! while controller.state() != MonitorState::Idle {
//!     controller.process_next(Duration::from_millis(250));
//! }
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod config;
pub mod error;
pub mod monitor;
pub mod printer;

// Re-export commonly used types for convenience
pub use alerts::{AlertNotifier, Chime, ConsoleNotifier};
pub use config::{Config, ConfigStore, MonitorSettings};
pub use error::{BedAlarmError, ConfigError, MonitorError, PrinterError};
pub use monitor::{
    LogEntry, MonitorController, MonitorListener, MonitorState, StateReader,
    parse_target_temperature,
};
pub use printer::{ConnectionReport, PrinterClient, TemperatureReading, TemperatureSource};

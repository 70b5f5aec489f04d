use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use std::cell::Cell;
use std::io::BufRead;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, mpsc};
use std::{thread, time::Duration};

use bed_alarm::alerts::{self, ConsoleNotifier};
use bed_alarm::config::constants;
use bed_alarm::{
    ConfigStore, ConnectionReport, LogEntry, MonitorController, MonitorListener, MonitorSettings,
    MonitorState, PrinterClient, PrinterError, TemperatureReading, parse_target_temperature,
};

/// Bed Alarm - heated bed temperature alarm for Moonraker/Klipper 3D printers.
///
/// Polls the printer's Moonraker API and alerts once the heated bed reaches
/// the target temperature. The printer address and target are remembered in
/// a small JSON config file and reused when not given on the command line.
///
/// # Environment Variables
///
/// Optional (with defaults, all in seconds):
/// * `BED_ALARM_POLL_INTERVAL` - Delay between polls (default: "5")
/// * `BED_ALARM_LOG_INTERVAL` - Spacing of temperature log lines (default: "30")
/// * `BED_ALARM_REQUEST_TIMEOUT` - HTTP timeout per request (default: "10")
/// * `RUST_LOG` - Log level (default: "info")
///
/// # Usage
///
/// ```bash
/// # Check that the printer answers:
/// ./bed-alarm --ip 192.168.1.50 test
///
/// # Wait for the bed to reach 60°C (type "stop" to cancel):
/// ./bed-alarm --ip 192.168.1.50 --target 60
/// ```
#[derive(Parser, Debug)]
#[command(name = "bed-alarm")]
#[command(about = "Alerts when a 3D printer's heated bed reaches a target temperature")]
struct Args {
    /// Path to the printer config file
    #[arg(short, long, default_value = constants::CONFIG_FILE)]
    config: PathBuf,

    /// Printer address (host or host:port); defaults to the saved one
    #[arg(long)]
    ip: Option<String>,

    /// Target bed temperature in °C; defaults to the saved one
    #[arg(short, long)]
    target: Option<String>,

    /// Seconds between polls (overrides BED_ALARM_POLL_INTERVAL)
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Seconds between temperature log lines (overrides BED_ALARM_LOG_INTERVAL)
    #[arg(long)]
    log_interval: Option<f64>,

    /// HTTP timeout in seconds (overrides BED_ALARM_REQUEST_TIMEOUT)
    #[arg(long)]
    timeout: Option<f64>,

    /// Do not play a sound when the target is reached
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
enum Command {
    /// Query the printer once and report the bed temperature
    Test,

    /// Monitor the bed until the target temperature is reached (default)
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Pending,
    Connected,
    ConnectionFailed,
    GoalReached,
}

/// Renders controller events to the terminal through the logger.
struct ConsoleListener {
    outcome: Rc<Cell<Outcome>>,
}

impl MonitorListener for ConsoleListener {
    fn on_state_changed(&mut self, state: MonitorState) {
        debug!("Status: {}", state);
    }

    fn on_temperature_updated(&mut self, reading: &TemperatureReading) {
        debug!("Current bed temperature: {:.1}°C", reading.current);
    }

    fn on_log_line(&mut self, entry: &LogEntry) {
        log::log!(entry.level, "{}", entry.text);
    }

    fn on_alert(&mut self, _current: f64, _target: f64) {
        self.outcome.set(Outcome::GoalReached);
    }

    fn on_connection_tested(&mut self, result: &Result<ConnectionReport, PrinterError>) {
        self.outcome.set(match result {
            Ok(_) => Outcome::Connected,
            Err(_) => Outcome::ConnectionFailed,
        });
    }
}

fn main() -> Result<()> {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let args = Args::parse();

    let mut settings = MonitorSettings::from_env()?;
    if let Some(secs) = args.poll_interval {
        settings.poll_interval = positive_seconds("--poll-interval", secs)?;
    }
    if let Some(secs) = args.log_interval {
        settings.log_interval = Duration::try_from_secs_f64(secs)
            .map_err(|_| anyhow::anyhow!("Invalid --log-interval: {}", secs))?;
    }
    if let Some(secs) = args.timeout {
        settings.request_timeout = positive_seconds("--timeout", secs)?;
    }

    let store = ConfigStore::new(&args.config);
    let saved = store.load();
    let address = args.ip.clone().unwrap_or(saved.address);
    let target = match args.target.as_deref() {
        Some(text) => parse_target_temperature(text)?,
        None => saved.target_temperature,
    };

    info!("Bed Alarm starting...");
    info!("Using printer address: {}", address);
    debug!("Settings: {:?}", settings);

    let client = PrinterClient::new(settings.request_timeout)?;
    let notifier = ConsoleNotifier::new(alerts::select_chime(!args.quiet));
    let outcome = Rc::new(Cell::new(Outcome::Pending));
    let listener = ConsoleListener {
        outcome: Rc::clone(&outcome),
    };

    let mut controller = MonitorController::new(
        Arc::new(client),
        store,
        Box::new(notifier),
        Box::new(listener),
        settings,
    );

    match args.command.unwrap_or(Command::Watch) {
        Command::Test => {
            controller.test_connection(&address)?;
            run_until_idle(&mut controller, None);
            if outcome.get() != Outcome::Connected {
                bail!("Connection test failed");
            }
        }
        Command::Watch => {
            controller.start(&address, target)?;
            info!("Type 'stop' and press Enter to stop monitoring");
            let stop_requests = spawn_stdin_reader();
            run_until_idle(&mut controller, Some(&stop_requests));
            if outcome.get() == Outcome::GoalReached {
                info!("Target temperature reached, exiting");
            }
        }
    }

    Ok(())
}

/// Drain controller events until it is idle again.
fn run_until_idle(controller: &mut MonitorController, stop_requests: Option<&mpsc::Receiver<()>>) {
    while controller.state() != MonitorState::Idle {
        controller.process_next(Duration::from_millis(200));
        if stop_requests.is_some_and(|rx| rx.try_recv().is_ok()) {
            controller.stop();
        }
    }
    controller.process_pending();
}

/// Forward "stop" lines typed on stdin as stop requests.
fn spawn_stdin_reader() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(line.trim(), "stop" | "q" | "quit") && tx.send(()).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to read commands from stdin: {}", e);
    }
    rx
}

fn positive_seconds(flag: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => bail!("Invalid {}: {} (must be greater than 0)", flag, secs),
    }
}

use chrono::{DateTime, Local};
use log::{Level, debug};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use crate::alerts::{AlertNotifier, alert_message};
use crate::config::{Config, ConfigStore, MonitorSettings, constants};
use crate::error::{MonitorError, PrinterError};
use crate::printer::{ConnectionReport, TemperatureReading, TemperatureSource};

/// Lifecycle of the monitor.
///
/// `Idle → Testing → Idle` for a connection test,
/// `Idle → Monitoring → Alerted → Idle` when the target is reached, and
/// `Monitoring → Idle` on [`MonitorController::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Idle = 0,
    Testing = 1,
    Monitoring = 2,
    Alerted = 3,
}

impl MonitorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MonitorState::Testing,
            2 => MonitorState::Monitoring,
            3 => MonitorState::Alerted,
            _ => MonitorState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Testing => "testing",
            MonitorState::Monitoring => "monitoring",
            MonitorState::Alerted => "alerted",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the controller state, usable from any thread.
#[derive(Debug, Clone)]
pub struct StateReader(Arc<AtomicU8>);

impl StateReader {
    pub fn get(&self) -> MonitorState {
        MonitorState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// One line of the session log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Events emitted by the controller for the presentation layer.
///
/// All callbacks run on the thread that drains the controller.
pub trait MonitorListener {
    fn on_state_changed(&mut self, state: MonitorState);

    fn on_temperature_updated(&mut self, reading: &TemperatureReading);

    fn on_log_line(&mut self, entry: &LogEntry);

    fn on_alert(&mut self, current: f64, target: f64);

    fn on_connection_tested(&mut self, _result: &Result<ConnectionReport, PrinterError>) {}
}

/// Messages posted by worker threads to the controller.
#[derive(Debug)]
enum WorkerEvent {
    Reading(TemperatureReading),
    Log(Level, String),
    PollFailed(PrinterError),
    GoalReached(TemperatureReading),
    TestFinished(Result<ConnectionReport, PrinterError>),
}

/// Worker events are tagged with the id of the run that produced them.
type Envelope = (u64, WorkerEvent);

/// Per-run polling logic, independent of threads and sleeping.
struct PollSession {
    address: String,
    target: f64,
    log_interval: Duration,
    last_logged: Option<Instant>,
}

/// Result of one poll.
struct Tick {
    events: Vec<WorkerEvent>,
    goal_reached: bool,
}

impl PollSession {
    fn new(address: String, target: f64, log_interval: Duration) -> Self {
        Self {
            address,
            target,
            log_interval,
            last_logged: None,
        }
    }

    fn tick(&mut self, source: &dyn TemperatureSource, now: Instant) -> Tick {
        let reading = match source.query_bed_temperature(&self.address) {
            Ok(reading) => reading,
            Err(e) => {
                return Tick {
                    events: vec![WorkerEvent::PollFailed(e)],
                    goal_reached: false,
                };
            }
        };

        let mut events = Vec::with_capacity(3);
        events.push(WorkerEvent::Reading(reading.clone()));

        if self.log_due(now) {
            self.last_logged = Some(now);
            events.push(WorkerEvent::Log(
                Level::Info,
                format!(
                    "Bed temperature: {:.1}°C (printer target: {}°C)",
                    reading.current, reading.target
                ),
            ));
        }

        // Compared against the user's target; the printer's own setpoint is only logged.
        let goal_reached = reading.current >= self.target;
        if goal_reached {
            events.push(WorkerEvent::GoalReached(reading));
        }

        Tick {
            events,
            goal_reached,
        }
    }

    fn log_due(&self, now: Instant) -> bool {
        match self.last_logged {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.log_interval,
        }
    }
}

/// Handle on the running monitor worker.
struct Worker {
    run: u64,
    target: f64,
    cancel: Arc<AtomicBool>,
    thread: thread::Thread,
}

impl Worker {
    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }
}

fn run_monitor(
    run: u64,
    source: Arc<dyn TemperatureSource>,
    mut session: PollSession,
    poll_interval: Duration,
    cancel: Arc<AtomicBool>,
    tx: SyncSender<Envelope>,
) {
    while !cancel.load(Ordering::SeqCst) {
        let tick = session.tick(source.as_ref(), Instant::now());
        for event in tick.events {
            if tx.send((run, event)).is_err() {
                return;
            }
        }
        if tick.goal_reached {
            return;
        }
        sleep_unless_cancelled(poll_interval, &cancel);
    }
    debug!("Monitor run {} cancelled", run);
}

/// Sleep for `duration`, returning early once `cancel` is set and the
/// thread is unparked.
fn sleep_unless_cancelled(duration: Duration, cancel: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

/// Owns the monitoring state machine.
///
/// Commands (`test_connection`, `start`, `stop`) and event draining
/// (`process_pending`, `process_next`) must all happen on the owning
/// thread. Workers never touch controller state; they only post events
/// into a bounded queue that the owner drains.
pub struct MonitorController {
    source: Arc<dyn TemperatureSource>,
    store: ConfigStore,
    notifier: Box<dyn AlertNotifier>,
    listener: Box<dyn MonitorListener>,
    settings: MonitorSettings,
    state: Arc<AtomicU8>,
    events_tx: SyncSender<Envelope>,
    events_rx: Receiver<Envelope>,
    next_run: u64,
    monitor: Option<Worker>,
    test_run: Option<u64>,
    last_reading: Option<TemperatureReading>,
    log: Vec<LogEntry>,
}

impl MonitorController {
    pub fn new(
        source: Arc<dyn TemperatureSource>,
        store: ConfigStore,
        notifier: Box<dyn AlertNotifier>,
        listener: Box<dyn MonitorListener>,
        settings: MonitorSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::sync_channel(constants::EVENT_QUEUE_CAPACITY);
        Self {
            source,
            store,
            notifier,
            listener,
            settings,
            state: Arc::new(AtomicU8::new(MonitorState::Idle as u8)),
            events_tx,
            events_rx,
            next_run: 0,
            monitor: None,
            test_run: None,
            last_reading: None,
            log: Vec::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn state_reader(&self) -> StateReader {
        StateReader(Arc::clone(&self.state))
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Most recent reading of the current or last monitoring run.
    pub fn last_reading(&self) -> Option<&TemperatureReading> {
        self.last_reading.as_ref()
    }

    /// Target of the running monitor, if any.
    pub fn target(&self) -> Option<f64> {
        self.monitor.as_ref().map(|w| w.target)
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Query the printer once in the background.
    ///
    /// The result is reported through the log and
    /// [`MonitorListener::on_connection_tested`] once drained.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The address is blank
    /// - The controller is not idle
    /// - The worker thread cannot be spawned
    pub fn test_connection(&mut self, address: &str) -> Result<(), MonitorError> {
        let address = validate_address(address)?;
        let state = self.state();
        if state != MonitorState::Idle {
            return Err(MonitorError::Busy {
                state: state.to_string(),
            });
        }

        let run = self.next_run_id();
        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        let worker_address = address.clone();
        thread::Builder::new()
            .name("connection-test".to_string())
            .spawn(move || {
                let result = source.test_connection(&worker_address);
                let _ = tx.send((run, WorkerEvent::TestFinished(result)));
            })
            .map_err(|e| MonitorError::SpawnFailed {
                reason: e.to_string(),
            })?;

        self.test_run = Some(run);
        self.set_state(MonitorState::Testing);
        self.push_log(Level::Info, format!("Testing connection to {}...", address));
        Ok(())
    }

    /// Start polling `address` until the bed reaches `target` °C.
    ///
    /// The settings are saved first; a failed save is logged and does not
    /// prevent monitoring. Calling this while already monitoring does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The address is blank or the target is not a positive number
    /// - A connection test is still running
    /// - The worker thread cannot be spawned
    pub fn start(&mut self, address: &str, target: f64) -> Result<(), MonitorError> {
        let address = validate_address(address)?;
        let target = validate_target(target)?;

        match self.state() {
            MonitorState::Idle => {}
            MonitorState::Monitoring => {
                debug!("Monitoring already running, ignoring start");
                return Ok(());
            }
            state => {
                return Err(MonitorError::Busy {
                    state: state.to_string(),
                });
            }
        }

        let config = Config {
            address: address.clone(),
            target_temperature: target,
        };
        if let Err(e) = self.store.save(&config) {
            self.push_log(Level::Warn, format!("Could not save settings: {}", e));
        }

        let run = self.next_run_id();
        let cancel = Arc::new(AtomicBool::new(false));
        let session = PollSession::new(address, target, self.settings.log_interval);
        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        let poll_interval = self.settings.poll_interval;
        let worker_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("bed-monitor".to_string())
            .spawn(move || run_monitor(run, source, session, poll_interval, worker_cancel, tx))
            .map_err(|e| MonitorError::SpawnFailed {
                reason: e.to_string(),
            })?;

        self.monitor = Some(Worker {
            run,
            target,
            cancel,
            thread: handle.thread().clone(),
        });
        self.last_reading = None;
        self.set_state(MonitorState::Monitoring);
        self.push_log(
            Level::Info,
            format!("Monitoring started. Target temperature: {}°C", target),
        );
        Ok(())
    }

    /// Stop monitoring. Does nothing unless monitoring.
    pub fn stop(&mut self) {
        if self.state() != MonitorState::Monitoring {
            return;
        }
        if let Some(worker) = self.monitor.take() {
            worker.cancel();
        }
        self.set_state(MonitorState::Idle);
        self.push_log(Level::Info, "Monitoring stopped");
    }

    /// Handle every queued worker event without blocking.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((run, event)) = self.events_rx.try_recv() {
            self.handle(run, event);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for a worker event, then drain the queue.
    pub fn process_next(&mut self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok((run, event)) => {
                self.handle(run, event);
                1 + self.process_pending()
            }
            Err(_) => 0,
        }
    }

    fn handle(&mut self, run: u64, event: WorkerEvent) {
        if let WorkerEvent::TestFinished(result) = event {
            self.finish_test(run, result);
            return;
        }

        if !self.is_active_monitor(run) {
            debug!("Dropping event from stale monitor run {}", run);
            return;
        }

        match event {
            WorkerEvent::Reading(reading) => {
                self.listener.on_temperature_updated(&reading);
                self.last_reading = Some(reading);
            }
            WorkerEvent::Log(level, text) => self.push_log(level, text),
            WorkerEvent::PollFailed(e) => self.push_log(Level::Error, format!("Poll failed: {}", e)),
            WorkerEvent::GoalReached(reading) => self.fire_alert(reading),
            WorkerEvent::TestFinished(_) => {}
        }
    }

    fn finish_test(&mut self, run: u64, result: Result<ConnectionReport, PrinterError>) {
        if self.test_run != Some(run) {
            return;
        }
        self.test_run = None;

        match &result {
            Ok(report) => {
                self.push_log(Level::Info, "Connection OK");
                self.push_log(
                    Level::Info,
                    format!(
                        "Bed temperature: {:.1}°C (printer target: {}°C)",
                        report.reading.current, report.reading.target
                    ),
                );
                if let Some(axes) = &report.homed_axes {
                    let axes = if axes.is_empty() { "none" } else { axes.as_str() };
                    self.push_log(Level::Info, format!("Homed axes: {}", axes));
                }
            }
            Err(e) => self.push_log(Level::Error, format!("Connection test failed: {}", e)),
        }

        self.listener.on_connection_tested(&result);
        if self.state() == MonitorState::Testing {
            self.set_state(MonitorState::Idle);
        }
    }

    /// One-shot: the worker is detached before alerting, so a second
    /// `GoalReached` from the same run finds no active monitor.
    fn fire_alert(&mut self, reading: TemperatureReading) {
        let Some(worker) = self.monitor.take() else {
            return;
        };
        worker.cancel();

        self.set_state(MonitorState::Alerted);
        self.push_log(Level::Info, alert_message(reading.current, worker.target));
        self.notifier.notify(reading.current, worker.target);
        self.listener.on_alert(reading.current, worker.target);
        self.set_state(MonitorState::Idle);
    }

    fn is_active_monitor(&self, run: u64) -> bool {
        self.state() == MonitorState::Monitoring
            && self.monitor.as_ref().is_some_and(|w| w.run == run)
    }

    fn next_run_id(&mut self) -> u64 {
        self.next_run += 1;
        self.next_run
    }

    fn set_state(&mut self, state: MonitorState) {
        self.state.store(state as u8, Ordering::SeqCst);
        debug!("Monitor state -> {}", state);
        self.listener.on_state_changed(state);
    }

    fn push_log(&mut self, level: Level, text: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            text: text.into(),
        };
        self.listener.on_log_line(&entry);
        self.log.push(entry);
    }
}

impl Drop for MonitorController {
    fn drop(&mut self) {
        if let Some(worker) = self.monitor.take() {
            worker.cancel();
        }
    }
}

/// Parse a user-entered target temperature.
///
/// # Errors
///
/// Returns [`MonitorError::InvalidInput`] unless the text is a finite
/// number greater than 0.
pub fn parse_target_temperature(input: &str) -> Result<f64, MonitorError> {
    let value = input
        .trim()
        .parse::<f64>()
        .map_err(|_| MonitorError::invalid_input("target temperature", input, "not a number"))?;
    validate_target(value)
}

fn validate_target(target: f64) -> Result<f64, MonitorError> {
    if !target.is_finite() || target <= 0.0 {
        return Err(MonitorError::invalid_input(
            "target temperature",
            &target.to_string(),
            "must be greater than 0",
        ));
    }
    Ok(target)
}

fn validate_address(address: &str) -> Result<String, MonitorError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(MonitorError::invalid_input(
            "address",
            address,
            "enter the printer IP address",
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};

    fn reading(current: f64) -> TemperatureReading {
        TemperatureReading {
            current,
            target: 60.0,
            observed_at: Local::now(),
        }
    }

    fn malformed() -> PrinterError {
        PrinterError::MalformedResponse {
            url: "http://test/printer/objects/query?heater_bed".to_string(),
            reason: "missing field `status`".to_string(),
        }
    }

    /// Replays a fixed list of poll outcomes, then fails forever.
    struct ScriptedSource {
        script: Mutex<VecDeque<Option<f64>>>,
        calls: AtomicUsize,
        connection: Option<ConnectionReport>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<f64>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                connection: None,
            })
        }

        fn with_connection(report: ConnectionReport) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                connection: Some(report),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TemperatureSource for ScriptedSource {
        fn query_bed_temperature(&self, _address: &str) -> Result<TemperatureReading, PrinterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Some(current)) => Ok(reading(current)),
                _ => Err(malformed()),
            }
        }

        fn test_connection(&self, _address: &str) -> Result<ConnectionReport, PrinterError> {
            self.connection.clone().ok_or_else(|| PrinterError::ConnectionRefused {
                url: "http://test/printer/objects/query?toolhead&heater_bed".to_string(),
                reason: "Connection refused".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct Recorded {
        states: Vec<MonitorState>,
        temperatures: Vec<f64>,
        logs: Vec<String>,
        alerts: Vec<(f64, f64)>,
        tests: Vec<bool>,
        notified: Vec<(f64, f64)>,
    }

    impl Recorded {
        fn logs_containing(&self, needle: &str) -> usize {
            self.logs.iter().filter(|l| l.contains(needle)).count()
        }
    }

    struct Recorder(Rc<RefCell<Recorded>>);

    impl MonitorListener for Recorder {
        fn on_state_changed(&mut self, state: MonitorState) {
            self.0.borrow_mut().states.push(state);
        }

        fn on_temperature_updated(&mut self, reading: &TemperatureReading) {
            self.0.borrow_mut().temperatures.push(reading.current);
        }

        fn on_log_line(&mut self, entry: &LogEntry) {
            self.0.borrow_mut().logs.push(entry.text.clone());
        }

        fn on_alert(&mut self, current: f64, target: f64) {
            self.0.borrow_mut().alerts.push((current, target));
        }

        fn on_connection_tested(&mut self, result: &Result<ConnectionReport, PrinterError>) {
            self.0.borrow_mut().tests.push(result.is_ok());
        }
    }

    struct RecordingNotifier(Rc<RefCell<Recorded>>);

    impl AlertNotifier for RecordingNotifier {
        fn notify(&self, current: f64, target: f64) {
            self.0.borrow_mut().notified.push((current, target));
        }
    }

    struct Harness {
        controller: MonitorController,
        recorded: Rc<RefCell<Recorded>>,
        dir: TempDir,
    }

    impl Harness {
        fn new(source: Arc<dyn TemperatureSource>) -> Self {
            Self::with_poll_interval(source, Duration::from_millis(1))
        }

        /// A long interval keeps the worker parked after its first poll, so
        /// tests can push their own events into the queue.
        fn with_poll_interval(source: Arc<dyn TemperatureSource>, poll_interval: Duration) -> Self {
            let dir = tempdir().unwrap();
            let recorded = Rc::new(RefCell::new(Recorded::default()));
            let settings = MonitorSettings {
                poll_interval,
                log_interval: Duration::ZERO,
                request_timeout: Duration::from_secs(1),
            };
            let controller = MonitorController::new(
                source,
                ConfigStore::new(dir.path().join("printer_config.json")),
                Box::new(RecordingNotifier(recorded.clone())),
                Box::new(Recorder(recorded.clone())),
                settings,
            );
            Self {
                controller,
                recorded,
                dir,
            }
        }

        fn store(&self) -> ConfigStore {
            ConfigStore::new(self.dir.path().join("printer_config.json"))
        }

        /// Drain events until `done` holds, panicking after a few seconds.
        fn drive_until(&mut self, done: impl Fn(&MonitorController, &Recorded) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !done(&self.controller, &*self.recorded.borrow()) {
                assert!(Instant::now() < deadline, "timed out waiting for monitor");
                self.controller.process_next(Duration::from_millis(10));
            }
        }
    }

    #[test]
    fn test_start_rejects_invalid_input() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::new(source.clone());

        for (address, target) in [("", 60.0), ("   ", 60.0), ("10.0.0.2", 0.0), ("10.0.0.2", -1.0)]
        {
            let result = harness.controller.start(address, target);
            assert!(matches!(result, Err(MonitorError::InvalidInput { .. })));
            assert_eq!(harness.controller.state(), MonitorState::Idle);
        }
        assert!(matches!(
            harness.controller.start("10.0.0.2", f64::NAN),
            Err(MonitorError::InvalidInput { .. })
        ));

        assert!(harness.recorded.borrow().states.is_empty());
        assert!(harness.store().try_load().unwrap().is_none());
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn test_alert_fires_once_when_target_reached() {
        let source = ScriptedSource::new(vec![Some(20.0), Some(45.0), Some(59.9), Some(60.0)]);
        let mut harness = Harness::new(source.clone());

        harness.controller.start("192.168.1.50", 60.0).unwrap();
        assert_eq!(harness.controller.state(), MonitorState::Monitoring);
        harness.drive_until(|c, r| c.state() == MonitorState::Idle && !r.alerts.is_empty());

        // Give a stray extra tick the chance to show up.
        thread::sleep(Duration::from_millis(50));
        harness.controller.process_pending();

        let recorded = harness.recorded.borrow();
        assert_eq!(recorded.alerts, vec![(60.0, 60.0)]);
        assert_eq!(recorded.notified, vec![(60.0, 60.0)]);
        assert_eq!(recorded.temperatures, vec![20.0, 45.0, 59.9, 60.0]);
        assert_eq!(
            recorded.states,
            vec![
                MonitorState::Monitoring,
                MonitorState::Alerted,
                MonitorState::Idle
            ]
        );
        assert_eq!(recorded.logs_containing("GOAL REACHED"), 1);
        assert_eq!(source.calls(), 4);
        assert_eq!(harness.controller.last_reading().map(|r| r.current), Some(60.0));
        assert_eq!(harness.controller.target(), None);

        let saved = harness.store().load();
        assert_eq!(saved.address, "192.168.1.50");
        assert_eq!(saved.target_temperature, 60.0);
    }

    #[test]
    fn test_poll_failures_keep_monitoring() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::new(source.clone());

        harness.controller.start("10.0.0.2", 60.0).unwrap();
        harness.drive_until(|_, r| r.logs_containing("Poll failed") >= 5);

        assert_eq!(harness.controller.state(), MonitorState::Monitoring);
        assert!(harness.recorded.borrow().alerts.is_empty());
        let recorded = harness.recorded.borrow();
        assert_eq!(
            recorded.logs_containing("Unexpected response"),
            recorded.logs_containing("Poll failed")
        );
        drop(recorded);

        harness.controller.stop();
        assert_eq!(harness.controller.state(), MonitorState::Idle);
        assert_eq!(harness.recorded.borrow().logs_containing("Monitoring stopped"), 1);
    }

    #[test]
    fn test_recovers_after_malformed_response() {
        let source = ScriptedSource::new(vec![None, None, Some(30.0), Some(72.0)]);
        let mut harness = Harness::new(source.clone());

        harness.controller.start("10.0.0.2", 70.0).unwrap();
        harness.drive_until(|c, _| c.state() == MonitorState::Idle);

        let recorded = harness.recorded.borrow();
        assert_eq!(recorded.logs_containing("Poll failed"), 2);
        assert_eq!(recorded.alerts, vec![(72.0, 70.0)]);
        assert_eq!(source.calls(), 4);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::new(source);

        harness.controller.stop();
        assert!(harness.recorded.borrow().states.is_empty());

        harness.controller.start("10.0.0.2", 60.0).unwrap();
        harness.controller.stop();
        harness.controller.stop();
        assert_eq!(
            harness.recorded.borrow().states,
            vec![MonitorState::Monitoring, MonitorState::Idle]
        );
    }

    #[test]
    fn test_start_while_monitoring_is_noop() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::new(source);

        harness.controller.start("10.0.0.2", 60.0).unwrap();
        harness.controller.start("10.0.0.3", 80.0).unwrap();

        assert_eq!(harness.controller.target(), Some(60.0));
        assert_eq!(
            harness.recorded.borrow().states,
            vec![MonitorState::Monitoring]
        );
        assert_eq!(harness.store().load().address, "10.0.0.2");
        harness.controller.stop();
    }

    #[test]
    fn test_duplicate_goal_event_alerts_once() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::with_poll_interval(source, Duration::from_secs(60));

        harness.controller.start("10.0.0.2", 60.0).unwrap();
        let run = harness.controller.monitor.as_ref().unwrap().run;
        for _ in 0..2 {
            harness
                .controller
                .events_tx
                .send((run, WorkerEvent::GoalReached(reading(61.0))))
                .unwrap();
        }
        while harness.controller.state() == MonitorState::Monitoring {
            harness.controller.process_next(Duration::from_millis(10));
        }
        harness.controller.process_pending();

        assert_eq!(harness.recorded.borrow().alerts, vec![(61.0, 60.0)]);
        assert_eq!(harness.recorded.borrow().notified.len(), 1);
        assert_eq!(harness.controller.state(), MonitorState::Idle);
    }

    #[test]
    fn test_events_from_stopped_run_are_dropped() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::with_poll_interval(source, Duration::from_secs(60));

        harness.controller.start("10.0.0.2", 60.0).unwrap();
        let run = harness.controller.monitor.as_ref().unwrap().run;
        harness.controller.stop();
        harness.controller.process_pending();
        harness
            .controller
            .events_tx
            .send((run, WorkerEvent::Reading(reading(55.0))))
            .unwrap();
        harness.controller.process_pending();

        assert!(harness.recorded.borrow().temperatures.is_empty());
        assert!(harness.controller.last_reading().is_none());
    }

    #[test]
    fn test_connection_test_success() {
        let source = ScriptedSource::with_connection(ConnectionReport {
            reading: reading(24.5),
            homed_axes: Some(String::new()),
        });
        let mut harness = Harness::new(source.clone());

        harness.controller.test_connection(" 10.0.0.2 ").unwrap();
        assert_eq!(harness.controller.state(), MonitorState::Testing);
        harness.drive_until(|_, r| !r.tests.is_empty());

        let recorded = harness.recorded.borrow();
        assert_eq!(recorded.tests, vec![true]);
        assert_eq!(recorded.states, vec![MonitorState::Testing, MonitorState::Idle]);
        assert_eq!(recorded.logs_containing("Connection OK"), 1);
        assert_eq!(recorded.logs_containing("24.5°C"), 1);
        assert_eq!(recorded.logs_containing("Homed axes: none"), 1);
        assert_eq!(source.calls(), 0);
        assert!(harness.store().try_load().unwrap().is_none());
    }

    #[test]
    fn test_connection_test_failure() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::new(source);

        harness.controller.test_connection("10.0.0.2").unwrap();
        assert!(matches!(
            harness.controller.start("10.0.0.2", 60.0),
            Err(MonitorError::Busy { .. })
        ));
        harness.drive_until(|_, r| !r.tests.is_empty());

        assert_eq!(harness.recorded.borrow().tests, vec![false]);
        assert_eq!(harness.recorded.borrow().logs_containing("Connection test failed"), 1);
        assert_eq!(harness.controller.state(), MonitorState::Idle);
    }

    #[test]
    fn test_connection_test_rejected_while_monitoring() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::new(source);

        assert!(matches!(
            harness.controller.test_connection(""),
            Err(MonitorError::InvalidInput { .. })
        ));
        harness.controller.start("10.0.0.2", 60.0).unwrap();
        assert!(matches!(
            harness.controller.test_connection("10.0.0.2"),
            Err(MonitorError::Busy { .. })
        ));
        assert_eq!(harness.controller.state(), MonitorState::Monitoring);
        harness.controller.stop();
    }

    #[test]
    fn test_state_reader_tracks_controller() {
        let source = ScriptedSource::new(vec![]);
        let mut harness = Harness::new(source);
        let reader = harness.controller.state_reader();

        assert_eq!(reader.get(), MonitorState::Idle);
        harness.controller.start("10.0.0.2", 60.0).unwrap();
        let remote = reader.clone();
        let seen = thread::spawn(move || remote.get()).join().unwrap();
        assert_eq!(seen, MonitorState::Monitoring);
        harness.controller.stop();
        assert_eq!(reader.get(), MonitorState::Idle);
    }

    #[test]
    fn test_session_log_cadence() {
        let source = ScriptedSource::new(vec![Some(30.0), Some(31.0), Some(32.0), Some(33.0)]);
        let mut session = PollSession::new("10.0.0.2".to_string(), 60.0, Duration::from_secs(30));
        let t0 = Instant::now();

        let logged = |tick: &Tick| {
            tick.events
                .iter()
                .filter(|e| matches!(e, WorkerEvent::Log(..)))
                .count()
        };

        assert_eq!(logged(&session.tick(source.as_ref(), t0)), 1);
        assert_eq!(logged(&session.tick(source.as_ref(), t0 + Duration::from_secs(5))), 0);
        assert_eq!(logged(&session.tick(source.as_ref(), t0 + Duration::from_secs(30))), 1);
        assert_eq!(logged(&session.tick(source.as_ref(), t0 + Duration::from_secs(35))), 0);
    }

    #[test]
    fn test_session_goal_is_inclusive() {
        let source = ScriptedSource::new(vec![Some(59.99), Some(60.0)]);
        let mut session = PollSession::new("10.0.0.2".to_string(), 60.0, Duration::from_secs(30));
        let now = Instant::now();

        assert!(!session.tick(source.as_ref(), now).goal_reached);
        let tick = session.tick(source.as_ref(), now);
        assert!(tick.goal_reached);
        assert!(matches!(tick.events.last(), Some(WorkerEvent::GoalReached(r)) if r.current == 60.0));
    }

    #[test]
    fn test_session_failure_has_no_goal() {
        let source = ScriptedSource::new(vec![None]);
        let mut session = PollSession::new("10.0.0.2".to_string(), 60.0, Duration::ZERO);

        let tick = session.tick(source.as_ref(), Instant::now());
        assert!(!tick.goal_reached);
        assert!(matches!(
            tick.events.as_slice(),
            [WorkerEvent::PollFailed(PrinterError::MalformedResponse { .. })]
        ));
    }

    #[test]
    fn test_parse_target_temperature() {
        assert_eq!(parse_target_temperature("60").unwrap(), 60.0);
        assert_eq!(parse_target_temperature(" 72.5 ").unwrap(), 72.5);
        for input in ["", "hot", "0", "-10", "inf", "NaN"] {
            assert!(
                matches!(
                    parse_target_temperature(input),
                    Err(MonitorError::InvalidInput { .. })
                ),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry {
            timestamp: Local::now(),
            level: Level::Info,
            text: "Monitoring started".to_string(),
        };
        let rendered = entry.to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] Monitoring started"));
        assert_eq!(rendered.len(), "[00:00:00] Monitoring started".len());
    }
}

//! Engine event loop.
//!
//! The [`Engine`] owns the [`ConnectionManager`], executes its commands on a
//! [`Central`], sends each decoded snapshot to the remote calibration service
//! and publishes the resulting state to an [`Observer`]. Events are handled
//! one at a time; remote outcomes come back over a channel and are applied
//! between events.
//!
//! Remote results are tagged with the snapshot they were computed for.
//! [`GlucoseHistory::values`] only prefers them while that snapshot is the
//! current one, and a change of sensor discards them.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use log::{error, info, warn};

use super::{
    ble::Central,
    nfc::{Iso15693, Reader, Ticket},
    oop::{Client, HistoryResponse, Job, OopError, Outcome, Transport},
};
use crate::{
    config::Config,
    sans::{
        connection::{Command, ConnectionManager, ConnectionState, Event, Output, Update},
        fram::Fram,
        glucose::{CalibrationParameters, GlucoseMeasurement, values},
        nfc::{Acquisition, NfcError},
        sensor::{CurrentGlucose, Sensor},
        vendor::Transmitter,
    },
};

/// Receives published state.
///
/// The default implementation of each method ignores the update.
#[allow(unused_variables)]
pub trait Observer {
    fn transmitter(&mut self, transmitter: Option<&Transmitter>, state: ConnectionState) {}
    fn sensor(&mut self, sensor: Option<&Sensor>) {}
    fn glucose(&mut self, history: &GlucoseHistory) {}
    /// Short status text for display.
    fn info(&mut self, text: &str) {}
}

/// Observer ignoring every update.
impl Observer for () {}

/// Published glucose values, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlucoseHistory {
    /// Sequence number of the snapshot the raw values come from.
    pub sequence: u64,
    pub raw_trend: Vec<i32>,
    pub raw_history: Vec<i32>,
    /// Trend under the remote calibration parameters.
    pub calibrated_trend: Vec<i32>,
    /// History under the remote calibration parameters.
    pub calibrated_history: Vec<i32>,
    /// Snapshot the calibrated values were computed for.
    pub calibrated_sequence: Option<u64>,
    /// History as read by the remote service.
    pub remote_history: Vec<i32>,
    /// Snapshot the remote history was read from.
    pub remote_sequence: Option<u64>,
    pub parameters: Option<CalibrationParameters>,
    pub current_glucose: Option<CurrentGlucose>,
    pub alarm: Option<String>,
    pub trend_arrow: Option<String>,
}

impl GlucoseHistory {
    /// The best history of the current snapshot: remote, then calibrated,
    /// then raw.
    pub fn values(&self) -> &[i32] {
        [
            (&self.remote_history, self.remote_sequence),
            (&self.calibrated_history, self.calibrated_sequence),
        ]
        .into_iter()
        .find(|(v, sequence)| !v.is_empty() && *sequence == Some(self.sequence))
        .map_or(&self.raw_history, |(v, _)| v)
    }

    fn clear_calibration(&mut self) {
        self.calibrated_trend.clear();
        self.calibrated_history.clear();
        self.calibrated_sequence = None;
        self.parameters = None;
    }

    /// Forget every remote result.
    fn clear_remote(&mut self) {
        self.clear_calibration();
        self.remote_history.clear();
        self.remote_sequence = None;
        self.alarm = None;
        self.trend_arrow = None;
    }
}

/// Measurements of the last decoded snapshot.
#[derive(Debug, Clone)]
struct Snapshot {
    trend: Vec<GlucoseMeasurement>,
    history: Vec<GlucoseMeasurement>,
}

pub struct Engine<C, O> {
    central: C,
    observer: O,
    manager: ConnectionManager,
    config: Config,
    client: Option<Client>,
    sender: Sender<Outcome>,
    receiver: Receiver<Outcome>,
    history: GlucoseHistory,
    snapshot: Option<Snapshot>,
    /// Identifier of the sensor the published values belong to.
    sensor_uid: Option<[u8; 8]>,
    /// Sequence of snapshots, across BLE and NFC.
    sequence: u64,
    nfc: Reader,
    last_notification: Option<Instant>,
}

impl<C: Central, O: Observer> Engine<C, O> {
    pub fn new(central: C, observer: O, config: Config) -> Self {
        let (sender, receiver) = channel::unbounded();

        Self {
            central,
            observer,
            manager: ConnectionManager::new(&config),
            nfc: Reader::new(config.nfc_read_mode),
            config,
            client: None,
            sender,
            receiver,
            history: GlucoseHistory::default(),
            snapshot: None,
            sensor_uid: None,
            sequence: 0,
            last_notification: None,
        }
    }

    /// Send snapshots to the remote calibration service over `transport`.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        if self.config.oop.enabled {
            self.client = Some(Client::new(transport, &self.config.oop));
        }
        self
    }

    /// Send snapshots to the remote calibration service over HTTP.
    ///
    /// _Requires Cargo feature `http`._
    #[cfg(feature = "http")]
    pub fn with_http(self) -> Result<Self, OopError> {
        let transport = super::oop::HttpTransport::new(Duration::from_secs(30))?;
        Ok(self.with_transport(transport))
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn history(&self) -> &GlucoseHistory {
        &self.history
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn central(&self) -> &C {
        &self.central
    }

    /// Handle an event from the BLE central.
    pub fn handle(&mut self, event: Event) {
        if matches!(event, Event::ValueUpdated { .. }) {
            self.last_notification = Some(Instant::now());
        }

        let outputs = self.manager.handle(event);
        self.dispatch(outputs);
    }

    /// Release the current transmitter and scan for another.
    pub fn rescan(&mut self) {
        let outputs = self.manager.rescan();
        self.dispatch(outputs);
    }

    pub fn set_reading_interval(&mut self, minutes: u8) {
        self.config.reading_interval = minutes;
        let outputs = self.manager.set_reading_interval(minutes);
        self.dispatch(outputs);
    }

    /// Start an NFC session, superseding any running one.
    pub fn start_nfc(&self) -> Ticket {
        self.nfc.start()
    }

    /// A handle on the NFC reader, for running sessions off the engine
    /// thread. Hand the result to [`Engine::apply_nfc`].
    pub fn nfc_reader(&self) -> Reader {
        self.nfc.clone()
    }

    /// Read a sensor over NFC and publish its snapshot.
    ///
    /// The tag exchange runs on the calling thread and blocks the engine
    /// until it completes. Use [`Engine::nfc_reader`] and
    /// [`Engine::apply_nfc`] to keep the engine responsive.
    pub fn read_nfc(&mut self, ticket: &Ticket, tag: &mut impl Iso15693) -> Result<(), NfcError> {
        let result = self.nfc.read(ticket, tag);
        self.apply_nfc(result)
    }

    /// Publish the outcome of an NFC session.
    pub fn apply_nfc(&mut self, result: Result<Acquisition, NfcError>) -> Result<(), NfcError> {
        let acquisition = match result {
            Ok(acquisition) => acquisition,
            Err(err) => {
                self.observer.info(&err.user_message());
                return Err(err);
            }
        };

        match acquisition.into_sensor(Utc::now(), self.config.crc_policy) {
            Ok(sensor) => {
                self.observer.sensor(Some(&sensor));
                self.sequence += 1;
                self.publish_snapshot(&sensor);
            }
            Err(err) => {
                error!("NFC: {err}");
                self.observer.info(&err.to_string());
            }
        }
        Ok(())
    }

    /// Apply the remote outcomes received so far.
    pub fn poll_outcomes(&mut self) {
        while let Ok(outcome) = self.receiver.try_recv() {
            self.apply_outcome(outcome);
        }
    }

    /// Wait up to `timeout` for one remote outcome and apply it.
    pub fn wait_outcome(&mut self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => {
                self.apply_outcome(outcome);
                true
            }
            Err(_) => false,
        }
    }

    /// Handle events until the sender disconnects.
    pub fn run(&mut self, events: Receiver<Event>) {
        let tick = self
            .config
            .silence_timeout()
            .map_or(Duration::from_secs(60), |t| t.min(Duration::from_secs(60)));
        let receiver = self.receiver.clone();

        loop {
            let closed = crossbeam::select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        self.handle(event);
                        false
                    }
                    Err(_) => true,
                },
                recv(receiver) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.apply_outcome(outcome);
                    }
                    false
                },
                default(tick) => false,
            };

            if closed {
                break;
            }
            self.watch_silence();
        }

        info!("Event source closed, stopping");
    }

    fn watch_silence(&mut self) {
        let Some(timeout) = self.config.silence_timeout() else {
            return;
        };
        if self.manager.state() != ConnectionState::Streaming {
            self.last_notification = None;
            return;
        }

        let last = *self.last_notification.get_or_insert_with(Instant::now);
        if last.elapsed() >= timeout {
            self.last_notification = None;
            self.handle(Event::LinkSilent);
        }
    }

    fn dispatch(&mut self, outputs: Vec<Output>) {
        let mut failures = Vec::new();

        for output in outputs {
            match output {
                Output::Command(command) => {
                    if let Err(err) = self.central.execute(&command) {
                        error!("Executing {command:?}: {err}");
                        if let Command::Write { .. } = command {
                            failures.push(Event::WriteFailed {
                                error: err.to_string(),
                            });
                        }
                    }
                }
                Output::Update(update) => self.publish(update),
            }
        }

        // A link failure is reported once per batch.
        if let Some(event) = failures.into_iter().next() {
            let outputs = self.manager.handle(event);
            self.dispatch(outputs);
        }
    }

    fn publish(&mut self, update: Update) {
        match update {
            Update::State(state) => {
                self.observer.transmitter(self.manager.transmitter(), state);
            }
            Update::Transmitter => {
                self.observer
                    .transmitter(self.manager.transmitter(), self.manager.state());
            }
            Update::Sensor => {
                self.observer.sensor(self.manager.sensor());
                if let Some(current) = self.manager.sensor().and_then(|s| s.current_glucose) {
                    self.history.current_glucose = Some(current);
                    self.observer.glucose(&self.history);
                }
            }
            Update::NoSensor => {
                self.observer.sensor(None);
                self.observer.info("No sensor");
            }
            Update::Snapshot { .. } => {
                let Some(sensor) = self.manager.sensor().cloned() else {
                    return;
                };
                self.observer.sensor(Some(&sensor));
                self.sequence += 1;
                self.publish_snapshot(&sensor);
            }
        }
    }

    fn publish_snapshot(&mut self, sensor: &Sensor) {
        if sensor.uid != self.sensor_uid {
            if self.sensor_uid.is_some() {
                info!("Sensor changed, discarding remote results");
            }
            self.history.clear_remote();
            self.sensor_uid = sensor.uid;
        }

        self.history.sequence = self.sequence;
        self.history.raw_trend = values(&sensor.trend);
        self.history.raw_history = values(&sensor.history);
        self.history.current_glucose = sensor.current_glucose;

        info!("Raw trend: {:?}", self.history.raw_trend);
        info!("Raw history: {:?}", self.history.raw_history);
        self.observer
            .info(&format!("Raw history: {}", join(&self.history.raw_history)));
        self.observer.glucose(&self.history);

        self.snapshot = Some(Snapshot {
            trend: sensor.trend.clone(),
            history: sensor.history.clone(),
        });

        let (Some(client), Some(fram)) = (&self.client, &sensor.fram) else {
            return;
        };

        client.spawn(
            Job {
                sequence: self.sequence,
                fram: Fram::clone(fram),
                uid: sensor.uid,
                patch_info: sensor.patch_info.clone(),
                now: Utc::now(),
            },
            self.sender.clone(),
        );
    }

    fn apply_outcome(&mut self, outcome: Outcome) {
        if outcome.sequence() != self.sequence {
            info!(
                "Ignoring remote outcome for snapshot {} (current {})",
                outcome.sequence(),
                self.sequence
            );
            return;
        }

        match outcome {
            Outcome::Calibration { result, .. } => self.apply_calibration(result),
            Outcome::History {
                received, result, ..
            } => self.apply_history(received, result),
        }
    }

    fn apply_calibration(&mut self, result: Result<CalibrationParameters, OopError>) {
        match result {
            Ok(parameters) => {
                let Some(snapshot) = &self.snapshot else {
                    return;
                };
                let calibrate = |m: &[GlucoseMeasurement]| -> Vec<i32> {
                    m.iter().map(|m| m.calibrated(parameters).glucose()).collect()
                };

                self.history.calibrated_trend = calibrate(&snapshot.trend);
                self.history.calibrated_history = calibrate(&snapshot.history);
                self.history.calibrated_sequence = Some(self.sequence);
                self.history.parameters = Some(parameters);

                info!("OOP calibrated history: {:?}", self.history.calibrated_history);
                self.observer.info(&format!(
                    "OOP calibrated history: {}",
                    join(&self.history.calibrated_history)
                ));
            }
            Err(err) if err.is_connection() => {
                warn!("LibreOOP calibration failed: {err}");
                self.observer.info("LibreOOP calibration failed");
                return;
            }
            Err(err) => {
                warn!("LibreOOP calibration failed: {err}");
                self.history.clear_calibration();
                self.observer.info("LibreOOP calibration failed");
            }
        }

        self.observer.glucose(&self.history);
    }

    fn apply_history(&mut self, received: DateTime<Utc>, result: Result<HistoryResponse, OopError>) {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!("LibreOOP measurements failed: {err}");
                self.observer.info("LibreOOP measurements failed");
                return;
            }
        };

        let (current, history) = response.glucose_data(received);
        let remote = values(&history);

        self.history.current_glucose = Some(CurrentGlucose {
            value: current.glucose(),
            confirmed: true,
        });
        self.history.alarm = Some(response.alarm);
        self.history.trend_arrow = Some(response.trend_arrow);

        info!("OOP history: {remote:?}");
        self.observer
            .info(&format!("OOP history: {}", join(&remote)));

        if !remote.is_empty() {
            self.history.remote_history = remote;
            self.history.remote_sequence = Some(self.sequence);
        }

        self.observer.glucose(&self.history);
    }
}

fn join(values: &[i32]) -> String {
    let values: Vec<_> = values.iter().map(i32::to_string).collect();
    format!("[{}]", values.join(" "))
}

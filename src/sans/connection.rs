//! BLE connection state machine.
//!
//! The [`ConnectionManager`] consumes central and peripheral [`Event`]s and
//! returns [`Output`]s: [`Command`]s for the BLE central to execute and
//! [`Update`]s announcing changes to the transmitter and its sensor. It owns
//! the current [`Transmitter`], which in turn owns its adapter and sensor.
//!
//! ```text
//! Disconnected ─► Connecting ─► ServiceDiscovery ─► CharacteristicDiscovery ─► Streaming
//!       ▲                                                                         │
//!       └──────────────────────────── link lost ──────────────────────────────────┘
//! ```
//!
//! Characteristic values received in any state other than
//! [`ConnectionState::Streaming`] are discarded.

use core::fmt;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    fram::{self, CrcPolicy},
    sensor::Sensor,
    vendor::{
        self, BATTERY_LEVEL_CHARACTERISTIC, BATTERY_SERVICE, DEVICE_INFO_SERVICE,
        FIRMWARE_CHARACTERISTIC, HARDWARE_CHARACTERISTIC, MANUFACTURER_CHARACTERISTIC,
        MODEL_CHARACTERISTIC, PeripheralId, Response, SERIAL_CHARACTERISTIC,
        SOFTWARE_CHARACTERISTIC, Transmitter, TransmitterKind,
    },
};
use crate::config::Config;

/// Standard characteristics read once streaming starts.
const STANDARD_CHARACTERISTICS: [Uuid; 7] = [
    BATTERY_LEVEL_CHARACTERISTIC,
    MODEL_CHARACTERISTIC,
    SERIAL_CHARACTERISTIC,
    FIRMWARE_CHARACTERISTIC,
    HARDWARE_CHARACTERISTIC,
    SOFTWARE_CHARACTERISTIC,
    MANUFACTURER_CHARACTERISTIC,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    ServiceDiscovery,
    CharacteristicDiscovery,
    Streaming,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::ServiceDiscovery => "Discovering services",
            ConnectionState::CharacteristicDiscovery => "Discovering characteristics",
            ConnectionState::Streaming => "Connected",
        })
    }
}

/// A notification from the BLE central.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PoweredOn,
    PoweredOff,
    Discovered {
        peripheral: PeripheralId,
        name: Option<String>,
        manufacturer_data: Option<Vec<u8>>,
        rssi: i16,
    },
    Connected {
        peripheral: PeripheralId,
    },
    ServicesDiscovered {
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    ValueUpdated {
        characteristic: Uuid,
        value: Vec<u8>,
        received: DateTime<Utc>,
    },
    WriteFailed {
        error: String,
    },
    /// No notification arrived within the silence timeout.
    LinkSilent,
    Disconnected {
        peripheral: PeripheralId,
        error: Option<String>,
    },
}

/// An operation for the BLE central to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    DiscoverServices(PeripheralId),
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: Uuid,
    },
    SetNotify {
        peripheral: PeripheralId,
        characteristic: Uuid,
    },
    Read {
        peripheral: PeripheralId,
        characteristic: Uuid,
    },
    /// Write without response.
    Write {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// A change for the engine to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    State(ConnectionState),
    Transmitter,
    Sensor,
    NoSensor,
    /// A snapshot was decoded into the sensor.
    Snapshot { sequence: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Command(Command),
    Update(Update),
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    scanning: bool,
    preference: TransmitterKind,
    reading_interval: u8,
    crc_policy: CrcPolicy,
    transmitter: Option<Transmitter>,
    /// Standard characteristics discovered but not yet read.
    pending_reads: Vec<Uuid>,
    /// A disconnect was requested while reconnecting; its confirmation is
    /// not a link loss.
    awaiting_disconnect: bool,
    sequence: u64,
}

impl ConnectionManager {
    pub fn new(config: &Config) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            scanning: false,
            preference: config.preferred_transmitter,
            reading_interval: config.reading_interval,
            crc_policy: config.crc_policy,
            transmitter: None,
            pending_reads: Vec::new(),
            awaiting_disconnect: false,
            sequence: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn transmitter(&self) -> Option<&Transmitter> {
        self.transmitter.as_ref()
    }

    pub fn sensor(&self) -> Option<&Sensor> {
        self.transmitter.as_ref()?.sensor.as_ref()
    }

    /// Number of snapshots decoded so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_preference(&mut self, preference: TransmitterKind) {
        self.preference = preference;
    }

    /// Change the reading interval, notifying a streaming transmitter.
    pub fn set_reading_interval(&mut self, minutes: u8) -> Vec<Output> {
        self.reading_interval = minutes;

        let mut out = Vec::new();
        if self.state != ConnectionState::Streaming {
            return out;
        }
        if let Some(t) = &self.transmitter {
            let responses = t.adapter.interval_commands(minutes);
            self.respond(responses, None, &mut out);
        }
        out
    }

    /// Release the current transmitter and scan for a new one.
    pub fn rescan(&mut self) -> Vec<Output> {
        let mut out = Vec::new();

        if let Some(t) = self.transmitter.take() {
            info!("Releasing {}", t.display_name());
            out.push(Output::Command(Command::Disconnect(t.peripheral)));
            out.push(Output::Update(Update::Transmitter));
        }

        self.pending_reads.clear();
        self.set_state(ConnectionState::Disconnected, &mut out);
        self.scanning = true;
        out.push(Output::Command(Command::StartScan));
        out
    }

    pub fn handle(&mut self, event: Event) -> Vec<Output> {
        let mut out = Vec::new();

        match event {
            Event::PoweredOn => {
                info!("Bluetooth powered on, scanning");
                self.scanning = true;
                out.push(Output::Command(Command::StartScan));
            }
            Event::PoweredOff => {
                warn!("Bluetooth powered off");
                self.scanning = false;
                self.reset_link();
                self.set_state(ConnectionState::Disconnected, &mut out);
            }
            Event::Discovered {
                peripheral,
                name,
                manufacturer_data,
                rssi,
            } => self.discovered(peripheral, name, manufacturer_data, rssi, &mut out),
            Event::Connected { peripheral } => {
                let Some(t) = &self.transmitter else {
                    return out;
                };
                if t.peripheral != peripheral || self.state != ConnectionState::Connecting {
                    debug!("Ignoring connection of {peripheral}");
                    return out;
                }
                self.awaiting_disconnect = false;

                info!("\"{}\" has connected, requesting service discovery", t.name);
                out.push(Output::Command(Command::DiscoverServices(peripheral)));
                self.set_state(ConnectionState::ServiceDiscovery, &mut out);
            }
            Event::ServicesDiscovered { services } => {
                let Some(t) = &self.transmitter else {
                    return out;
                };
                if self.state != ConnectionState::ServiceDiscovery {
                    return out;
                }

                for service in services {
                    debug!("Discovered service {service}");
                    out.push(Output::Command(Command::DiscoverCharacteristics {
                        peripheral: t.peripheral.clone(),
                        service,
                    }));
                }
                self.set_state(ConnectionState::CharacteristicDiscovery, &mut out);
            }
            Event::CharacteristicsDiscovered {
                service,
                characteristics,
            } => self.characteristics_discovered(service, characteristics, &mut out),
            Event::ValueUpdated {
                characteristic,
                value,
                received,
            } => {
                if self.state != ConnectionState::Streaming {
                    debug!(
                        "Discarding {} bytes for {characteristic} while {}",
                        value.len(),
                        self.state
                    );
                    return out;
                }
                self.value_updated(characteristic, &value, received, &mut out);
            }
            Event::WriteFailed { error } => {
                error!("Write failed: {error}");
                self.link_failed(&mut out);
            }
            Event::LinkSilent => {
                warn!("No data received within the silence timeout");
                self.link_failed(&mut out);
            }
            Event::Disconnected { peripheral, error } => {
                if self.transmitter.as_ref().is_none_or(|t| t.peripheral != peripheral) {
                    debug!("Ignoring disconnection of {peripheral}");
                    return out;
                }
                if self.awaiting_disconnect && self.state == ConnectionState::Connecting {
                    debug!("{peripheral} disconnected as requested, awaiting reconnection");
                    self.awaiting_disconnect = false;
                    return out;
                }

                self.reset_link();

                match error {
                    Some(error) if self.accepts_current() => {
                        warn!("Disconnected: {error}, reconnecting");
                        self.reconnect(&mut out);
                    }
                    Some(error) => {
                        warn!("Disconnected: {error}");
                        self.set_state(ConnectionState::Disconnected, &mut out);
                    }
                    None => {
                        info!("Disconnected");
                        self.set_state(ConnectionState::Disconnected, &mut out);
                    }
                }
            }
        }

        out
    }

    fn discovered(
        &mut self,
        peripheral: PeripheralId,
        name: Option<String>,
        manufacturer_data: Option<Vec<u8>>,
        rssi: i16,
        out: &mut Vec<Output>,
    ) {
        if !self.scanning {
            return;
        }

        let name = name.unwrap_or_else(|| "Unnamed peripheral".to_string());
        let kind = TransmitterKind::from_name(&name);

        if kind == TransmitterKind::None
            || (self.preference != TransmitterKind::None && kind != self.preference)
        {
            debug!("Skipping \"{name}\"");
            return;
        }

        info!("Found \"{name}\" peripheral (RSSI: {rssi}), connecting");

        self.scanning = false;
        out.push(Output::Command(Command::StopScan));

        if let Some(previous) = self.transmitter.take() {
            out.push(Output::Command(Command::Disconnect(previous.peripheral)));
        }

        let Some(mut transmitter) = Transmitter::new(peripheral.clone(), &name) else {
            return;
        };

        if let (TransmitterKind::Bubble, Some(data)) = (kind, &manufacturer_data) {
            vendor::bubble::parse_advertisement(data, &mut transmitter.info);
        }

        self.transmitter = Some(transmitter);
        self.pending_reads.clear();
        out.push(Output::Update(Update::Transmitter));
        out.push(Output::Command(Command::Connect(peripheral)));
        self.set_state(ConnectionState::Connecting, out);
    }

    fn characteristics_discovered(
        &mut self,
        service: Uuid,
        characteristics: Vec<Uuid>,
        out: &mut Vec<Output>,
    ) {
        let Some(t) = &mut self.transmitter else {
            return;
        };
        let standard = service == DEVICE_INFO_SERVICE || service == BATTERY_SERVICE;

        match self.state {
            ConnectionState::CharacteristicDiscovery => {}
            // Services reported after the data service are read at once.
            ConnectionState::Streaming if standard => {
                for characteristic in characteristics
                    .into_iter()
                    .filter(|c| STANDARD_CHARACTERISTICS.contains(c))
                {
                    out.push(Output::Command(Command::Read {
                        peripheral: t.peripheral.clone(),
                        characteristic,
                    }));
                }
                return;
            }
            _ => return,
        }

        if service == t.adapter.service() {
            let read = t.adapter.read_characteristic();
            let write = t.adapter.write_characteristic();

            if characteristics.contains(&read) {
                debug!("Enabling notifications on the data read characteristic");
                t.read_characteristic = Some(read);
                out.push(Output::Command(Command::SetNotify {
                    peripheral: t.peripheral.clone(),
                    characteristic: read,
                }));
            }
            if characteristics.contains(&write) {
                t.write_characteristic = Some(write);
            }
        } else if standard {
            self.pending_reads.extend(
                characteristics
                    .into_iter()
                    .filter(|c| STANDARD_CHARACTERISTICS.contains(c)),
            );
        } else {
            debug!("Ignoring characteristics of service {service}");
        }

        if t.read_characteristic.is_none() || t.write_characteristic.is_none() {
            return;
        }

        let peripheral = t.peripheral.clone();
        let responses = t.adapter.start_commands(self.reading_interval);
        self.set_state(ConnectionState::Streaming, out);

        self.respond(responses, None, out);
        for characteristic in self.pending_reads.drain(..) {
            out.push(Output::Command(Command::Read {
                peripheral: peripheral.clone(),
                characteristic,
            }));
        }
    }

    fn value_updated(
        &mut self,
        characteristic: Uuid,
        value: &[u8],
        received: DateTime<Utc>,
        out: &mut Vec<Output>,
    ) {
        let Some(t) = &mut self.transmitter else {
            return;
        };

        debug!("{} bytes received for {characteristic}", value.len());

        let text = || String::from_utf8_lossy(value).into_owned();
        let info = &mut t.info;

        match characteristic {
            BATTERY_LEVEL_CHARACTERISTIC => {
                info.battery = value.first().copied();
                info!("Battery level: {:?}", info.battery);
            }
            MODEL_CHARACTERISTIC => info.model = text(),
            SERIAL_CHARACTERISTIC => info.serial = text(),
            FIRMWARE_CHARACTERISTIC => info.firmware = text(),
            HARDWARE_CHARACTERISTIC => info.hardware = text(),
            SOFTWARE_CHARACTERISTIC => info.software = text(),
            MANUFACTURER_CHARACTERISTIC => info.manufacturer = text(),
            c if Some(c) == t.read_characteristic => {
                debug!("Data read: {}", hex::encode(value));
                match t.receive(value) {
                    Ok(responses) => self.respond(responses, Some(received), out),
                    Err(err) => warn!("{}: {err}", t.display_name()),
                }
                return;
            }
            _ => {
                debug!(
                    "Unhandled value (string: {:?}, hex: {})",
                    text(),
                    hex::encode(value)
                );
                return;
            }
        }

        debug!("Transmitter info: {:?}", t.info);
        out.push(Output::Update(Update::Transmitter));
    }

    /// Translate adapter responses into outputs.
    fn respond(
        &mut self,
        responses: Vec<Response>,
        received: Option<DateTime<Utc>>,
        out: &mut Vec<Output>,
    ) {
        let Some(t) = &mut self.transmitter else {
            return;
        };

        for response in responses {
            match response {
                Response::Write(value) => {
                    let Some(characteristic) = t.write_characteristic else {
                        warn!("No data write characteristic for {}", hex::encode(&value));
                        continue;
                    };
                    debug!("Writing {}", hex::encode(&value));
                    out.push(Output::Command(Command::Write {
                        peripheral: t.peripheral.clone(),
                        characteristic,
                        value,
                    }));
                }
                Response::Read => {
                    if let Some(characteristic) = t.read_characteristic {
                        out.push(Output::Command(Command::Read {
                            peripheral: t.peripheral.clone(),
                            characteristic,
                        }));
                    }
                }
                Response::Snapshot(fram) => {
                    let now = received.unwrap_or_else(Utc::now);
                    match fram::decode(&fram, now, self.crc_policy) {
                        Ok(reading) => {
                            t.sensor
                                .get_or_insert_with(Sensor::default)
                                .apply(fram, reading);
                            self.sequence += 1;
                            out.push(Output::Update(Update::Snapshot {
                                sequence: self.sequence,
                            }));
                        }
                        Err(err) => error!("{}: {err}", t.display_name()),
                    }
                }
                Response::TransmitterChanged => out.push(Output::Update(Update::Transmitter)),
                Response::SensorChanged | Response::NewSensor => {
                    out.push(Output::Update(Update::Sensor))
                }
                Response::NoSensor => out.push(Output::Update(Update::NoSensor)),
            }
        }
    }

    /// Whether the current transmitter satisfies the preference.
    fn accepts_current(&self) -> bool {
        self.transmitter.as_ref().is_some_and(|t| {
            self.preference == TransmitterKind::None || self.preference == t.kind()
        })
    }

    fn link_failed(&mut self, out: &mut Vec<Output>) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        let Some(t) = &self.transmitter else {
            return;
        };

        out.push(Output::Command(Command::Disconnect(t.peripheral.clone())));
        self.reset_link();

        if self.accepts_current() {
            self.awaiting_disconnect = true;
            self.reconnect(out);
        } else {
            self.set_state(ConnectionState::Disconnected, out);
        }
    }

    fn reconnect(&mut self, out: &mut Vec<Output>) {
        let Some(t) = &self.transmitter else {
            return;
        };

        info!("Reconnecting to {}", t.display_name());
        out.push(Output::Command(Command::Connect(t.peripheral.clone())));
        self.set_state(ConnectionState::Connecting, out);
    }

    /// Forget the discovered characteristics and any partial packet.
    fn reset_link(&mut self) {
        self.pending_reads.clear();
        self.awaiting_disconnect = false;
        if let Some(t) = &mut self.transmitter {
            t.adapter.reset();
            t.read_characteristic = None;
            t.write_characteristic = None;
        }
    }

    fn set_state(&mut self, state: ConnectionState, out: &mut Vec<Output>) {
        if self.state != state {
            info!("Connection state: {state}");
            self.state = state;
            out.push(Output::Update(Update::State(state)));
        }
    }
}

//! Vendor protocol adapters for BLE transmitters.
//!
//! Each transmitter family speaks its own protocol over a pair of GATT
//! characteristics: notifications on a data-read characteristic, commands on a
//! data-write characteristic. The families form a closed set, so the adapter
//! is an enumeration dispatched with `match` rather than a trait object.
//!
//! Adapters move through the phases of [`Phase`] as responses arrive.
//! Metadata responses update the transmitter's [`DeviceInfo`] and the
//! [`Sensor`] directly; data packets are handed to a
//! [`crate::sans::reassembly::Reassembler`] and surface as a
//! [`Response::Snapshot`] once complete.

use core::fmt;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::{fram::Fram, sensor::Sensor};

pub mod bubble;
pub mod droplet;
pub mod miaomiao;

pub use bubble::Bubble;
pub use droplet::Droplet;
pub use miaomiao::MiaoMiao;

/// Expand a 16-bit Bluetooth SIG identifier to a full UUID.
pub const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

pub const DEVICE_INFO_SERVICE: Uuid = bluetooth_uuid(0x180A);
pub const MODEL_CHARACTERISTIC: Uuid = bluetooth_uuid(0x2A24);
pub const SERIAL_CHARACTERISTIC: Uuid = bluetooth_uuid(0x2A25);
pub const FIRMWARE_CHARACTERISTIC: Uuid = bluetooth_uuid(0x2A26);
pub const HARDWARE_CHARACTERISTIC: Uuid = bluetooth_uuid(0x2A27);
pub const SOFTWARE_CHARACTERISTIC: Uuid = bluetooth_uuid(0x2A28);
pub const MANUFACTURER_CHARACTERISTIC: Uuid = bluetooth_uuid(0x2A29);

pub const BATTERY_SERVICE: Uuid = bluetooth_uuid(0x180F);
pub const BATTERY_LEVEL_CHARACTERISTIC: Uuid = bluetooth_uuid(0x2A19);

/// Nordic UART service, shared by Bubble and MiaoMiao.
pub const NORDIC_UART_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
pub const NORDIC_UART_TX: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
pub const NORDIC_UART_RX: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Droplet and LimiTTer data service.
pub const DROPLET_SERVICE: Uuid = Uuid::from_u128(0xc97433f0_be8f_4dc8_b6f0_5343e6100eb4);
pub const DROPLET_READ: Uuid = Uuid::from_u128(0xc97433f1_be8f_4dc8_b6f0_5343e6100eb4);
pub const DROPLET_WRITE: Uuid = Uuid::from_u128(0xc97433f2_be8f_4dc8_b6f0_5343e6100eb4);

/// Transmitter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmitterKind {
    #[default]
    None,
    Bubble,
    Droplet,
    Limitter,
    MiaoMiao,
}

impl TransmitterKind {
    /// Families that can be discovered.
    pub const KNOWN: [TransmitterKind; 4] = [
        TransmitterKind::Bubble,
        TransmitterKind::Droplet,
        TransmitterKind::Limitter,
        TransmitterKind::MiaoMiao,
    ];

    /// Identify a family from an advertised peripheral name.
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        Self::KNOWN
            .into_iter()
            .find(|kind| name.contains(kind.tag()))
            .unwrap_or(TransmitterKind::None)
    }

    /// Lowercase tag matched against peripheral names.
    pub fn tag(&self) -> &'static str {
        match self {
            TransmitterKind::None => "none",
            TransmitterKind::Bubble => "bubble",
            TransmitterKind::Droplet => "droplet",
            TransmitterKind::Limitter => "limitter",
            TransmitterKind::MiaoMiao => "miaomiao",
        }
    }
}

impl fmt::Display for TransmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransmitterKind::None => "Unknown",
            TransmitterKind::Bubble => "Bubble",
            TransmitterKind::Droplet => "Droplet",
            TransmitterKind::Limitter => "LimiTTer",
            TransmitterKind::MiaoMiao => "MiaoMiao",
        })
    }
}

/// Platform handle of a BLE peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptive fields reported by a transmitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Battery level in percent.
    pub battery: Option<u8>,
    pub firmware: String,
    pub hardware: String,
    pub model: String,
    pub manufacturer: String,
    pub serial: String,
    pub software: String,
    pub mac_address: String,
}

/// Progress of an adapter through its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingDeviceInfo,
    AwaitingSensorInfo,
    Streaming,
}

/// An action or notice produced by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Write bytes to the data-write characteristic.
    Write(Vec<u8>),
    /// Read the data-read characteristic.
    Read,
    /// A complete snapshot is ready for decoding.
    Snapshot(Fram),
    TransmitterChanged,
    SensorChanged,
    NoSensor,
    NewSensor,
}

/// An error interpreting a notification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// Received an empty notification.
    #[error("Empty response.")]
    Empty,
    /// Unknown response type.
    #[error("Unknown response type (0x{0:02x}).")]
    UnknownType(u8),
    /// Response shorter than its type requires.
    #[error("Response 0x{tag:02x} too short ({len} bytes).")]
    Truncated { tag: u8, len: usize },
    /// Malformed textual reading.
    #[error("Malformed reading: {0:?}.")]
    Malformed(String),
}

/// Protocol adapter for one transmitter family.
#[derive(Debug, Clone)]
pub enum Adapter {
    Bubble(Bubble),
    MiaoMiao(MiaoMiao),
    Droplet(Droplet),
    Limitter(Droplet),
}

impl Adapter {
    /// Build the adapter for a family, if it is a known one.
    pub fn new(kind: TransmitterKind) -> Option<Self> {
        Some(match kind {
            TransmitterKind::None => None?,
            TransmitterKind::Bubble => Adapter::Bubble(Bubble::default()),
            TransmitterKind::MiaoMiao => Adapter::MiaoMiao(MiaoMiao::default()),
            TransmitterKind::Droplet => Adapter::Droplet(Droplet::droplet()),
            TransmitterKind::Limitter => Adapter::Limitter(Droplet::limitter()),
        })
    }

    pub fn kind(&self) -> TransmitterKind {
        match self {
            Adapter::Bubble(_) => TransmitterKind::Bubble,
            Adapter::MiaoMiao(_) => TransmitterKind::MiaoMiao,
            Adapter::Droplet(_) => TransmitterKind::Droplet,
            Adapter::Limitter(_) => TransmitterKind::Limitter,
        }
    }

    /// GATT service carrying the data characteristics.
    pub fn service(&self) -> Uuid {
        match self {
            Adapter::Bubble(_) | Adapter::MiaoMiao(_) => NORDIC_UART_SERVICE,
            Adapter::Droplet(_) | Adapter::Limitter(_) => DROPLET_SERVICE,
        }
    }

    /// Characteristic notifying data.
    pub fn read_characteristic(&self) -> Uuid {
        match self {
            Adapter::Bubble(_) | Adapter::MiaoMiao(_) => NORDIC_UART_TX,
            Adapter::Droplet(_) | Adapter::Limitter(_) => DROPLET_READ,
        }
    }

    /// Characteristic accepting commands.
    pub fn write_characteristic(&self) -> Uuid {
        match self {
            Adapter::Bubble(_) | Adapter::MiaoMiao(_) => NORDIC_UART_RX,
            Adapter::Droplet(_) | Adapter::Limitter(_) => DROPLET_WRITE,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Adapter::Bubble(a) => a.phase(),
            Adapter::MiaoMiao(a) => a.phase(),
            Adapter::Droplet(a) | Adapter::Limitter(a) => a.phase(),
        }
    }

    /// Command requesting readings every `interval` minutes.
    pub fn read_command(&self, interval: u8) -> Vec<u8> {
        match self {
            Adapter::Bubble(_) => Bubble::read_command(interval).to_vec(),
            Adapter::MiaoMiao(_) => MiaoMiao::read_command(interval).to_vec(),
            Adapter::Droplet(a) | Adapter::Limitter(a) => a.read_command(interval).to_vec(),
        }
    }

    /// Begin streaming, returning the commands to issue.
    pub fn start_commands(&mut self, interval: u8) -> Vec<Response> {
        match self {
            Adapter::Bubble(a) => a.start(interval),
            Adapter::MiaoMiao(a) => a.start(interval),
            Adapter::Droplet(a) | Adapter::Limitter(a) => a.start(interval),
        }
    }

    /// Commands changing the reading interval of a streaming transmitter.
    pub fn interval_commands(&self, interval: u8) -> Vec<Response> {
        match self {
            Adapter::MiaoMiao(_) => MiaoMiao::frequency_command(interval)
                .map(|c| Response::Write(c.to_vec()))
                .into_iter()
                .collect(),
            _ => vec![Response::Write(self.read_command(interval))],
        }
    }

    /// Interpret a notification from the data-read characteristic.
    pub fn handle(
        &mut self,
        data: &[u8],
        info: &mut DeviceInfo,
        sensor: &mut Option<Sensor>,
    ) -> Result<Vec<Response>, ResponseError> {
        match self {
            Adapter::Bubble(a) => a.handle(data, info, sensor),
            Adapter::MiaoMiao(a) => a.handle(data, info, sensor),
            Adapter::Droplet(a) | Adapter::Limitter(a) => a.handle(data, info, sensor),
        }
    }

    /// Return to [`Phase::Idle`], discarding any partial packet.
    pub fn reset(&mut self) {
        match self {
            Adapter::Bubble(a) => a.reset(),
            Adapter::MiaoMiao(a) => a.reset(),
            Adapter::Droplet(a) | Adapter::Limitter(a) => a.reset(),
        }
    }
}

/// A transmitter clipped onto a sensor.
#[derive(Debug, Clone)]
pub struct Transmitter {
    pub peripheral: PeripheralId,
    /// Advertised name.
    pub name: String,
    pub read_characteristic: Option<Uuid>,
    pub write_characteristic: Option<Uuid>,
    pub info: DeviceInfo,
    pub adapter: Adapter,
    pub sensor: Option<Sensor>,
}

impl Transmitter {
    /// Build a transmitter for a discovered peripheral, if its name matches a
    /// known family.
    pub fn new(peripheral: PeripheralId, name: &str) -> Option<Self> {
        let adapter = Adapter::new(TransmitterKind::from_name(name))?;

        Some(Self {
            peripheral,
            name: name.to_string(),
            read_characteristic: None,
            write_characteristic: None,
            info: DeviceInfo::default(),
            adapter,
            sensor: None,
        })
    }

    pub fn kind(&self) -> TransmitterKind {
        self.adapter.kind()
    }

    /// Name of the family, with the hardware revision where it is known.
    pub fn display_name(&self) -> String {
        match self.kind() {
            TransmitterKind::MiaoMiao if self.name.to_lowercase().contains("miaomiao2") => {
                "MiaoMiao 2".to_string()
            }
            kind => kind.to_string(),
        }
    }

    /// Interpret a notification from the data-read characteristic.
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<Response>, ResponseError> {
        self.adapter.handle(data, &mut self.info, &mut self.sensor)
    }
}

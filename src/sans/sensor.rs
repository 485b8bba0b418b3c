//! Sensor state accumulated over an acquisition session.

use core::fmt;

use log::info;

use super::{
    fram::{Fram, Integrity, Reading, SensorState},
    glucose::GlucoseMeasurement,
    serial::encode_serial,
};

/// Patch info reported by transmitters unable to read it from the sensor.
pub const DEFAULT_PATCH_INFO: [u8; 6] = [0xDF, 0x00, 0x00, 0x01, 0x01, 0x02];

/// Sensor generation, as encoded in patch info or a Droplet type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFamily {
    Libre1,
    Libre2,
    LibreUs14Day,
    LibrePro,
}

impl SensorFamily {
    /// Identify a sensor from the first byte of its patch info.
    pub fn from_patch_info(patch_info: &[u8]) -> Option<Self> {
        match patch_info.first()? {
            0xDF | 0xA2 => Some(Self::Libre1),
            0x9D | 0xC5 => Some(Self::Libre2),
            0xE5 | 0xE6 => Some(Self::LibreUs14Day),
            0x70 => Some(Self::LibrePro),
            _ => None,
        }
    }

    /// Identify a sensor from the two-digit suffix of a Droplet reading.
    pub fn from_type_code(code: &str) -> Option<Self> {
        match code {
            "10" => Some(Self::Libre1),
            "20" => Some(Self::Libre2),
            "30" => Some(Self::LibreUs14Day),
            "40" => Some(Self::LibrePro),
            _ => None,
        }
    }
}

impl fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorFamily::Libre1 => "Libre 1",
            SensorFamily::Libre2 => "Libre 2",
            SensorFamily::LibreUs14Day => "Libre US 14d",
            SensorFamily::LibrePro => "Libre Pro",
        })
    }
}

/// The latest glucose value known for a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentGlucose {
    pub value: i32,
    /// `false` for values derived from raw counts only.
    pub confirmed: bool,
}

/// A glucose sensor, as seen through a transmitter or an NFC read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sensor {
    pub uid: Option<[u8; 8]>,
    pub patch_info: Vec<u8>,
    pub family: Option<SensorFamily>,
    pub serial: Option<String>,
    pub fram: Option<Fram>,
    pub state: SensorState,
    /// Minutes since sensor start.
    pub age: u16,
    pub trend: Vec<GlucoseMeasurement>,
    pub history: Vec<GlucoseMeasurement>,
    pub current_glucose: Option<CurrentGlucose>,
    pub integrity: Integrity,
}

impl Sensor {
    /// Record the sensor identifier and derive its serial number.
    pub fn set_uid(&mut self, uid: [u8; 8]) {
        let serial = encode_serial(&uid);
        info!("Sensor uid: {}, serial number: {serial}", hex::encode(uid));

        self.uid = Some(uid);
        self.serial = Some(serial);
    }

    /// Record the patch info and the sensor family it encodes.
    pub fn set_patch_info(&mut self, patch_info: &[u8]) {
        self.patch_info = patch_info.to_vec();
        self.family = SensorFamily::from_patch_info(patch_info).or(self.family);
        info!("Patch info: {}", hex::encode(patch_info));
    }

    /// Replace decoded content with that of a new snapshot.
    pub fn apply(&mut self, fram: Fram, reading: Reading) {
        let Reading {
            state,
            age,
            trend,
            history,
            integrity,
        } = reading;

        self.current_glucose = trend.first().map(|m| CurrentGlucose {
            value: m.glucose(),
            confirmed: false,
        });

        self.fram = Some(fram);
        self.state = state;
        self.age = age;
        self.trend = trend;
        self.history = history;
        self.integrity = integrity;
    }
}

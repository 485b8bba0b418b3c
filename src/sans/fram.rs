//! Decoding of sensor FRAM snapshots.
//!
//! A snapshot is a fixed 344-byte image of the sensor's memory, split into a
//! header, a body and a footer, each covered by its own CRC:
//!
//! | Offset  | Content                                         |
//! |---------|-------------------------------------------------|
//! | 0–1     | header CRC, over 2–23                           |
//! | 4       | sensor state                                    |
//! | 24–25   | body CRC, over 26–319                           |
//! | 26      | trend ring write index (0–15)                   |
//! | 27      | history ring write index (0–31)                 |
//! | 28–123  | trend ring, 16 records of 6 bytes               |
//! | 124–315 | history ring, 32 records of 6 bytes             |
//! | 316–317 | minutes since sensor start, little-endian       |
//! | 320–321 | footer CRC, over 322–343                        |

use core::fmt;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, TryFromBytes};

use super::{
    check::{Mismatch, verify_crc},
    glucose::GlucoseMeasurement,
};

/// Size of a snapshot in bytes.
pub const FRAM_SIZE: usize = 344;
/// Number of entries in the trend ring (one per minute).
pub const TREND_LEN: usize = 16;
/// Number of entries in the history ring (one per 15 minutes).
pub const HISTORY_LEN: usize = 32;
/// Minutes between two history entries.
pub const HISTORY_INTERVAL: i64 = 15;

#[repr(C, packed)]
#[derive(FromBytes, Immutable)]
struct Layout {
    header_crc: [u8; 2],
    header: [u8; 22],
    body_crc: [u8; 2],
    trend_index: u8,
    history_index: u8,
    trend: [[u8; 6]; TREND_LEN],
    history: [[u8; 6]; HISTORY_LEN],
    age: [u8; 2],
    _reserved: [u8; 2],
    footer_crc: [u8; 2],
    footer: [u8; 22],
}

/// A sensor memory snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct Fram(pub(crate) [u8; FRAM_SIZE]);

impl Fram {
    /// The raw bytes of the snapshot.
    pub fn as_bytes(&self) -> &[u8; FRAM_SIZE] {
        &self.0
    }

    fn layout(&self) -> &Layout {
        zerocopy::transmute_ref!(&self.0)
    }
}

impl From<[u8; FRAM_SIZE]> for Fram {
    fn from(r: [u8; FRAM_SIZE]) -> Self {
        Self(r)
    }
}

impl TryFrom<&[u8]> for Fram {
    type Error = FramError;

    fn try_from(r: &[u8]) -> Result<Self, Self::Error> {
        let r = r.try_into().map_err(|_| FramError::Length(r.len()))?;
        Ok(Self(r))
    }
}

impl fmt::Debug for Fram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fram").field(&hex::encode(self.0)).finish()
    }
}

/// Life-cycle state reported by a sensor.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromBytes)]
pub enum SensorState {
    NotYetStarted = 0x01,
    Starting = 0x02,
    Ready = 0x03,
    Expired = 0x04,
    ShutDown = 0x05,
    Failure = 0x06,
    #[default]
    Unknown = 0x07,
}

impl SensorState {
    /// Map a state byte, treating unrecognized codes as [`SensorState::Unknown`].
    pub fn from_code(code: u8) -> Self {
        zerocopy::try_transmute!(code).unwrap_or(SensorState::Unknown)
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorState::NotYetStarted => "Not started",
            SensorState::Starting => "Starting",
            SensorState::Ready => "Ready",
            SensorState::Expired => "Expired",
            SensorState::ShutDown => "Shut down",
            SensorState::Failure => "Failed",
            SensorState::Unknown => "Unknown",
        })
    }
}

/// A region of the snapshot covered by its own CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Header,
    Body,
    Footer,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Region::Header => "header",
            Region::Body => "body",
            Region::Footer => "footer",
        })
    }
}

/// What to do when a region fails its CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrcPolicy {
    /// Log the mismatch and decode anyway.
    #[default]
    Advisory,
    /// Refuse to decode.
    Strict,
}

/// Outcome of the three integrity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Integrity {
    pub header: Option<Mismatch>,
    pub body: Option<Mismatch>,
    pub footer: Option<Mismatch>,
}

impl Integrity {
    /// Whether all three regions passed.
    pub fn is_intact(&self) -> bool {
        self.header.is_none() && self.body.is_none() && self.footer.is_none()
    }

    fn failures(&self) -> impl Iterator<Item = (Region, Mismatch)> {
        [
            (Region::Header, self.header),
            (Region::Body, self.body),
            (Region::Footer, self.footer),
        ]
        .into_iter()
        .filter_map(|(region, m)| Some((region, m?)))
    }
}

/// An error decoding a snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramError {
    /// Snapshots are exactly [`FRAM_SIZE`] bytes.
    #[error("Snapshot must be 344 bytes, found {0}.")]
    Length(usize),
    /// Calculated and found CRC values do not match.
    #[error("Calculated ({calculated:04x}) and found ({found:04x}) {region} CRC values do not match.")]
    CyclicRedundancyCheck {
        region: Region,
        found: u16,
        calculated: u16,
    },
}

/// The decoded content of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub state: SensorState,
    /// Minutes since sensor start.
    pub age: u16,
    /// Most recent first, one minute apart.
    pub trend: Vec<GlucoseMeasurement>,
    /// Most recent first, fifteen minutes apart.
    pub history: Vec<GlucoseMeasurement>,
    pub integrity: Integrity,
}

/// Check the three CRC regions of a snapshot.
pub fn check(fram: &Fram) -> Integrity {
    let r = fram.as_bytes();
    let layout = fram.layout();

    Integrity {
        header: verify_crc(layout.header_crc, &layout.header).err(),
        body: verify_crc(layout.body_crc, &r[26..320]).err(),
        footer: verify_crc(layout.footer_crc, &layout.footer).err(),
    }
}

/// Decode a snapshot taken at `now`.
pub fn decode(fram: &Fram, now: DateTime<Utc>, policy: CrcPolicy) -> Result<Reading, FramError> {
    let integrity = check(fram);

    for (region, Mismatch { found, calculated }) in integrity.failures() {
        match policy {
            CrcPolicy::Advisory => {
                warn!("FRAM {region} CRC16 {found:04x} does not match computed {calculated:04x}");
            }
            CrcPolicy::Strict => Err(FramError::CyclicRedundancyCheck {
                region,
                found,
                calculated,
            })?,
        }
    }

    let layout = fram.layout();

    let state = SensorState::from_code(layout.header[2]);
    let age = u16::from_le_bytes(layout.age);

    info!(
        "Sensor state: {state}, minutes since start: {age} ({:.1} days)",
        age as f64 / 60.0 / 24.0
    );

    let trend: Vec<_> = ring_order(layout.trend_index as usize, TREND_LEN)
        .enumerate()
        .map(|(i, j)| {
            let date = now - Duration::minutes(i as i64);
            GlucoseMeasurement::from_record(layout.trend[j], date)
        })
        .collect();

    let history: Vec<_> = ring_order(layout.history_index as usize, HISTORY_LEN)
        .enumerate()
        .map(|(i, j)| {
            let elapsed = HISTORY_INTERVAL * (i as i64 + 1);
            let date = now - Duration::minutes(elapsed);
            let mut measurement = GlucoseMeasurement::from_record(layout.history[j], date);
            measurement.minutes_counter = (age as i64)
                .checked_sub(elapsed)
                .and_then(|m| u16::try_from(m).ok());
            measurement
        })
        .collect();

    info!("Raw trend: {:?}", raw_values(&trend));
    info!("Raw history: {:?}", raw_values(&history));

    Ok(Reading {
        state,
        age,
        trend,
        history,
        integrity,
    })
}

/// Record indices of a ring buffer, most recently written first.
///
/// `write_index` is the slot the sensor will write next; out-of-range indices
/// are reduced modulo `len`.
pub fn ring_order(write_index: usize, len: usize) -> impl Iterator<Item = usize> {
    let w = write_index % len;
    (0..len).map(move |i| (w + 2 * len - 1 - i) % len)
}

fn raw_values(measurements: &[GlucoseMeasurement]) -> Vec<u16> {
    measurements.iter().map(|m| m.raw_glucose).collect()
}

//! Glucose measurements and the calibration transform.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tartan_bitfield::bitfield;

/// Coefficients of a temperature-compensated linear calibration.
///
/// Supplied by the remote calibration service. The slope and offset applied
/// to a raw glucose count are themselves linear in the raw temperature.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CalibrationParameters {
    pub slope_slope: f64,
    pub slope_offset: f64,
    pub offset_offset: f64,
    pub offset_slope: f64,
}

/// How a measurement's raw counts are converted to a glucose value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Calibration {
    /// Fixed factory transform: slope 0.1, offset 0.0.
    #[default]
    Default,
    /// Plain linear transform, independent of temperature.
    Linear { slope: f64, offset: f64 },
    /// Temperature-compensated transform.
    Compensated(CalibrationParameters),
}

impl Calibration {
    const DEFAULT_SLOPE: f64 = 0.1;
    const DEFAULT_OFFSET: f64 = 0.0;

    /// Slope and offset applying at a raw temperature.
    fn coefficients(&self, raw_temperature: u16) -> (f64, f64) {
        let t = raw_temperature as f64;
        match *self {
            Calibration::Default => (Self::DEFAULT_SLOPE, Self::DEFAULT_OFFSET),
            Calibration::Linear { slope, offset } => (slope, offset),
            Calibration::Compensated(p) => (
                p.slope_slope * t + p.offset_slope,
                p.slope_offset * t + p.offset_offset,
            ),
        }
    }
}

/// Convert raw counts to a glucose value (mg/dL).
pub fn calibrate(raw_glucose: u16, raw_temperature: u16, calibration: &Calibration) -> i32 {
    let (slope, offset) = calibration.coefficients(raw_temperature);
    (offset + slope * raw_glucose as f64).round() as i32
}

/// A single raw sample with its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseMeasurement {
    pub raw_glucose: u16,
    pub raw_temperature: u16,
    /// Minutes since sensor start, for history entries.
    pub minutes_counter: Option<u16>,
    pub date: DateTime<Utc>,
    pub calibration: Calibration,
}

impl GlucoseMeasurement {
    /// Build a measurement with the default calibration.
    pub fn new(raw_glucose: u16, raw_temperature: u16, date: DateTime<Utc>) -> Self {
        Self {
            raw_glucose,
            raw_temperature,
            minutes_counter: None,
            date,
            calibration: Calibration::Default,
        }
    }

    /// Decode a 6-byte FRAM record.
    ///
    /// The raw glucose count is held in the low 13 bits of the first
    /// little-endian word, the raw temperature in the low 14 bits of the word
    /// starting at the fourth byte.
    pub fn from_record(r: [u8; 6], date: DateTime<Utc>) -> Self {
        bitfield! {
            struct Glucose(u16) {
                [0..13] value: u16,
            }
        }

        bitfield! {
            struct Temperature(u16) {
                [0..14] value: u16,
            }
        }

        let glucose = Glucose(u16::from_le_bytes([r[0], r[1]]));
        let temperature = Temperature(u16::from_le_bytes([r[3], r[4]]));

        Self::new(glucose.value(), temperature.value(), date)
    }

    /// Glucose value (mg/dL) under this measurement's calibration.
    pub fn glucose(&self) -> i32 {
        calibrate(self.raw_glucose, self.raw_temperature, &self.calibration)
    }

    /// A copy of this measurement under the remote calibration parameters.
    pub fn calibrated(&self, parameters: CalibrationParameters) -> Self {
        Self {
            calibration: Calibration::Compensated(parameters),
            ..self.clone()
        }
    }
}

/// The glucose values of a sequence of measurements.
pub fn values(measurements: &[GlucoseMeasurement]) -> Vec<i32> {
    measurements.iter().map(GlucoseMeasurement::glucose).collect()
}

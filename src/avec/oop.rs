//! Client for the remote calibration ("OOP") service.
//!
//! Two endpoints are used, both taking a URL-encoded form:
//!
//! - `calibrateSensor` returns the [`CalibrationParameters`] for a snapshot;
//! - `libreoop2` returns the service's own reading of a snapshot, with the
//!   real-time glucose, a history, an alarm and a trend arrow.
//!
//! Requests run on one-shot threads and report an [`Outcome`] over a
//! channel, tagged with the sequence number of the snapshot they were made
//! for.

use std::{sync::Arc, thread};

use chrono::{DateTime, Duration, Utc};
use crossbeam::channel::Sender;
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    config::OopConfig,
    sans::{
        fram::{Fram, HISTORY_INTERVAL},
        glucose::{Calibration, CalibrationParameters, GlucoseMeasurement},
    },
};

pub const CALIBRATION_ENDPOINT: &str = "calibrateSensor";
pub const HISTORY_ENDPOINT: &str = "libreoop2";

/// An error from the remote calibration service.
#[derive(Debug, Error)]
pub enum OopError {
    /// The request did not complete.
    #[error("Connection failed: {0}")]
    Connection(String),
    /// The service answered with a non-success HTTP status.
    #[error("Service answered with HTTP status {0}.")]
    Status(u16),
    /// The service answered with a non-zero error code.
    #[error("Service returned error code {0}.")]
    ErrorCode(i64),
    /// The service answered with an error payload.
    #[error("Service reported an error: {0}")]
    Reported(String),
    /// The body is not the expected JSON.
    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The body lacks a required field.
    #[error("Response lacks {0}.")]
    Missing(&'static str),
}

impl OopError {
    /// Whether the request failed before the service answered.
    pub fn is_connection(&self) -> bool {
        matches!(self, OopError::Connection(_))
    }
}

/// Transport posting URL-encoded forms.
pub trait Transport: Send + Sync {
    /// Post `form` to `url`, returning the response body.
    fn post_form(&self, url: &str, form: &[(&'static str, String)]) -> Result<Vec<u8>, OopError>;
}

/// Blocking HTTP transport.
///
/// _Requires Cargo feature `http`._
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new(timeout: std::time::Duration) -> Result<Self, OopError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OopError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl Transport for HttpTransport {
    fn post_form(&self, url: &str, form: &[(&'static str, String)]) -> Result<Vec<u8>, OopError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .map_err(|e| OopError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            Err(OopError::Status(status.as_u16()))?
        }

        let body = response
            .bytes()
            .map_err(|e| OopError::Connection(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationResponse {
    errcode: i64,
    #[serde(rename = "slope")]
    parameters: Option<CalibrationParameters>,
}

/// A glucose value as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricGlucose {
    /// Non-zero for unusable entries.
    pub data_quality: i32,
    /// Minutes since sensor start.
    pub id: i32,
    /// Glucose (mg/dL).
    pub value: i32,
}

/// The service's reading of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    /// `GLUCOSE_OK`, `LOW_GLUCOSE`, `PROJECTED_HIGH_GLUCOSE`, ...
    pub alarm: String,
    pub esa_minutes_to_wait: i32,
    pub historic_glucose: Vec<HistoricGlucose>,
    pub is_actionable: bool,
    pub lsa_detected: bool,
    pub real_time_glucose: HistoricGlucose,
    /// `FALLING_QUICKLY`, `STABLE`, `RISING`, ...
    pub trend_arrow: String,
}

impl HistoryResponse {
    /// The current measurement and the history, most recent first.
    ///
    /// History entries are fifteen minutes apart counting back from `date`.
    /// Entries of non-zero data quality are skipped but keep their slot in
    /// the timeline.
    pub fn glucose_data(&self, date: DateTime<Utc>) -> (GlucoseMeasurement, Vec<GlucoseMeasurement>) {
        let current = remote_measurement(&self.real_time_glucose, date);

        let mut entries = self.historic_glucose.clone();
        if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
            if first.id < last.id {
                entries.reverse();
            }
        }

        let history = entries
            .iter()
            .enumerate()
            .filter(|(_, g)| g.data_quality == 0)
            .map(|(i, g)| {
                let date = date - Duration::minutes(HISTORY_INTERVAL * (i as i64 + 1));
                remote_measurement(g, date)
            })
            .collect();

        (current, history)
    }
}

/// Service values are already in mg/dL.
fn remote_measurement(g: &HistoricGlucose, date: DateTime<Utc>) -> GlucoseMeasurement {
    GlucoseMeasurement {
        raw_glucose: g.value.clamp(0, u16::MAX as i32) as u16,
        raw_temperature: 0,
        minutes_counter: u16::try_from(g.id).ok(),
        date,
        calibration: Calibration::Linear {
            slope: 1.0,
            offset: 0.0,
        },
    }
}

/// Parse a `calibrateSensor` response body.
pub fn parse_calibration(body: &[u8]) -> Result<CalibrationParameters, OopError> {
    let response: CalibrationResponse = serde_json::from_slice(body)?;

    if response.errcode != 0 {
        Err(OopError::ErrorCode(response.errcode))?
    }

    response.parameters.ok_or(OopError::Missing("slope"))
}

/// Parse a `libreoop2` response body.
pub fn parse_history(body: &[u8]) -> Result<HistoryResponse, OopError> {
    let text = String::from_utf8_lossy(body);

    if text.contains("errcode") {
        Err(OopError::Reported(text.into_owned()))?
    }

    Ok(serde_json::from_slice(body)?)
}

/// What a request is sent for.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Sequence number of the snapshot.
    pub sequence: u64,
    pub fram: Fram,
    pub uid: Option<[u8; 8]>,
    pub patch_info: Vec<u8>,
    pub now: DateTime<Utc>,
}

/// The result of a request, reported back to the engine.
#[derive(Debug)]
pub enum Outcome {
    Calibration {
        sequence: u64,
        result: Result<CalibrationParameters, OopError>,
    },
    History {
        sequence: u64,
        received: DateTime<Utc>,
        result: Result<HistoryResponse, OopError>,
    },
}

impl Outcome {
    pub fn sequence(&self) -> u64 {
        match self {
            Outcome::Calibration { sequence, .. } | Outcome::History { sequence, .. } => *sequence,
        }
    }
}

/// Client for both endpoints.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    site: String,
    token: String,
}

impl Client {
    pub fn new(transport: impl Transport + 'static, config: &OopConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            site: config.site.clone(),
            token: config.token.clone(),
        }
    }

    /// Form for the calibration endpoint.
    pub fn calibration_form(&self, fram: &Fram, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        vec![
            ("content", hex::encode(fram.as_bytes())),
            ("token", self.token.clone()),
            ("timestamp", now.timestamp_millis().to_string()),
        ]
    }

    /// Form for the history endpoint.
    pub fn history_form(
        &self,
        fram: &Fram,
        uid: Option<[u8; 8]>,
        patch_info: &[u8],
    ) -> Vec<(&'static str, String)> {
        vec![
            ("content", hex::encode(fram.as_bytes())),
            ("accesstoken", self.token.clone()),
            ("patchUid", uid.map(hex::encode).unwrap_or_default()),
            ("patchInfo", hex::encode(patch_info)),
        ]
    }

    /// Request calibration parameters, blocking.
    pub fn calibrate(&self, fram: &Fram, now: DateTime<Utc>) -> Result<CalibrationParameters, OopError> {
        let url = format!("{}{CALIBRATION_ENDPOINT}", self.site);
        info!("Sending FRAM to {url} for calibration");

        let body = self.transport.post_form(&url, &self.calibration_form(fram, now))?;
        debug!("Calibration response: {}", String::from_utf8_lossy(&body));

        parse_calibration(&body)
    }

    /// Request the service's reading, blocking.
    pub fn history(
        &self,
        fram: &Fram,
        uid: Option<[u8; 8]>,
        patch_info: &[u8],
    ) -> Result<HistoryResponse, OopError> {
        let url = format!("{}{HISTORY_ENDPOINT}", self.site);
        info!("Sending FRAM to {url} for measurements");

        let body = self
            .transport
            .post_form(&url, &self.history_form(fram, uid, patch_info))?;
        debug!("Measurements response: {}", String::from_utf8_lossy(&body));

        parse_history(&body)
    }

    /// Run the requests for a snapshot on one-shot threads.
    ///
    /// The history request is only made when the patch info is known.
    pub fn spawn(&self, job: Job, outcomes: Sender<Outcome>) {
        let client = self.clone();
        let calibration = job.clone();
        let sender = outcomes.clone();

        thread::spawn(move || {
            let result = client.calibrate(&calibration.fram, calibration.now);
            send(
                &sender,
                Outcome::Calibration {
                    sequence: calibration.sequence,
                    result,
                },
            );
        });

        if job.patch_info.is_empty() {
            return;
        }

        let client = self.clone();
        thread::spawn(move || {
            let result = client.history(&job.fram, job.uid, &job.patch_info);
            send(
                &outcomes,
                Outcome::History {
                    sequence: job.sequence,
                    received: Utc::now(),
                    result,
                },
            );
        });
    }
}

fn send(sender: &Sender<Outcome>, outcome: Outcome) {
    if sender.send(outcome).is_err() {
        warn!("Engine stopped before the remote outcome arrived");
    }
}

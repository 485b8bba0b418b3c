use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{TimeZone, Utc};
use crossbeam::channel;
use lancet::{
    avec::oop::{
        CALIBRATION_ENDPOINT, Client, HISTORY_ENDPOINT, Job, OopError, Outcome, Transport,
        parse_calibration, parse_history,
    },
    config::OopConfig,
    sans::{
        fram::Fram,
        glucose::{Calibration, CalibrationParameters},
    },
};

fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(format!("fixtures/oop/{name}")).unwrap()
}

fn fram() -> Fram {
    let data = std::fs::read("fixtures/sensor.fram").unwrap();
    Fram::try_from(data.as_slice()).unwrap()
}

type Request = (String, Vec<(&'static str, String)>);

/// Transport answering each endpoint from a queue.
#[derive(Clone, Default)]
struct Queued {
    calibration: Arc<Mutex<VecDeque<Result<Vec<u8>, OopError>>>>,
    history: Arc<Mutex<VecDeque<Result<Vec<u8>, OopError>>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl Transport for Queued {
    fn post_form(&self, url: &str, form: &[(&'static str, String)]) -> Result<Vec<u8>, OopError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), form.to_vec()));

        let queue = if url.ends_with(CALIBRATION_ENDPOINT) {
            &self.calibration
        } else {
            &self.history
        };
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OopError::Connection("no response queued".to_string())))
    }
}

#[test]
fn calibration_response() {
    assert_eq!(
        parse_calibration(&fixture("calibration.json")).unwrap(),
        CalibrationParameters {
            slope_slope: 0.000_015,
            slope_offset: -0.000_02,
            offset_offset: -20.0,
            offset_slope: 0.1,
        }
    );
}

#[test]
fn calibration_errors() {
    let err = parse_calibration(&fixture("calibration-error.json")).unwrap_err();
    assert!(matches!(err, OopError::ErrorCode(2)));
    assert!(!err.is_connection());

    let err = parse_calibration(br#"{"errcode": 0}"#).unwrap_err();
    assert!(matches!(err, OopError::Missing("slope")));

    let err = parse_calibration(b"<html>Bad Gateway</html>").unwrap_err();
    assert!(matches!(err, OopError::Malformed(_)));
    assert!(!OopError::Status(502).is_connection());
}

#[test]
fn history_response() {
    let response = parse_history(&fixture("history.json")).unwrap();

    assert_eq!(response.alarm, "GLUCOSE_OK");
    assert_eq!(response.trend_arrow, "STABLE");
    assert!(response.is_actionable);
    assert!(!response.lsa_detected);
    assert_eq!(response.historic_glucose.len(), 4);
    assert_eq!(response.real_time_glucose.value, 104);
}

#[test]
fn history_errors() {
    let err = parse_history(&fixture("history-error.json")).unwrap_err();
    assert!(matches!(err, OopError::Reported(_)));

    let err = parse_history(b"{}").unwrap_err();
    assert!(matches!(err, OopError::Malformed(_)));
}

#[test]
fn glucose_data() {
    let response = parse_history(&fixture("history.json")).unwrap();
    let date = Utc.with_ymd_and_hms(2019, 11, 5, 8, 30, 0).unwrap();

    let (current, history) = response.glucose_data(date);

    assert_eq!(current.glucose(), 104);
    assert_eq!(current.date, date);
    assert_eq!(current.minutes_counter, Some(4321));
    assert_eq!(
        current.calibration,
        Calibration::Linear {
            slope: 1.0,
            offset: 0.0
        }
    );

    let values: Vec<_> = history.iter().map(|m| m.glucose()).collect();
    assert_eq!(values, [110, 112, 108]);

    let minutes: Vec<_> = history.iter().map(|m| (date - m.date).num_minutes()).collect();
    assert_eq!(minutes, [15, 30, 60]);
}

#[test]
fn glucose_data_oldest_first() {
    let mut response = parse_history(&fixture("history.json")).unwrap();
    response.historic_glucose.reverse();

    let (_, history) = response.glucose_data(Utc::now());
    let values: Vec<_> = history.iter().map(|m| m.glucose()).collect();
    assert_eq!(values, [110, 112, 108]);
}

#[test]
fn forms() {
    let config = OopConfig::default();
    let client = Client::new(Queued::default(), &config);
    let now = Utc.timestamp_millis_opt(1_572_942_600_123).unwrap();
    let fram = fram();

    let form = client.calibration_form(&fram, now);
    assert_eq!(form[0].0, "content");
    assert_eq!(form[0].1, hex::encode(fram.as_bytes()));
    assert_eq!(form[0].1.len(), 688);
    assert_eq!(form[1], ("token", "bubble-201907".to_string()));
    assert_eq!(form[2], ("timestamp", "1572942600123".to_string()));

    let uid = [0x1a, 0x5c, 0x6e, 0x00, 0x00, 0xa0, 0x07, 0xe0];
    let form = client.history_form(&fram, Some(uid), &[0xdf, 0x00, 0x00, 0x01, 0x01, 0x02]);
    assert_eq!(form[1], ("accesstoken", "bubble-201907".to_string()));
    assert_eq!(form[2], ("patchUid", "1a5c6e0000a007e0".to_string()));
    assert_eq!(form[3], ("patchInfo", "df0000010102".to_string()));

    let form = client.history_form(&fram, None, &[]);
    assert_eq!(form[2], ("patchUid", String::new()));
}

#[test]
fn calibrate() {
    let transport = Queued::default();
    transport
        .calibration
        .lock()
        .unwrap()
        .push_back(Ok(fixture("calibration.json")));

    let client = Client::new(transport.clone(), &OopConfig::default());
    let parameters = client.calibrate(&fram(), Utc::now()).unwrap();
    assert_eq!(parameters.offset_offset, -20.0);

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[0].0, "http://www.glucose.space/calibrateSensor");

    drop(requests);
    let err = client.calibrate(&fram(), Utc::now()).unwrap_err();
    assert!(err.is_connection());
}

#[test]
fn spawn_calibration_only() {
    let transport = Queued::default();
    transport
        .calibration
        .lock()
        .unwrap()
        .push_back(Ok(fixture("calibration.json")));

    let client = Client::new(transport.clone(), &OopConfig::default());
    let (sender, receiver) = channel::unbounded();

    client.spawn(
        Job {
            sequence: 7,
            fram: fram(),
            uid: None,
            patch_info: Vec::new(),
            now: Utc::now(),
        },
        sender,
    );

    let outcome = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.sequence(), 7);
    assert!(matches!(outcome, Outcome::Calibration { result: Ok(_), .. }));

    // Both senders are dropped once the only request completes.
    assert!(receiver.recv_timeout(Duration::from_secs(5)).is_err());
    assert_eq!(transport.requests.lock().unwrap().len(), 1);
}

#[test]
fn spawn_both() {
    let transport = Queued::default();
    transport
        .calibration
        .lock()
        .unwrap()
        .push_back(Ok(fixture("calibration.json")));
    transport
        .history
        .lock()
        .unwrap()
        .push_back(Ok(fixture("history.json")));

    let client = Client::new(transport.clone(), &OopConfig::default());
    let (sender, receiver) = channel::unbounded();

    client.spawn(
        Job {
            sequence: 1,
            fram: fram(),
            uid: Some([0; 8]),
            patch_info: vec![0xdf, 0x00, 0x00, 0x01, 0x01, 0x02],
            now: Utc::now(),
        },
        sender,
    );

    let outcomes: Vec<_> = receiver.iter().collect();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().any(|o| matches!(o, Outcome::Calibration { result: Ok(_), .. })));
    assert!(outcomes.iter().any(|o| matches!(o, Outcome::History { result: Ok(_), .. })));

    let requests = transport.requests.lock().unwrap();
    assert!(
        requests
            .iter()
            .any(|(url, _)| url.ends_with(HISTORY_ENDPOINT))
    );
}

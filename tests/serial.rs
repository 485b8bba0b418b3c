use csv::ReaderBuilder;
use lancet::sans::{
    sensor::Sensor,
    serial::{SerialError, encode_serial, serial_number},
};

#[test]
fn serial_numbers() {
    const PATH: &str = "fixtures/serials.csv";

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .from_path(PATH)
        .unwrap();

    let mut rows = 0;
    for record in reader.records() {
        let record = record.unwrap();
        let uid = hex::decode(&record[0]).unwrap();

        let serial = serial_number(&uid).unwrap();
        assert_eq!(serial, &record[1], "uid {}", &record[0]);
        assert_eq!(serial.len(), 11);
        rows += 1;
    }

    assert_eq!(rows, 5);
}

#[test]
fn deterministic() {
    let uid = [0x1a, 0x5c, 0x6e, 0x00, 0x00, 0xa0, 0x07, 0xe0];
    assert_eq!(serial_number(&uid), serial_number(&uid));
}

#[test]
fn high_bytes_ignored() {
    let a = [0x1a, 0x5c, 0x6e, 0x00, 0x00, 0xa0, 0x07, 0xe0];
    let b = [0x1a, 0x5c, 0x6e, 0x00, 0x00, 0xa0, 0xff, 0xff];
    assert_eq!(serial_number(&a).unwrap(), serial_number(&b).unwrap());
}

#[test]
fn invalid_length() {
    assert_eq!(serial_number(&[0; 7]), Err(SerialError::InvalidLength(7)));
    assert_eq!(serial_number(&[0; 9]), Err(SerialError::InvalidLength(9)));
    assert_eq!(serial_number(&[]), Err(SerialError::InvalidLength(0)));
}

#[test]
fn sensor_serial() {
    let uid = [0xd2, 0xfb, 0x3c, 0x02, 0x00, 0xa0, 0x07, 0xe0];
    assert_eq!(encode_serial(&uid), "0M0004G7VU8");

    let mut sensor = Sensor::default();
    sensor.set_uid(uid);
    assert_eq!(sensor.uid, Some(uid));
    assert_eq!(sensor.serial.as_deref(), Some("0M0004G7VU8"));
}

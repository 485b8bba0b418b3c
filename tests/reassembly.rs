use lancet::sans::{
    fram::Fram,
    reassembly::{BUBBLE_PACKET_LEN, Framing, MIAOMIAO_MAX_PACKET_LEN, MIAOMIAO_PACKET_LEN, Reassembler},
    vendor::{Adapter, DeviceInfo, Response, TransmitterKind},
};

fn fixture() -> Vec<u8> {
    std::fs::read("fixtures/sensor.fram").unwrap()
}

#[test]
fn fixed_length_packet() {
    let mut reassembler = Reassembler::new(Framing::Fixed(BUBBLE_PACKET_LEN));
    let packet: Vec<u8> = (0..BUBBLE_PACKET_LEN).map(|i| i as u8).collect();

    assert_eq!(reassembler.push(&packet[..150]), None);
    assert_eq!(reassembler.len(), 150);
    assert_eq!(reassembler.push(&packet[150..300]), None);
    assert_eq!(reassembler.push(&packet[300..]), Some(packet));
    assert!(reassembler.is_empty());
}

#[test]
fn overflow_truncated() {
    let mut reassembler = Reassembler::new(Framing::Fixed(8));

    assert_eq!(reassembler.push(&[1, 2, 3, 4, 5]), None);
    assert_eq!(reassembler.push(&[6, 7, 8, 9, 10]), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
    assert!(reassembler.is_empty());
}

#[test]
fn declared_length() {
    let framing = Framing::Declared {
        default: MIAOMIAO_PACKET_LEN,
        max: MIAOMIAO_MAX_PACKET_LEN,
    };

    let mut reassembler = Reassembler::new(framing);
    assert_eq!(reassembler.target_len(), MIAOMIAO_PACKET_LEN);

    let mut packet = vec![0x28, 0x01, 0x71];
    packet.resize(369, 0xAA);

    assert_eq!(reassembler.push(&packet[..20]), None);
    assert_eq!(reassembler.target_len(), 369);
    assert_eq!(reassembler.push(&packet[20..363]), None);
    assert_eq!(reassembler.push(&packet[363..]), Some(packet));
}

#[test]
fn declared_length_out_of_range() {
    let framing = Framing::Declared {
        default: MIAOMIAO_PACKET_LEN,
        max: MIAOMIAO_MAX_PACKET_LEN,
    };
    let mut reassembler = Reassembler::new(framing);

    reassembler.push(&[0x28, 0xFF, 0xFF]);
    assert_eq!(reassembler.target_len(), MIAOMIAO_PACKET_LEN);

    reassembler.reset();
    reassembler.push(&[0x28, 0x00, 0x10]);
    assert_eq!(reassembler.target_len(), MIAOMIAO_PACKET_LEN);
}

#[test]
fn single_notification() {
    let mut reassembler = Reassembler::new(Framing::Single);
    assert_eq!(reassembler.push(b"1234"), Some(b"1234".to_vec()));
    assert!(reassembler.is_empty());
}

/// Three Bubble data packet notifications carrying a snapshot and its
/// trailer produce the snapshot once.
#[test]
fn bubble_fragments() {
    let fram = fixture();
    let mut payload = fram.clone();
    payload.extend_from_slice(&[0xEE; 8]);
    assert_eq!(payload.len(), BUBBLE_PACKET_LEN);

    let mut adapter = Adapter::new(TransmitterKind::Bubble).unwrap();
    let mut info = DeviceInfo::default();
    let mut sensor = None;

    let mut snapshots = Vec::new();
    for chunk in [&payload[..116], &payload[116..232], &payload[232..]] {
        let mut notification = vec![0x82, 0x00, 0x00, 0x00];
        notification.extend_from_slice(chunk);

        for response in adapter.handle(&notification, &mut info, &mut sensor).unwrap() {
            if let Response::Snapshot(fram) = response {
                snapshots.push(fram);
            }
        }
    }

    assert_eq!(snapshots, [Fram::try_from(fram.as_slice()).unwrap()]);

    // The buffer is empty again: a lone fragment does not complete a packet.
    let mut notification = vec![0x82, 0x00, 0x00, 0x00];
    notification.extend_from_slice(&payload[..116]);
    let responses = adapter.handle(&notification, &mut info, &mut sensor).unwrap();
    assert!(responses.is_empty());
}

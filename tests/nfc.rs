use chrono::Utc;
use lancet::{
    avec::nfc::{CancelHandle, Iso15693, Reader, SystemInformation, TagError},
    sans::{
        fram::{CrcPolicy, SensorState},
        nfc::{BLOCK_COUNT, BlockRequest, NfcError, ReadMode, Session, block_dump},
        sensor::{DEFAULT_PATCH_INFO, SensorFamily},
    },
};

const UID: [u8; 8] = [0x1a, 0x5c, 0x6e, 0x00, 0x00, 0xa0, 0x07, 0xe0];

struct Tag {
    memory: Vec<u8>,
    block_size: usize,
    fail_at: Option<u8>,
    cancel_after: Option<(usize, CancelHandle)>,
    reads: usize,
}

impl Tag {
    fn new() -> Self {
        let mut memory = std::fs::read("fixtures/sensor.fram").unwrap();
        memory.resize(244 * 8, 0);

        Self {
            memory,
            block_size: 8,
            fail_at: None,
            cancel_after: None,
            reads: 0,
        }
    }

    fn block(&self, block: u8) -> Result<Vec<u8>, TagError> {
        if self.fail_at == Some(block) {
            return Err(TagError("Tag response error".to_string()));
        }
        let start = block as usize * 8;
        Ok(self.memory[start..start + 8].to_vec())
    }

    fn count_read(&mut self) {
        self.reads += 1;
        if let Some((after, handle)) = &self.cancel_after {
            if self.reads == *after {
                handle.cancel();
            }
        }
    }
}

impl Iso15693 for Tag {
    fn identifier(&self) -> Vec<u8> {
        UID.iter().rev().copied().collect()
    }

    fn connect(&mut self) -> Result<(), TagError> {
        Ok(())
    }

    fn system_info(&mut self) -> Result<SystemInformation, TagError> {
        Ok(SystemInformation {
            block_size: self.block_size,
            block_count: 244,
            ic_reference: 0x07,
        })
    }

    fn custom_command(&mut self, code: u8, parameters: &[u8]) -> Result<Vec<u8>, TagError> {
        assert_eq!(code, 0xA1);
        assert_eq!(parameters, [0x07]);
        Ok(DEFAULT_PATCH_INFO.to_vec())
    }

    fn read_single_block(&mut self, block: u8) -> Result<Vec<u8>, TagError> {
        self.count_read();
        self.block(block)
    }

    fn read_multiple_blocks(&mut self, first: u8, count: u8) -> Result<Vec<Vec<u8>>, TagError> {
        self.count_read();
        (first..first + count).map(|b| self.block(b)).collect()
    }
}

#[test]
fn single_block_reads() {
    let reader = Reader::new(ReadMode::Single);
    let mut tag = Tag::new();

    let ticket = reader.start();
    let acquisition = reader.read(&ticket, &mut tag).unwrap();

    assert_eq!(tag.reads, BLOCK_COUNT as usize);
    assert_eq!(acquisition.uid, UID);
    assert_eq!(acquisition.patch_info, DEFAULT_PATCH_INFO);
    assert_eq!(acquisition.fram.as_bytes()[..], tag.memory[..344]);

    let sensor = acquisition.into_sensor(Utc::now(), CrcPolicy::Strict).unwrap();
    assert_eq!(sensor.serial.as_deref(), Some("0M0000VKW38"));
    assert_eq!(sensor.family, Some(SensorFamily::Libre1));
    assert_eq!(sensor.state, SensorState::Ready);
    assert_eq!(sensor.age, 4321);
    assert_eq!(sensor.trend.len(), 16);
    assert_eq!(sensor.history.len(), 32);
}

#[test]
fn multiple_block_reads() {
    let reader = Reader::new(ReadMode::Multiple);
    let mut tag = Tag::new();

    let ticket = reader.start();
    let acquisition = reader.read(&ticket, &mut tag).unwrap();

    assert_eq!(tag.reads, 15);
    assert_eq!(acquisition.fram.as_bytes()[..], tag.memory[..344]);
}

#[test]
fn last_multiple_read_is_short() {
    let mut blocks = Session::begin(&UID, ReadMode::Multiple)
        .unwrap()
        .advance(8, 244)
        .unwrap()
        .advance(&DEFAULT_PATCH_INFO);

    for _ in 0..14 {
        blocks = blocks.advance(&[0; 24]).unwrap().left().unwrap();
    }

    assert_eq!(blocks.read(), 42);
    assert_eq!(
        blocks.request(),
        BlockRequest::Multiple {
            first: 42,
            count: 1
        }
    );
    assert!(blocks.advance(&[0; 8]).unwrap().is_right());
}

#[test]
fn block_length() {
    let blocks = Session::begin(&UID, ReadMode::Single)
        .unwrap()
        .advance(8, 244)
        .unwrap()
        .advance(&DEFAULT_PATCH_INFO);

    let err = blocks.advance(&[0; 4]).unwrap_err();
    assert_eq!(
        err,
        NfcError::BlockLength {
            block: 0,
            found: 4,
            expected: 8
        }
    );
    assert_eq!(err.user_message(), "Unsupported sensor");
}

#[test]
fn read_failure() {
    let reader = Reader::new(ReadMode::Single);
    let mut tag = Tag {
        fail_at: Some(7),
        ..Tag::new()
    };

    let ticket = reader.start();
    let err = reader.read(&ticket, &mut tag).unwrap_err();

    assert_eq!(
        err,
        NfcError::ReadBlock {
            block: 7,
            reason: "Tag response error".to_string()
        }
    );
    assert_eq!(
        err.user_message(),
        "Error while reading blocks: Tag response error"
    );
    assert_eq!(tag.reads, 8);
}

#[test]
fn unsupported_tags() {
    let reader = Reader::new(ReadMode::Single);

    let mut tag = Tag {
        block_size: 4,
        ..Tag::new()
    };
    let err = reader.read(&reader.start(), &mut tag).unwrap_err();
    assert_eq!(err, NfcError::BlockSize(4));
    assert_eq!(tag.reads, 0);

    assert_eq!(
        Session::begin(&UID[..7], ReadMode::Single).unwrap_err(),
        NfcError::Identifier(7)
    );
    assert_eq!(
        Session::begin(&UID, ReadMode::Single)
            .unwrap()
            .advance(8, 40)
            .unwrap_err(),
        NfcError::MemorySize(40)
    );
}

#[test]
fn superseded() {
    let reader = Reader::new(ReadMode::Single);
    let mut tag = Tag::new();

    let first = reader.start();
    let second = reader.start();

    let err = reader.read(&first, &mut tag).unwrap_err();
    assert_eq!(err, NfcError::Superseded);
    assert_eq!(err.user_message(), "Scan cancelled");

    assert!(reader.read(&second, &mut tag).is_ok());
}

#[test]
fn cancelled_mid_session() {
    let reader = Reader::new(ReadMode::Single);
    let ticket = reader.start();
    let mut tag = Tag {
        cancel_after: Some((5, ticket.cancel_handle())),
        ..Tag::new()
    };

    let err = reader.read(&ticket, &mut tag).unwrap_err();
    assert_eq!(err, NfcError::Cancelled);
    assert_eq!(tag.reads, 5);
}

#[test]
fn dump() {
    assert_eq!(
        block_dump(&[0x0a, 0xff, 0x00, 0x10]),
        "0A FF 00 10"
    );
    assert_eq!(block_dump(&[]), "");
}

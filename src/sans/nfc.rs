//! NFC acquisition session.
//!
//! Reading a sensor over ISO15693 is a fixed sequence of exchanges, each
//! represented by a token type. A token is consumed by `advance`, which
//! validates the tag's response and returns the token for the next exchange.
//! Out-of-order use of a session is therefore unrepresentable.
//!
//! ```text
//! Session::begin ─► SystemInfo ─► PatchInfo ─► Blocks ─┬─► Acquisition
//!                                                  ▲   │
//!                                                  └───┘
//! ```
//!
//! Driving the tokens against a tag is left to [`crate::avec::nfc`].

use chrono::{DateTime, Utc};
use either::Either::{self, Left, Right};
use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

use super::{
    fram::{self, CrcPolicy, FRAM_SIZE, Fram, FramError},
    sensor::Sensor,
};

/// Size of a sensor memory block.
pub const BLOCK_SIZE: usize = 8;
/// Number of blocks holding the snapshot, the last one padded.
pub const BLOCK_COUNT: u8 = 43;
/// Blocks requested by each multiple block read.
pub const BLOCKS_PER_READ: u8 = 3;

/// Vendor custom command returning the patch info.
pub const PATCH_INFO_COMMAND: u8 = 0xA1;
pub const PATCH_INFO_PARAMETERS: [u8; 1] = [0x07];

/// Whether blocks are read one at a time or in groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    #[default]
    Single,
    Multiple,
}

/// An error during an NFC session.
///
/// Every error aborts the session; the tag has to be presented again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NfcError {
    /// The tag connection failed.
    #[error("Connection failure: {0}")]
    Connection(String),
    /// The system information request failed.
    #[error("System information request failed: {0}")]
    SystemInfo(String),
    /// The patch info command failed.
    #[error("Patch info command failed: {0}")]
    PatchInfo(String),
    /// A block read failed.
    #[error("Reading block {block} failed: {reason}")]
    ReadBlock { block: u8, reason: String },
    /// Tag identifiers are 8 bytes.
    #[error("Tag identifier must be 8 bytes, found {0}.")]
    Identifier(usize),
    /// The tag does not use 8-byte blocks.
    #[error("Unsupported block size {0}.")]
    BlockSize(usize),
    /// The tag memory is too small to hold a snapshot.
    #[error("Tag memory of {0} blocks is too small.")]
    MemorySize(usize),
    /// A block read returned the wrong amount of data.
    #[error("Block read at {block} returned {found} bytes, expected {expected}.")]
    BlockLength {
        block: u8,
        found: usize,
        expected: usize,
    },
    /// Another session was started.
    #[error("Session superseded by a newer one.")]
    Superseded,
    /// The session was cancelled.
    #[error("Session cancelled.")]
    Cancelled,
}

impl NfcError {
    /// Text to show when invalidating the session.
    pub fn user_message(&self) -> String {
        match self {
            NfcError::Connection(reason) => format!("Connection failure: {reason}"),
            NfcError::SystemInfo(reason) => format!("getSystemInfo error: {reason}"),
            NfcError::PatchInfo(reason) => format!("Error getting PatchInfo: {reason}"),
            NfcError::ReadBlock { reason, .. } => {
                format!("Error while reading blocks: {reason}")
            }
            NfcError::Identifier(_)
            | NfcError::BlockSize(_)
            | NfcError::MemorySize(_)
            | NfcError::BlockLength { .. } => "Unsupported sensor".to_string(),
            NfcError::Superseded | NfcError::Cancelled => "Scan cancelled".to_string(),
        }
    }
}

/// Start of a session.
pub struct Session;

impl Session {
    /// Begin a session with a detected tag.
    ///
    /// The sensor identifier is the tag identifier in reverse byte order.
    pub fn begin(identifier: &[u8], mode: ReadMode) -> Result<SystemInfo, NfcError> {
        let mut uid: [u8; 8] = identifier
            .try_into()
            .map_err(|_| NfcError::Identifier(identifier.len()))?;
        uid.reverse();

        info!("NFC: IC identifier: {}", hex::encode(identifier));

        Ok(SystemInfo { uid, mode })
    }
}

/// Awaiting the tag's system information.
#[derive(Debug)]
pub struct SystemInfo {
    uid: [u8; 8],
    mode: ReadMode,
}

impl SystemInfo {
    pub fn advance(self, block_size: usize, block_count: usize) -> Result<PatchInfo, NfcError> {
        info!("NFC: block size: {block_size}, memory size: {block_count} blocks");

        if block_size != BLOCK_SIZE {
            Err(NfcError::BlockSize(block_size))?
        }
        if block_count < BLOCK_COUNT as usize {
            Err(NfcError::MemorySize(block_count))?
        }

        Ok(PatchInfo {
            uid: self.uid,
            mode: self.mode,
        })
    }
}

/// A vendor custom command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomCommand {
    pub code: u8,
    pub parameters: Vec<u8>,
}

/// Awaiting the patch info.
#[derive(Debug)]
pub struct PatchInfo {
    uid: [u8; 8],
    mode: ReadMode,
}

impl PatchInfo {
    pub fn request(&self) -> CustomCommand {
        CustomCommand {
            code: PATCH_INFO_COMMAND,
            parameters: PATCH_INFO_PARAMETERS.to_vec(),
        }
    }

    pub fn advance(self, response: &[u8]) -> Blocks {
        info!("NFC: patch info: {}", hex::encode(response));

        Blocks {
            uid: self.uid,
            patch_info: response.to_vec(),
            mode: self.mode,
            data: Vec::with_capacity(BLOCK_COUNT as usize * BLOCK_SIZE),
        }
    }
}

/// A block read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRequest {
    Single(u8),
    Multiple { first: u8, count: u8 },
}

impl BlockRequest {
    pub fn first(&self) -> u8 {
        match *self {
            BlockRequest::Single(block) => block,
            BlockRequest::Multiple { first, .. } => first,
        }
    }

    pub fn count(&self) -> u8 {
        match *self {
            BlockRequest::Single(_) => 1,
            BlockRequest::Multiple { count, .. } => count,
        }
    }
}

/// Reading memory blocks.
#[derive(Debug)]
pub struct Blocks {
    uid: [u8; 8],
    patch_info: Vec<u8>,
    mode: ReadMode,
    data: Vec<u8>,
}

impl Blocks {
    /// Number of blocks read so far.
    pub fn read(&self) -> u8 {
        (self.data.len() / BLOCK_SIZE) as u8
    }

    /// The next read to issue.
    pub fn request(&self) -> BlockRequest {
        let first = self.read();
        match self.mode {
            ReadMode::Single => BlockRequest::Single(first),
            ReadMode::Multiple => BlockRequest::Multiple {
                first,
                count: BLOCKS_PER_READ.min(BLOCK_COUNT - first),
            },
        }
    }

    /// Accept the data returned for [`Blocks::request`].
    pub fn advance(mut self, data: &[u8]) -> Result<Either<Blocks, Acquisition>, NfcError> {
        let request = self.request();
        let expected = request.count() as usize * BLOCK_SIZE;

        if data.len() != expected {
            Err(NfcError::BlockLength {
                block: request.first(),
                found: data.len(),
                expected,
            })?
        }

        for (n, block) in data.chunks(BLOCK_SIZE).enumerate() {
            debug!(
                "NFC block #{:02}: {}",
                request.first() as usize + n,
                block_dump(block)
            );
        }

        self.data.extend_from_slice(data);

        if self.read() < BLOCK_COUNT {
            return Ok(Left(self));
        }

        let mut fram = [0; FRAM_SIZE];
        fram.copy_from_slice(&self.data[..FRAM_SIZE]);

        Ok(Right(Acquisition {
            uid: self.uid,
            patch_info: self.patch_info,
            fram: Fram::from(fram),
        }))
    }
}

/// The outcome of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub uid: [u8; 8],
    pub patch_info: Vec<u8>,
    pub fram: Fram,
}

impl Acquisition {
    /// Decode the snapshot into a new sensor.
    pub fn into_sensor(self, now: DateTime<Utc>, policy: CrcPolicy) -> Result<Sensor, FramError> {
        let reading = fram::decode(&self.fram, now, policy)?;

        let mut sensor = Sensor::default();
        sensor.set_uid(self.uid);
        sensor.set_patch_info(&self.patch_info);
        sensor.apply(self.fram, reading);

        Ok(sensor)
    }
}

/// Format a block as space-separated uppercase hex.
pub fn block_dump(block: &[u8]) -> String {
    block
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

//! Driver running NFC sessions against an ISO15693 tag.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use either::Either::{Left, Right};
use log::{error, info};
use thiserror::Error;

use crate::sans::nfc::{Acquisition, BlockRequest, NfcError, ReadMode, Session};

/// An error reported by the tag transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TagError(pub String);

/// Answer to a get system information request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemInformation {
    pub block_size: usize,
    pub block_count: usize,
    pub ic_reference: u8,
}

/// An ISO15693 tag presented to the reader.
pub trait Iso15693 {
    /// Tag identifier, as transmitted.
    fn identifier(&self) -> Vec<u8>;
    fn connect(&mut self) -> Result<(), TagError>;
    fn system_info(&mut self) -> Result<SystemInformation, TagError>;
    fn custom_command(&mut self, code: u8, parameters: &[u8]) -> Result<Vec<u8>, TagError>;
    fn read_single_block(&mut self, block: u8) -> Result<Vec<u8>, TagError>;
    fn read_multiple_blocks(&mut self, first: u8, count: u8) -> Result<Vec<Vec<u8>>, TagError>;
}

/// Reader running one session at a time.
///
/// Starting a session invalidates any session started before it. Sessions
/// stop at their next exchange once invalidated or cancelled. Clones share
/// the same sessions.
#[derive(Debug, Default, Clone)]
pub struct Reader {
    generation: Arc<AtomicU64>,
    mode: ReadMode,
}

/// A session started on a [`Reader`].
#[derive(Debug)]
pub struct Ticket {
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl Ticket {
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }
}

/// Cancels a running session from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Reader {
    pub fn new(mode: ReadMode) -> Self {
        Self {
            generation: Arc::default(),
            mode,
        }
    }

    /// Start a session, superseding any earlier one.
    pub fn start(&self) -> Ticket {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("NFC: starting session {generation}");

        Ticket {
            generation,
            cancelled: Arc::default(),
        }
    }

    /// Read a sensor over the session of `ticket`.
    pub fn read(&self, ticket: &Ticket, tag: &mut impl Iso15693) -> Result<Acquisition, NfcError> {
        self.run(ticket, tag).inspect_err(|err| {
            error!("NFC: {err}");
        })
    }

    fn run(&self, ticket: &Ticket, tag: &mut impl Iso15693) -> Result<Acquisition, NfcError> {
        self.check(ticket)?;
        tag.connect()
            .map_err(|e| NfcError::Connection(e.to_string()))?;

        let system_info = Session::begin(&tag.identifier(), self.mode)?;

        self.check(ticket)?;
        let SystemInformation {
            block_size,
            block_count,
            ic_reference,
        } = tag
            .system_info()
            .map_err(|e| NfcError::SystemInfo(e.to_string()))?;
        info!("NFC: IC reference: 0x{ic_reference:X}");

        let patch_info = system_info.advance(block_size, block_count)?;

        self.check(ticket)?;
        let command = patch_info.request();
        let response = tag
            .custom_command(command.code, &command.parameters)
            .map_err(|e| NfcError::PatchInfo(e.to_string()))?;

        let mut blocks = patch_info.advance(&response);

        loop {
            self.check(ticket)?;

            let request = blocks.request();
            let read_error = |e: TagError| NfcError::ReadBlock {
                block: request.first(),
                reason: e.to_string(),
            };

            let data = match request {
                BlockRequest::Single(block) => tag.read_single_block(block).map_err(read_error)?,
                BlockRequest::Multiple { first, count } => tag
                    .read_multiple_blocks(first, count)
                    .map_err(read_error)?
                    .concat(),
            };

            blocks = match blocks.advance(&data)? {
                Left(blocks) => blocks,
                Right(acquisition) => {
                    info!("NFC: read complete");
                    return Ok(acquisition);
                }
            };
        }
    }

    fn check(&self, ticket: &Ticket) -> Result<(), NfcError> {
        if ticket.cancelled.load(Ordering::Acquire) {
            Err(NfcError::Cancelled)?
        }
        if self.generation.load(Ordering::Acquire) != ticket.generation {
            Err(NfcError::Superseded)?
        }
        Ok(())
    }
}

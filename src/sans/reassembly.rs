//! Reassembly of data packets fragmented across BLE notifications.

use log::{debug, warn};

/// Length of a Bubble data packet: a snapshot followed by an 8-byte trailer.
pub const BUBBLE_PACKET_LEN: usize = 352;
/// Length of a MiaoMiao data packet without patch info.
pub const MIAOMIAO_PACKET_LEN: usize = 363;
/// Longest MiaoMiao data packet accepted from a declared length.
pub const MIAOMIAO_MAX_PACKET_LEN: usize = 400;

/// How a vendor frames a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Fragments without their header add up to a fixed length.
    Fixed(usize),
    /// The packet declares its big-endian length at bytes 1–2.
    Declared { default: usize, max: usize },
    /// Every notification is a complete packet.
    Single,
}

/// Buffer accumulating fragments until a packet is complete.
///
/// The buffer never holds more than the target length; it is emptied as soon
/// as a completed packet is returned.
#[derive(Debug, Clone)]
pub struct Reassembler {
    framing: Framing,
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
        }
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard any partial packet.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Length at which the packet being accumulated is complete.
    pub fn target_len(&self) -> usize {
        match self.framing {
            Framing::Fixed(len) => len,
            Framing::Declared { default, max } => match self.buffer.get(1..3) {
                Some(&[hi, lo]) => {
                    let declared = u16::from_be_bytes([hi, lo]) as usize;
                    if (default..=max).contains(&declared) {
                        declared
                    } else {
                        default
                    }
                }
                _ => default,
            },
            Framing::Single => 0,
        }
    }

    /// Append a fragment, returning the packet once it is complete.
    pub fn push(&mut self, fragment: &[u8]) -> Option<Vec<u8>> {
        if self.framing == Framing::Single {
            return Some(fragment.to_vec());
        }

        self.buffer.extend_from_slice(fragment);

        let target = self.target_len();
        debug!("Partial buffer count: {} of {target}", self.buffer.len());

        if self.buffer.len() < target {
            return None;
        }

        if self.buffer.len() > target {
            warn!("Discarding {} bytes past the end of the packet", self.buffer.len() - target);
            self.buffer.truncate(target);
        }

        Some(std::mem::take(&mut self.buffer))
    }
}

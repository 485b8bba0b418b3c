//! Sensor serial number encoding.

use tartan_bitfield::bitfield;
use thiserror::Error;

/// Symbols used by the vendor for serial numbers, skipping ambiguous glyphs.
const ALPHABET: &[u8; 32] = b"0123456789ACDEFGHJKLMNPQRTUVWXYZ";

/// An error encoding a serial number.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerialError {
    /// Sensor identifiers are exactly eight bytes long.
    #[error("Sensor identifier must be 8 bytes, found {0}.")]
    InvalidLength(usize),
}

/// Encode a sensor identifier of unchecked length as the printed serial
/// number. See [`encode_serial`].
pub fn serial_number(uid: &[u8]) -> Result<String, SerialError> {
    let uid: &[u8; 8] = uid
        .try_into()
        .map_err(|_| SerialError::InvalidLength(uid.len()))?;
    Ok(encode_serial(uid))
}

/// Encode an 8-byte sensor identifier as the printed serial number.
///
/// The identifier is expected in patch order (the tag identifier reversed).
/// The six least significant bytes are split into ten 5-bit symbols, padded
/// with two zero bits, each mapped through a 32-character alphabet, and the
/// result is prefixed with `0`.
pub fn encode_serial(uid: &[u8; 8]) -> String {
    let mut bytes = *uid;
    bytes.reverse();

    let mut packed = [0; 8];
    packed[2..].copy_from_slice(&bytes[2..]);

    bitfield! {
        struct Symbols(u64) {
            [45..50] s0: u64,
            [40..45] s1: u64,
            [35..40] s2: u64,
            [30..35] s3: u64,
            [25..30] s4: u64,
            [20..25] s5: u64,
            [15..20] s6: u64,
            [10..15] s7: u64,
            [5..10] s8: u64,
            [0..5] s9: u64,
        }
    }

    let symbols = Symbols(u64::from_be_bytes(packed) << 2);

    [
        symbols.s0(),
        symbols.s1(),
        symbols.s2(),
        symbols.s3(),
        symbols.s4(),
        symbols.s5(),
        symbols.s6(),
        symbols.s7(),
        symbols.s8(),
        symbols.s9(),
    ]
    .into_iter()
    .fold(String::from("0"), |mut s, symbol| {
        s.push(ALPHABET[symbol as usize] as char);
        s
    })
}

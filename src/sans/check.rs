//! Helper for computing cyclic redundancy checks.

/// Lookup table for the reflected CCITT polynomial.
const CRC_TABLE: [u16; 256] = {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Compute the cyclic redundancy check value of a slice of bytes.
///
/// The accumulator starts at `0xFFFF`, and is bit-reversed then byte-swapped
/// once all bytes are consumed, so that it compares equal to a stored
/// checksum field read as a big-endian `u16`.
pub fn compute_crc(r: &[u8]) -> u16 {
    let crc = r.iter().fold(0xFFFF, |acc, b| crc_byte(acc, *b));
    crc.reverse_bits().swap_bytes()
}

/// Check a stored checksum field against the bytes it covers.
pub fn verify_crc(found: [u8; 2], r: &[u8]) -> Result<(), Mismatch> {
    let found = u16::from_be_bytes(found);
    let calculated = compute_crc(r);

    if found != calculated {
        Err(Mismatch { found, calculated })?;
    }

    Ok(())
}

/// Stored and calculated values of a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub found: u16,
    pub calculated: u16,
}

/// Accumulate a single byte into a cyclic redundancy check value.
fn crc_byte(crc: u16, b: u8) -> u16 {
    (crc >> 8) ^ CRC_TABLE[((crc ^ b as u16) & 0xFF) as usize]
}

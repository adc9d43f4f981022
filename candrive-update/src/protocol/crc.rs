//! CRC-32 as computed by the STM32 CRC peripheral.
//!
//! The bootloader validates images and the firmware manager validates
//! messages with the on-chip CRC unit, so the host side has to produce the
//! exact same value:
//!
//! - Polynomial `0x04C11DB7`, shifted MSB-first, not reflected
//! - Initial value `0xFFFFFFFF`, no final XOR
//! - Data fed as 32-bit words; a short trailing word is zero-filled
//!
//! The device loads each 4-byte group as a little-endian word and the
//! peripheral shifts it in from bit 31 down. The table-driven form below packs
//! the group big-endian and folds its lanes from the low lane up, which
//! visits the bytes in the same order.

/// Generator polynomial of the peripheral.
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Register value before the first word.
pub const INITIAL: u32 = 0xFFFF_FFFF;

/// Byte-wise lookup table for [`POLYNOMIAL`], built at compile time.
pub static CRC32_STM_TABLE: [u32; 256] = build_table();

#[allow(clippy::cast_possible_truncation)]
const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 0x8000_0000 != 0 {
                (c << 1) ^ POLYNOMIAL
            } else {
                c << 1
            };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

#[inline]
fn fold(crc: u32, lane: u32) -> u32 {
    (crc << 8) ^ CRC32_STM_TABLE[((crc >> 24) ^ lane) as usize & 0xFF]
}

/// Calculate the STM32 hardware CRC-32 of `data`.
///
/// Returns [`INITIAL`] for empty input.
pub fn crc32_stm(data: &[u8]) -> u32 {
    let mut crc = INITIAL;

    for chunk in data.chunks(4) {
        // Short tail occupies the top lanes, the rest stays zero
        let mut lanes = [0u8; 4];
        lanes[..chunk.len()].copy_from_slice(chunk);
        let word = u32::from_be_bytes(lanes);

        crc = fold(crc, word);
        crc = fold(crc, word >> 8);
        crc = fold(crc, word >> 16);
        crc = fold(crc, word >> 24);
    }

    crc
}

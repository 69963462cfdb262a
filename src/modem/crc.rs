//! # CRC-16/X.25 Implementation
//!
//! Frame check sequence for AX.25 frames.
//!
//! **Polynomial**: 0x1021 (reflected 0x8408)
//! **Initial Value**: 0xFFFF
//! **Final XOR**: 0xFFFF

/// Reflected CRC-16-CCITT polynomial
const CRC16_POLY_REFLECTED: u16 = 0x8408;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the AX.25 frame check sequence using the lookup table
///
/// The FCS is sent low byte first.
///
/// # Examples
///
/// ```
/// use aprs_radio::modem::crc::crc16_x25;
///
/// assert_eq!(crc16_x25(b"123456789"), 0x906E);
/// ```
pub fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc = (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize];
    }

    !crc
}

/// Bitwise reference implementation used to check the table
#[allow(dead_code)]
fn crc16_x25_slow(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}

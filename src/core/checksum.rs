//! CRC-8 checksum used to validate event-code frames
//!
//! Polynomial 0x07 (x^8 + x^2 + x + 1), init 0x00, RefIn: false, RefOut: false,
//! XorOut: 0x00. Also known as CRC-8/SMBUS.

/// Generator polynomial (implicit x^8 term)
pub const CRC8_POLY: u8 = 0x07;

/// Lookup table generated from the bitwise definition at compile time
pub static CRC8_TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = crc8_step(i as u8);
        i += 1;
    }
    table
}

/// Shift one register value through eight rounds of the polynomial
const fn crc8_step(mut crc: u8) -> u8 {
    let mut bit = 0;
    while bit < 8 {
        if crc & 0x80 != 0 {
            crc = (crc << 1) ^ CRC8_POLY;
        } else {
            crc <<= 1;
        }
        bit += 1;
    }
    crc
}

/// CRC-8 over `data`, table driven
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

/// CRC-8 over `data`, computed bit by bit
///
/// Reference definition for [`crc8`]; both must agree for every input.
pub fn crc8_bitwise(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x00;

    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Calculate the checksum byte for `data`
pub fn calculate(data: &[u8]) -> u8 {
    crc8(data)
}

/// Verify `checksum` against `data`
pub fn validate(data: &[u8], checksum: u8) -> bool {
    calculate(data) == checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(calculate(&[]), 0x00);
        assert_eq!(calculate(b""), 0x00);
    }

    #[test]
    fn test_check_value() {
        // Test vector: "123456789" should give 0xF4
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc8_bitwise(b"123456789"), 0xF4);
    }

    #[test]
    fn test_table_matches_bitwise() {
        for byte in 0..=255u8 {
            assert_eq!(CRC8_TABLE[byte as usize], crc8_bitwise(&[byte]), "byte {byte:#04x}");
            assert_eq!(crc8(&[byte]), crc8_bitwise(&[byte]));
        }
    }

    #[test]
    fn test_known_single_bytes() {
        assert_eq!(crc8(&[0x01]), 0x07);
        assert_eq!(crc8(&[0x80]), 0x89);
        assert_eq!(crc8(&[0xFF]), 0xF3);
    }

    #[test]
    fn test_validate_roundtrip() {
        let samples: [&[u8]; 5] = [b"", b"A", b"BUTTON_PRESS", b"\x00\x00\x00", &[0xFF; 32]];
        for data in samples {
            assert!(validate(data, calculate(data)));
            assert!(!validate(data, calculate(data) ^ 0x01));
        }
    }

    #[test]
    fn test_single_byte_edit_changes_crc() {
        let original = b"BUTTON_PRESS".to_vec();
        let crc = calculate(&original);

        for index in 0..original.len() {
            for flip in [0x01u8, 0x10, 0x80, 0xFF] {
                let mut edited = original.clone();
                edited[index] ^= flip;
                assert_ne!(calculate(&edited), crc, "edit at {index} with {flip:#04x}");
            }
        }
    }
}

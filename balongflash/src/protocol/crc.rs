//! CRC16 checksum used by the Balong bootloader.
//!
//! Both the HDLC frame trailer and the firmware container (partition header
//! CRC and per-block checksums) use the same 16-bit CRC: the HDLC FCS,
//! catalogued as CRC-16/IBM-SDLC (reflected polynomial 0x1021, initial value
//! 0xFFFF, final XOR 0xFFFF).

use crc::{CRC_16_IBM_SDLC, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Calculate the bootloader CRC16 over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // Catalogue check value for CRC-16/IBM-SDLC.
        assert_eq!(crc16(b"123456789"), 0x906E);
    }

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16(&[]), 0x0000);
    }

    #[test]
    fn test_crc16_detects_single_bit_flip() {
        let data = [0x41, 0x00, 0x01, 0x00, 0x00];
        let mut flipped = data;
        flipped[2] ^= 0x10;
        assert_ne!(crc16(&data), crc16(&flipped));
    }
}

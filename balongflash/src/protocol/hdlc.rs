//! HDLC-style framing used by the Balong download protocol.
//!
//! This is not full HDLC, only its framing and byte-stuffing convention:
//!
//! ```text
//! +------+--------+----------------------------+--------+------+
//! | 0x7E | opcode | escaped payload + CRC16 LE | ...    | 0x7E |
//! +------+--------+----------------------------+--------+------+
//!   ^ written by the session, not part of `encode` output
//! ```
//!
//! The opcode byte is sent as-is. Every later byte equal to [`FLAG`] or
//! [`ESCAPE`] is replaced by `ESCAPE, byte ^ 0x20`.

use crate::protocol::crc::crc16;

/// Frame delimiter.
pub const FLAG: u8 = 0x7E;

/// Escape byte.
pub const ESCAPE: u8 = 0x7D;

/// Bit flipped by the escape sequence.
pub const ESCAPE_MASK: u8 = 0x20;

/// Append the CRC trailer to `cmd`, escape it and terminate it with [`FLAG`].
pub fn encode(cmd: &[u8]) -> Vec<u8> {
    let crc = crc16(cmd);
    let mut payload = Vec::with_capacity(cmd.len() + 2);
    payload.extend_from_slice(cmd);
    payload.extend_from_slice(&crc.to_le_bytes());

    // Worst case every byte after the opcode is escaped.
    let mut out = Vec::with_capacity(payload.len() * 2 + 1);
    let mut bytes = payload.iter().copied();
    if let Some(opcode) = bytes.next() {
        out.push(opcode);
    }
    for byte in bytes {
        if byte == FLAG || byte == ESCAPE {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_MASK);
        } else {
            out.push(byte);
        }
    }
    out.push(FLAG);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    PendingUnescape,
}

/// Remove byte stuffing from a captured reply.
///
/// Scanning stops at the first [`FLAG`] seen after at least one output byte;
/// that delimiter is kept as the last output byte. A delimiter at the very
/// start is kept as ordinary data. A dangling [`ESCAPE`] at the end of the
/// input is passed through unchanged.
pub fn decode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut state = ScanState::Normal;

    for &byte in raw {
        if byte == FLAG && !out.is_empty() {
            out.push(FLAG);
            return out;
        }
        match state {
            _ if byte == ESCAPE => state = ScanState::PendingUnescape,
            ScanState::PendingUnescape => {
                out.push(byte | ESCAPE_MASK);
                state = ScanState::Normal;
            },
            ScanState::Normal => out.push(byte),
        }
    }

    if state == ScanState::PendingUnescape {
        out.push(ESCAPE);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_plain_command() {
        let cmd = [0x41, 0x01, 0x02];
        let crc = crc16(&cmd).to_le_bytes();
        let framed = encode(&cmd);

        assert_eq!(&framed[..3], &cmd);
        assert_eq!(*framed.last().unwrap(), FLAG);
        // CRC bytes of this command need no escaping
        if !crc.contains(&FLAG) && !crc.contains(&ESCAPE) {
            assert_eq!(&framed[3..5], &crc);
            assert_eq!(framed.len(), 6);
        }
    }

    #[test]
    fn test_encode_escapes_flag_and_escape() {
        let framed = encode(&[0x42, FLAG, ESCAPE, 0x00]);
        assert_eq!(&framed[..6], &[0x42, 0x7D, 0x5E, 0x7D, 0x5D, 0x00]);
    }

    #[test]
    fn test_encode_never_escapes_opcode() {
        let framed = encode(&[FLAG, 0x01]);
        assert_eq!(framed[0], FLAG);
        assert_eq!(framed[1], 0x01);
    }

    #[test]
    fn test_decode_stops_at_closing_flag() {
        let raw = [0x7E, 0x02, 0x7D, 0x5E, 0x00, 0x7E, 0xAA, 0xBB];
        assert_eq!(decode(&raw), vec![0x7E, 0x02, 0x7E, 0x00, 0x7E]);
    }

    #[test]
    fn test_decode_leading_escape_is_discarded() {
        assert_eq!(decode(&[0x7D, 0x5D, 0x7E]), vec![0x7D, 0x7E]);
    }

    #[test]
    fn test_decode_dangling_escape_passes_through() {
        assert_eq!(decode(&[0x02, 0x00, 0x7D]), vec![0x02, 0x00, 0x7D]);
    }

    #[test]
    fn test_escape_opcode_does_not_round_trip() {
        let framed = encode(&[ESCAPE, 0x01, 0x02]);
        assert_eq!(framed, vec![0x7D, 0x01, 0x02, 0xA1, 0x83, 0x7E]);
        assert_eq!(decode(&framed), vec![0x21, 0x02, 0xA1, 0x83, 0x7E]);
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode(&[]).is_empty());
    }

    proptest! {
        #[test]
        // The opcode goes out unescaped, so a leading 0x7D reads back as an
        // escape. No download command uses that opcode.
        fn prop_decode_inverts_encode(
            opcode in any::<u8>().prop_filter("opcode is sent raw", |b| *b != ESCAPE),
            body in proptest::collection::vec(any::<u8>(), 0..300),
        ) {
            let mut cmd = vec![opcode];
            cmd.extend_from_slice(&body);

            let decoded = decode(&encode(&cmd));

            let mut expected = cmd.clone();
            expected.extend_from_slice(&crc16(&cmd).to_le_bytes());
            expected.push(FLAG);
            prop_assert_eq!(decoded, expected);
        }

        #[test]
        fn prop_encoded_body_has_no_bare_flag(cmd in proptest::collection::vec(any::<u8>(), 1..300)) {
            let framed = encode(&cmd);
            let inner = &framed[1..framed.len() - 1];
            prop_assert!(!inner.contains(&FLAG));
        }
    }
}

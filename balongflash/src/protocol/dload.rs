//! Partition download commands of the Balong HDLC bootloader.
//!
//! ## Command Layouts
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! Start (12 bytes):    0x41 | code (4) | size (4) | reserved (3)
//! Block (7 + n):       0x42 | block number (4) | length (2) | data (n)
//! End (23 bytes):      0x43 | size (4) | reserved (3) | code (4) | reserved (11)
//! Reboot (1 byte):     0x0A
//! Leave HDLC (1 byte): 0x44
//! ```
//!
//! The field order of the end command (size before code, with odd padding)
//! is what the device expects and must not be normalized.
//!
//! ## Reply Layout
//!
//! After unescaping, byte 1 of a reply is [`ACK`] on success; otherwise
//! byte 3 carries the device error code.

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::Diagnostic;

/// Fixed transfer unit for partition data blocks.
pub const BLOCK_SIZE: usize = 4096;

/// Acknowledge code at reply offset 1.
pub const ACK: u8 = 0x02;

/// Download command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Begin a partition.
    Start = 0x41,
    /// Partition data block.
    Block = 0x42,
    /// Finish a partition.
    End = 0x43,
    /// Leave download mode and reboot.
    Reboot = 0x0A,
    /// Leave HDLC framing without rebooting.
    LeaveHdlc = 0x44,
}

/// Download command builder.
#[derive(Debug)]
pub struct DloadCommand {
    opcode: Opcode,
    data: Vec<u8>,
}

impl DloadCommand {
    fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            data: Vec::new(),
        }
    }

    /// Build a partition start command.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn start(code: u32, size: u32) -> Self {
        let mut cmd = Self::new(Opcode::Start);
        cmd.data.write_u32::<BigEndian>(code).unwrap();
        cmd.data.write_u32::<BigEndian>(size).unwrap();
        cmd.data.extend_from_slice(&[0; 3]);
        cmd
    }

    /// Build a data block command.
    ///
    /// `number` is the on-wire block number, which starts at 1.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // payload never exceeds BLOCK_SIZE
    pub fn block(number: u32, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= BLOCK_SIZE);
        let mut cmd = Self::new(Opcode::Block);
        cmd.data.write_u32::<BigEndian>(number).unwrap();
        cmd.data.write_u16::<BigEndian>(payload.len() as u16).unwrap();
        cmd.data.extend_from_slice(payload);
        cmd
    }

    /// Build a partition end command.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn end(code: u32, size: u32) -> Self {
        let mut cmd = Self::new(Opcode::End);
        cmd.data.write_u32::<BigEndian>(size).unwrap();
        cmd.data.extend_from_slice(&[0; 3]);
        cmd.data.write_u32::<BigEndian>(code).unwrap();
        cmd.data.extend_from_slice(&[0; 11]);
        cmd
    }

    /// Build the reboot command.
    pub fn reboot() -> Self {
        Self::new(Opcode::Reboot)
    }

    /// Build the command that returns the port to AT mode.
    pub fn leave_hdlc() -> Self {
        Self::new(Opcode::LeaveHdlc)
    }

    /// Raw command bytes, before framing.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.data.len());
        buf.push(self.opcode as u8);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Get the opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
}

/// Number of [`BLOCK_SIZE`] blocks needed for `total` bytes.
pub fn block_count(total: usize) -> usize {
    total.div_ceil(BLOCK_SIZE)
}

/// Byte range of zero-based block `index` within a body of `total` bytes.
pub fn block_range(index: usize, total: usize) -> std::ops::Range<usize> {
    let start = index * BLOCK_SIZE;
    start..total.min(start + BLOCK_SIZE)
}

/// Unescaped device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    data: Vec<u8>,
}

impl Reply {
    /// Wrap an unescaped reply buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Raw reply bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether byte 1 is the ACK code.
    pub fn is_ack(&self) -> bool {
        self.data.get(1) == Some(&ACK)
    }

    /// Device error code at offset 3, if the reply is long enough.
    pub fn error_code(&self) -> Option<u8> {
        self.data.get(3).copied()
    }

    /// Diagnostic for a rejected reply.
    pub fn diagnostic(&self) -> Diagnostic {
        self.error_code()
            .map_or(Diagnostic::NoResponse, Diagnostic::Code)
    }
}

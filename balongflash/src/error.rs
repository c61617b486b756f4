//! Error types for balongflash.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for balongflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Phase of the partition download sequence a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Partition start command (0x41).
    Start,
    /// Partition data block (0x42).
    Block,
    /// Partition end command (0x43).
    End,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "partition header"),
            Self::Block => write!(f, "data block"),
            Self::End => write!(f, "partition close"),
        }
    }
}

/// Why the device refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// No reply arrived within the read timeout.
    NoResponse,
    /// Reply arrived without ACK; the byte is the device error code.
    Code(u8),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "command timeout"),
            Self::Code(code) => write!(f, "error code {code:02x}"),
        }
    }
}

/// Error type for balongflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The container marker was never found.
    #[error("No partitions found in file - file does not contain a firmware image")]
    NoFirmwareImage,

    /// The first marker sits too close to the start of the file for a preamble.
    #[error("File header has incorrect size (first partition at offset {offset:#x})")]
    HeaderTooSmall {
        /// Offset of the first partition marker.
        offset: u64,
    },

    /// Firmware type code (dload_id) is out of range.
    #[error("Invalid firmware type code (dload_id) {0:#x}")]
    InvalidFirmwareType(u32),

    /// A partition record ends before its declared size.
    #[error("Partition #{index} at offset {offset:#x} is truncated")]
    TruncatedPartition {
        /// Partition index in discovery order.
        index: usize,
        /// File offset of the partition header.
        offset: u64,
    },

    /// A directory-mode partition file is unusable.
    #[error("Invalid partition file {}: {reason}", .path.display())]
    InvalidPartitionFile {
        /// Offending file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// Directory mode found no partition files at all.
    #[error("No partition image files found in directory {}", .0.display())]
    NoPartitionFiles(PathBuf),

    /// LZMA output exceeded the decompression bound.
    #[error("Partition #{index}: decompressed size exceeds {limit} bytes")]
    DecompressedTooLarge {
        /// Partition index.
        index: usize,
        /// Byte limit that was exceeded.
        limit: usize,
    },

    /// No byte arrived within the read timeout.
    #[error("Timeout waiting for modem reply")]
    Timeout,

    /// A fixed-length read returned fewer bytes than requested.
    #[error("Response from modem too short: {actual} bytes, expected {expected} bytes")]
    ShortRead {
        /// Requested length.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// Reply decoded to nothing.
    #[error("No response from modem")]
    NoResponse,

    /// The device rejected a download command.
    #[error("{stage} rejected for partition {index} ({name}){} - {diagnostic}", block_suffix(.block))]
    CommandRejected {
        /// Which command was rejected.
        stage: Stage,
        /// Partition index.
        index: usize,
        /// Partition name.
        name: String,
        /// Zero-based block index, for block commands.
        block: Option<usize>,
        /// Device diagnostic.
        diagnostic: Diagnostic,
    },

    /// A signature trailer points outside its partition body.
    #[error("Malformed signature trailer in partition #{index}: {reason}")]
    MalformedSignatureTrailer {
        /// Partition index.
        index: usize,
        /// What is out of bounds.
        reason: String,
    },

    /// The device refused the ^SIGNVER handshake.
    #[error("Digital signature verification error - {code:02x}")]
    SignatureRejected {
        /// Byte at offset 2 of the reply, or 0 when the reply was empty.
        code: u8,
    },

    /// An AT command got an answer other than the one required.
    #[error("Modem rejected AT{command}: {reply}")]
    UnexpectedReply {
        /// Command text without the `AT` prefix.
        command: &'static str,
        /// Reply as text, or "no reply".
        reply: String,
    },

    /// Signature mode string could not be parsed.
    #[error("Invalid signature parameters: {0}")]
    InvalidSignatureSpec(String),
}

#[allow(clippy::ref_option)]
fn block_suffix(block: &Option<usize>) -> String {
    block.map_or_else(String::new, |b| format!(", block {b}"))
}

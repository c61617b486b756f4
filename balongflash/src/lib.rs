//! # balongflash
//!
//! A library for flashing Balong V7 modem firmware.
//!
//! This crate provides the core functionality for talking to the modem
//! bootloader over a serial port, including:
//!
//! - Firmware container parsing with header and block checksum validation
//! - zlib and LZMA partition decompression
//! - Directory mode (raw partition images named `NN-XXXXXXXX-Name`)
//! - HDLC-style frame escaping with CRC16 trailers
//! - The partition download command sequence
//! - Digital signature trailer lookup and the `^SIGNVER` handshake
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use balongflash::{Flasher, PartitionTable, SignatureMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (table, report) = PartitionTable::from_file("E3372h_update.bin", None)?;
//!     for issue in report.issues() {
//!         eprintln!("{issue}");
//!     }
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut port = balongflash::NativePort::open_simple("/dev/ttyUSB0")?;
//!         if let Some(signver) = SignatureMode::Auto.resolve(&table)? {
//!             balongflash::protocol::send_signver(&mut port, &signver)?;
//!         }
//!
//!         let mut flasher = Flasher::new(port);
//!         flasher.flash_table(&table, |p| {
//!             println!("{} {}%", p.name, p.percent());
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Diagnostic, Error, Result, Stage},
    flasher::{FinishAction, Flasher, Progress},
    image::{
        Compression, DecompressLimits, IssueKind, PartitionEntry, PartitionHeader, PartitionTable,
        SignatureMode, SignatureRecord, ValidationIssue, ValidationReport,
    },
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Acknowledgement, DloadCommand, HdlcSession, PortMode, Reply, SignVer},
};

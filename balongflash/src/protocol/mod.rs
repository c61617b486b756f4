//! Balong bootloader protocol: framing, download commands and transport.

pub mod at;
pub mod crc;
pub mod dload;
pub mod hdlc;
pub mod session;

// Re-export common types
pub use at::{PortMode, SignVer, at_command, detect_mode, enter_hdlc, prepare_download, send_signver};
pub use dload::{BLOCK_SIZE, DloadCommand, Opcode, Reply};
pub use session::{Acknowledgement, HdlcSession};

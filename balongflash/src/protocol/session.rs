//! Command/reply exchange with the bootloader over a [`Port`].
//!
//! Each exchange flushes stale input, sends `FLAG` followed by the encoded
//! frame, and collects the reply. The first reply byte must arrive within
//! the port's read timeout. The rest is either a fixed-length block (mass
//! read) or bytes up to the next [`FLAG`]. A timeout while reading that
//! tail ends the reply rather than failing it.

use std::time::Duration;

use log::trace;

use crate::error::{Diagnostic, Error, Result};
use crate::port::{Port, deciseconds};
use crate::protocol::dload::{DloadCommand, Reply};
use crate::protocol::hdlc::{self, FLAG};

/// Result of a command that expects an ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The device acknowledged the command.
    Accepted(Reply),
    /// The device refused the command or never answered.
    Rejected(Diagnostic),
}

/// HDLC transport session.
///
/// Generic over the port type `P`, so the same session runs over a native
/// serial port or a scripted test port.
pub struct HdlcSession<P: Port> {
    port: P,
}

impl<P: Port> HdlcSession<P> {
    /// Wrap an opened port.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Change the read timeout, in deciseconds.
    pub fn set_timeout(&mut self, ds: u32) -> Result<()> {
        self.port.set_timeout(deciseconds(ds))
    }

    /// Current read timeout.
    pub fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    /// Send a raw command and return the unescaped reply.
    pub fn send_command(&mut self, cmd: &[u8]) -> Result<Reply> {
        self.exchange(cmd, None)
    }

    /// Send a raw command whose reply is `len` bytes read as one block.
    pub fn send_command_mass(&mut self, cmd: &[u8], len: usize) -> Result<Reply> {
        self.exchange(cmd, Some(len))
    }

    /// Send a download command and check the reply for an ACK.
    ///
    /// A missing reply (timeout, short read) becomes
    /// [`Diagnostic::NoResponse`]; port failures are still returned as errors.
    pub fn request(&mut self, cmd: &DloadCommand) -> Result<Acknowledgement> {
        let raw = cmd.build();
        trace!("Sending {:?}: {} bytes", cmd.opcode(), raw.len());

        match self.send_command(&raw) {
            Ok(reply) if reply.is_ack() => Ok(Acknowledgement::Accepted(reply)),
            Ok(reply) => Ok(Acknowledgement::Rejected(reply.diagnostic())),
            Err(Error::Timeout | Error::NoResponse | Error::ShortRead { .. }) => {
                Ok(Acknowledgement::Rejected(Diagnostic::NoResponse))
            },
            Err(e) => Err(e),
        }
    }

    fn exchange(&mut self, cmd: &[u8], mass: Option<usize>) -> Result<Reply> {
        let frame = hdlc::encode(cmd);

        self.port.clear_buffers()?;
        let mut out = Vec::with_capacity(frame.len() + 1);
        out.push(FLAG);
        out.extend_from_slice(&frame);
        trace!("TX {}", hex::encode_upper(&out));
        self.port.write_all_bytes(&out)?;

        let raw = self.receive(mass)?;
        trace!("RX {}", hex::encode_upper(&raw));

        let decoded = hdlc::decode(&raw);
        if decoded.is_empty() {
            return Err(Error::NoResponse);
        }
        Ok(Reply::new(decoded))
    }

    fn receive(&mut self, mass: Option<usize>) -> Result<Vec<u8>> {
        let first = self.port.read_byte()?.ok_or(Error::Timeout)?;
        let mut raw = vec![first];

        if let Some(len) = mass.filter(|&len| len > 1) {
            let mut block = vec![0u8; len - 1];
            let got = self.port.read_up_to(&mut block)?;
            if got != block.len() {
                return Err(Error::ShortRead {
                    expected: len,
                    actual: got + 1,
                });
            }
            raw.extend_from_slice(&block);
        }

        while let Some(byte) = self.port.read_byte()? {
            raw.push(byte);
            if byte == FLAG {
                break;
            }
        }
        Ok(raw)
    }
}

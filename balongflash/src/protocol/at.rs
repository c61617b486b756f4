//! AT command exchange, used before the modem enters HDLC mode.
//!
//! A modem fresh from the firmware answers AT commands. The flasher asks
//! for the download protocol version, optionally announces the firmware
//! signature with `^SIGNVER`, and then switches the port to HDLC framing
//! with `^DATAMODE`. A modem whose port already speaks HDLC answers the
//! version query with a frame instead of text, and all AT steps are skipped.
//!
//! ```text
//! AT^DLOADVER? --text--> [AT^SIGNVER=...] -> AT^DATAMODE -> HDLC
//!              --frame-> HDLC (signature step skipped)
//! ```

use std::io::Read;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::{Port, deciseconds};
use crate::protocol::hdlc::FLAG;

/// Read timeout for AT replies, in deciseconds.
pub const AT_TIMEOUT_DS: u32 = 100;

/// Delay between sending a command and reading its reply.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Largest AT reply read in one go.
const MAX_REPLY: usize = 200;

/// The only reply accepted for `^SIGNVER`.
pub const SIGNVER_OK: &[u8] = b"\r\n0\r\n\r\nOK\r\n";

/// The only reply accepted for `^DATAMODE`.
pub const DATAMODE_OK: &[u8] = b"\r\nOK\r\n";

/// Download protocol version query.
const DLOADVER: &str = "^DLOADVER?";

/// Switch to HDLC framing.
const DATAMODE: &str = "^DATAMODE";

/// Send `AT<cmd>\r` and return whatever the modem answers in one read.
///
/// The port keeps the longer AT timeout afterwards.
pub fn at_command<P: Port + ?Sized>(port: &mut P, cmd: &str) -> Result<Vec<u8>> {
    port.set_timeout(deciseconds(AT_TIMEOUT_DS))?;
    port.clear_buffers()?;

    let line = format!("AT{cmd}\r");
    debug!("AT >> {}", line.trim_end());
    port.write_all_bytes(line.as_bytes())?;
    thread::sleep(SETTLE_DELAY);

    let mut buf = vec![0u8; MAX_REPLY];
    let n = match port.read(&mut buf) {
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
        Err(e) => return Err(e.into()),
    };
    buf.truncate(n);
    debug!("AT << {:?}", String::from_utf8_lossy(&buf));
    Ok(buf)
}

/// Parameters of the `^SIGNVER` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignVer {
    /// Firmware type code (0..=7).
    pub fw_type: u32,
    /// Public key hash, 64 uppercase hex characters.
    pub hash: String,
    /// Signature length in bytes.
    pub len: u32,
}

impl SignVer {
    /// Command text without the `AT` prefix.
    pub fn command(&self) -> String {
        format!("^SIGNVER={},0,{},{}", self.fw_type, self.hash, self.len)
    }
}

/// Announce the firmware signature and require the exact success reply.
pub fn send_signver<P: Port + ?Sized>(port: &mut P, params: &SignVer) -> Result<()> {
    info!(
        "Sending digital signature: type {} ({} bytes)",
        params.fw_type, params.len
    );
    let reply = at_command(port, &params.command())?;
    if !reply.starts_with(SIGNVER_OK) {
        return Err(Error::SignatureRejected {
            code: reply.get(2).copied().unwrap_or(0),
        });
    }
    Ok(())
}

/// Protocol the modem's port currently speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortMode {
    /// AT command mode, with the reported download protocol version.
    At {
        /// Version text from `^DLOADVER?`.
        version: String,
    },
    /// Already in HDLC download mode.
    Hdlc,
}

fn reply_text(reply: &[u8]) -> String {
    if reply.is_empty() {
        "no reply".to_string()
    } else {
        String::from_utf8_lossy(reply).trim().to_string()
    }
}

/// Find out whether the port speaks AT or HDLC.
pub fn detect_mode<P: Port + ?Sized>(port: &mut P) -> Result<PortMode> {
    let reply = at_command(port, DLOADVER)?;
    match reply.first() {
        None => return Err(Error::NoResponse),
        Some(&FLAG) => return Ok(PortMode::Hdlc),
        Some(_) => {},
    }

    let text = String::from_utf8_lossy(&reply);
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), text.contains("OK")) {
        (Some(version), true) if version != "OK" => Ok(PortMode::At {
            version: version.trim_start_matches("^DLOADVER:").trim().to_string(),
        }),
        _ => Err(Error::UnexpectedReply {
            command: DLOADVER,
            reply: reply_text(&reply),
        }),
    }
}

/// Switch an AT-mode port to HDLC framing.
pub fn enter_hdlc<P: Port + ?Sized>(port: &mut P) -> Result<()> {
    let reply = at_command(port, DATAMODE)?;
    if reply != DATAMODE_OK {
        return Err(Error::UnexpectedReply {
            command: DATAMODE,
            reply: reply_text(&reply),
        });
    }
    info!("Modem switched to HDLC mode");
    Ok(())
}

/// Bring the port into HDLC mode, announcing `signver` on the way.
///
/// The handshake is only possible in AT mode. When the port already speaks
/// HDLC it is skipped with a warning.
pub fn prepare_download<P: Port + ?Sized>(
    port: &mut P,
    signver: Option<&SignVer>,
) -> Result<PortMode> {
    let mode = detect_mode(port)?;
    match &mode {
        PortMode::Hdlc => {
            info!("Modem is already in HDLC mode");
            if signver.is_some() {
                warn!("Signature handshake skipped: modem is already in HDLC mode");
            }
        },
        PortMode::At { version } => {
            info!("Download protocol version: {version}");
            if let Some(params) = signver {
                send_signver(port, params)?;
            }
            thread::sleep(SETTLE_DELAY);
            enter_hdlc(port)?;
        },
    }
    Ok(mode)
}

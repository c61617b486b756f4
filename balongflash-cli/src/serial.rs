//! Serial port selection.
//!
//! The port is taken from, in order: the command line (or `BALONGFLASH_PORT`),
//! the config file, the first USB serial port found, and finally the
//! platform default. A name made only of digits is shorthand for the
//! numbered device (`3` is `/dev/ttyUSB3` or `COM3`).

use anyhow::Result;
use balongflash::{NativePortEnumerator, PortEnumerator, PortInfo};
use log::{debug, info};

use crate::CliError;
use crate::config::Config;

/// Port used when nothing is configured and no USB port is found.
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM1";
/// Port used when nothing is configured and no USB port is found.
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

/// Expand a bare device number into a full port name.
pub fn expand_port_name(name: &str) -> String {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return name.to_string();
    }
    if cfg!(windows) {
        format!("COM{name}")
    } else {
        format!("/dev/ttyUSB{name}")
    }
}

/// Pick the port to open.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(name) = &options.port {
        return Ok(expand_port_name(name));
    }

    if let Some(name) = &config.connection.port {
        debug!("Using port from config: {name}");
        return Ok(expand_port_name(name));
    }

    let usb: Vec<PortInfo> = NativePortEnumerator::list_ports()
        .unwrap_or_default()
        .into_iter()
        .filter(PortInfo::is_usb)
        .collect();

    choose_detected(usb, options.non_interactive)
}

fn choose_detected(usb: Vec<PortInfo>, non_interactive: bool) -> Result<String> {
    if non_interactive && usb.len() > 1 {
        let names: Vec<&str> = usb.iter().map(|p| p.name.as_str()).collect();
        return Err(CliError::Usage(format!(
            "multiple USB serial ports found ({}); specify one with --port",
            names.join(", ")
        ))
        .into());
    }

    match usb.into_iter().next() {
        Some(port) => {
            info!("Auto-selected port: {}", port.name);
            Ok(port.name)
        },
        None => {
            debug!("No USB serial port found, falling back to {DEFAULT_PORT}");
            Ok(DEFAULT_PORT.to_string())
        },
    }
}

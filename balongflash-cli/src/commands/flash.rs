//! Flash command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use balongflash::image::signature::fw_description;
use balongflash::port::deciseconds;
use balongflash::protocol::prepare_download;
use balongflash::{
    FinishAction, Flasher, NativePort, PartitionTable, Port, PortMode, SerialConfig,
    SignatureMode,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::commands::firmware::{check_report, human_size, load_table};
use crate::config::Config;
use crate::serial::select_serial_port;
use crate::{Cli, CliError, use_fancy_output};

/// Arguments of the `flash` subcommand.
pub(crate) struct FlashArgs<'a> {
    pub(crate) firmware: &'a Path,
    pub(crate) dir: bool,
    pub(crate) force: bool,
    pub(crate) sign: Option<SignatureMode>,
    pub(crate) dload_id: Option<u8>,
    pub(crate) keep_hdlc: bool,
}

fn finish_action(keep_hdlc: bool) -> FinishAction {
    if keep_hdlc {
        FinishAction::LeaveHdlc
    } else {
        FinishAction::Restart
    }
}

/// Signature mode from `--sign`, then the config file, then auto.
fn signature_mode(sign: Option<SignatureMode>, config: &Config) -> Result<SignatureMode> {
    if let Some(mode) = sign {
        return Ok(mode);
    }
    match &config.flash.signature {
        Some(spec) => spec.parse::<SignatureMode>().map_err(|e| {
            anyhow::Error::from(CliError::Config(format!(
                "invalid flash.signature in config: {e}"
            )))
        }),
        None => Ok(SignatureMode::Auto),
    }
}

fn is_missing_device(err: &balongflash::Error) -> bool {
    match err {
        balongflash::Error::Serial(e) => matches!(
            e.kind(),
            serialport::ErrorKind::NoDevice
                | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound)
        ),
        balongflash::Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

fn open_port(name: &str, timeout_ds: u32) -> Result<NativePort> {
    let config = SerialConfig::new(name).with_timeout(deciseconds(timeout_ds));
    NativePort::open(&config).map_err(|e| {
        if is_missing_device(&e) {
            CliError::DeviceNotFound(format!("serial port {name} not found ({e})")).into()
        } else {
            anyhow::Error::from(e).context(format!("Failed to open serial port {name}"))
        }
    })
}

fn print_summary(table: &PartitionTable) {
    eprintln!(
        "{} Found {} partition(s), {}",
        style("ℹ").blue(),
        table.len(),
        human_size(table.total_size())
    );
    if let Some(id) = table.dload_id() {
        eprintln!(
            "    Firmware type: {id} ({})",
            fw_description(u32::from(id))
        );
    }
    for (i, entry) in table.iter().enumerate() {
        eprintln!(
            "    {} {i:02} {:<14} {:>10}",
            style("•").dim(),
            entry.name,
            entry.size()
        );
    }
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || cli.non_interactive || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, args: &FlashArgs<'_>) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            args.firmware.display()
        );
    }

    let (table, report) = load_table(args.firmware, args.dir, args.dload_id)?;
    if !cli.quiet {
        print_summary(&table);
    }
    check_report(&report, args.force || config.flash.force, cli.quiet)?;

    let mode = signature_mode(args.sign, config)?;
    info!("Signature mode: {mode}");
    let signver = mode
        .resolve(&table)
        .context("Failed to prepare signature parameters")?;

    let timeout_ds = cli.timeout_ds(config);
    let port_name = select_serial_port(&cli.serial_options(), config)?;
    if !cli.quiet {
        eprintln!("{} Using port {port_name}", style("🔌").cyan());
    }
    let mut port = open_port(&port_name, timeout_ds)?;

    match prepare_download(&mut port, signver.as_ref()) {
        Ok(PortMode::At { version }) if !cli.quiet => {
            eprintln!("{} Download protocol {version}", style("ℹ").blue());
            if signver.is_some() {
                eprintln!("{} Signature accepted", style("✓").green());
            }
        },
        Ok(PortMode::Hdlc) if !cli.quiet => {
            eprintln!("{} Modem already in HDLC mode", style("ℹ").blue());
        },
        Ok(_) => {},
        Err(err) => {
            let _ = port.close();
            return Err(err.into());
        },
    }

    let pb = progress_bar(cli);
    let mut flasher = Flasher::new(port).with_timeout(timeout_ds);
    let mut current = None;

    let result = flasher.flash_table(&table, |p| {
        if current != Some(p.index) {
            current = Some(p.index);
            pb.set_message(format!("{:02} {}", p.index, p.name));
            if pb.is_hidden() && !cli.quiet {
                eprintln!("  Writing {:02} {}", p.index, p.name);
            }
        }
        pb.set_position(p.percent() as u64);
    });

    let mut port = flasher.into_port();
    if let Err(err) = result {
        pb.abandon();
        let _ = port.close();
        return Err(err.into());
    }

    pb.finish_with_message("complete");

    let mut flasher = Flasher::new(port);
    let finished = flasher.finish(finish_action(args.keep_hdlc));
    let mut port = flasher.into_port();
    if let Err(err) = finished {
        let _ = port.close();
        return Err(anyhow::Error::from(err).context("Failed to end the download session"));
    }
    port.close()?;

    if !cli.quiet {
        eprintln!("\n{} Flashing complete", style("🎉").green().bold());
    }

    Ok(())
}

//! balongflash CLI - Command-line tool for flashing Balong V7 modems.
//!
//! ## Features
//!
//! - Flash firmware containers or directories of partition images
//! - Show the partition map of a firmware file
//! - Split a firmware file into partition images
//! - Digital signature handshake selection
//! - Shell completion generation
//! - Environment variable support

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use balongflash::SignatureMode;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;

mod commands;
mod config;
mod serial;

use config::Config;
use serial::SerialOptions;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Failures with a dedicated process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation.
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration value.
    #[error("{0}")]
    Config(String),
    /// The serial port could not be found.
    #[error("{0}")]
    DeviceNotFound(String),
    /// Firmware failed validation and `--force` was not given.
    #[error("{0}")]
    ValidationRefused(String),
}

impl CliError {
    /// Process exit code for this failure.
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::ValidationRefused(_) => 5,
        }
    }
}

/// Exit code for an error returned by a command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<balongflash::Error>() {
            return match lib_err {
                balongflash::Error::InvalidSignatureSpec(_) => 3,
                _ => 1,
            };
        }
    }
    1
}

/// balongflash - Flash Balong V7 modem firmware over the download protocol.
///
/// Environment variables:
///   BALONGFLASH_PORT              - Default serial port
///   BALONGFLASH_TIMEOUT           - Read timeout in deciseconds (default: 30)
///   BALONGFLASH_NON_INTERACTIVE   - Non-interactive mode
#[derive(Parser)]
#[command(name = "balongflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    balongflash info update.bin\n  \
    balongflash -p 0 flash update.bin\n  \
    balongflash flash --dir ./parts --dload-id 1\n  \
    balongflash split update.bin ./parts")]
pub(crate) struct Cli {
    /// Serial port to use; a bare number N means /dev/ttyUSBN or COMN.
    #[arg(short, long, global = true, env = "BALONGFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Read timeout in deciseconds.
    #[arg(short, long, global = true, env = "BALONGFLASH_TIMEOUT", value_name = "DS")]
    pub(crate) timeout: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of guessing).
    #[arg(long, global = true, env = "BALONGFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Flash a firmware file or a directory of partition images.
    Flash {
        /// Firmware file, or directory with --dir.
        firmware: PathBuf,

        /// Read raw partition images (NN-XXXXXXXX-Name) from a directory.
        #[arg(short, long)]
        dir: bool,

        /// Flash even when the image fails validation.
        #[arg(short, long)]
        force: bool,

        /// Signature mode: auto, d (disabled), preset index, or *,type,len.
        #[arg(short = 'g', long = "sign", value_name = "MODE")]
        sign: Option<SignatureMode>,

        /// Override the firmware type code (1-7).
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=7))]
        dload_id: Option<u8>,

        /// Leave HDLC mode instead of rebooting once flashing is done.
        #[arg(short, long)]
        keep_hdlc: bool,
    },

    /// Show the partition map of a firmware file.
    Info {
        /// Firmware file, or directory with --dir.
        firmware: PathBuf,

        /// Read raw partition images from a directory.
        #[arg(short, long)]
        dir: bool,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Write every partition of a firmware file to its own file.
    Split {
        /// Firmware file.
        firmware: PathBuf,

        /// Output directory.
        outdir: PathBuf,

        /// Keep headers and checksum blocks (.fw instead of .bin).
        #[arg(long)]
        with_headers: bool,

        /// Split even when the image fails validation.
        #[arg(short, long)]
        force: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List firmware type codes.
    FwTypes,

    /// List signature presets usable with --sign.
    SignPresets,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Read timeout in deciseconds, CLI/env first, then config.
    pub(crate) fn timeout_ds(&self, config: &Config) -> u32 {
        self.timeout
            .or(config.connection.timeout_ds)
            .unwrap_or(balongflash::flasher::COMMAND_TIMEOUT_DS)
    }

    pub(crate) fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            port: self.port.clone(),
            non_interactive: self.non_interactive,
        }
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            firmware,
            dir,
            force,
            sign,
            dload_id,
            keep_hdlc,
        } => commands::flash::cmd_flash(
            cli,
            config,
            &commands::flash::FlashArgs {
                firmware,
                dir: *dir,
                force: *force,
                sign: *sign,
                dload_id: *dload_id,
                keep_hdlc: *keep_hdlc,
            },
        ),
        Commands::Info {
            firmware,
            dir,
            json,
        } => commands::info::cmd_info(firmware, *dir, *json),
        Commands::Split {
            firmware,
            outdir,
            with_headers,
            force,
        } => commands::split::cmd_split(
            cli,
            config,
            firmware,
            outdir,
            *with_headers,
            *force,
        ),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::FwTypes => {
            commands::info::cmd_fw_types();
            Ok(())
        },
        Commands::SignPresets => {
            commands::info::cmd_sign_presets();
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "balongflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

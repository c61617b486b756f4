//! Split command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use balongflash::image::split::split_partitions;
use console::style;

use crate::commands::firmware::{check_report, load_table};
use crate::config::Config;
use crate::Cli;

/// Write each partition of `firmware` into `outdir`.
pub(crate) fn cmd_split(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    outdir: &Path,
    with_headers: bool,
    force: bool,
) -> Result<()> {
    let (table, report) = load_table(firmware, false, None)?;
    check_report(&report, force || config.flash.force, cli.quiet)?;

    let written = split_partitions(&table, outdir, with_headers)
        .with_context(|| format!("Failed to write partitions to {}", outdir.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} partition file(s) to {}",
            style("✓").green(),
            written.len(),
            style(outdir.display()).yellow()
        );
    }
    Ok(())
}

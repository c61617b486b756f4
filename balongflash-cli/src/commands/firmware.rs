//! Firmware loading shared by the `flash`, `info` and `split` commands.

use std::path::Path;

use anyhow::{Context, Result};
use balongflash::image::directory::scan_directory;
use balongflash::image::signature::check_consistency;
use balongflash::{PartitionTable, ValidationReport};
use console::style;

use crate::CliError;

/// Load a container file, or a directory of partition images when `dir`.
///
/// `dload_id` overrides the firmware type code declared by the container.
pub(crate) fn load_table(
    path: &Path,
    dir: bool,
    dload_id: Option<u8>,
) -> Result<(PartitionTable, ValidationReport)> {
    if dir {
        let table = scan_directory(path, dload_id)
            .with_context(|| format!("Failed to load partitions from {}", path.display()))?;
        check_consistency(&table);
        Ok((table, ValidationReport::new()))
    } else {
        PartitionTable::from_file(path, dload_id)
            .with_context(|| format!("Failed to load firmware {}", path.display()))
    }
}

/// Refuse to go on when the report has issues, unless forced.
pub(crate) fn check_report(report: &ValidationReport, force: bool, quiet: bool) -> Result<()> {
    if report.is_clean() {
        return Ok(());
    }

    let count = report.issues().len();
    if force {
        if !quiet {
            eprintln!(
                "{} {count} validation issue(s) ignored (--force)",
                style("⚠").yellow()
            );
        }
        return Ok(());
    }

    Err(CliError::ValidationRefused(format!(
        "firmware has {count} validation issue(s); use --force to continue anyway"
    ))
    .into())
}

/// Human-readable byte count.
pub(crate) fn human_size(size: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * 1024;
    #[allow(clippy::cast_precision_loss)]
    if size >= MB {
        format!("{:.1} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else {
        format!("{size} B")
    }
}

//! Firmware info, port listing and reference table commands.

use {
    crate::commands::firmware::{human_size, load_table},
    anyhow::Result,
    balongflash::{
        NativePortEnumerator, PartitionEntry, PartitionTable, PortEnumerator, ValidationReport,
        image::signature::{SIGN_PRESETS, fw_description, locate},
    },
    console::style,
    std::path::Path,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "usb": p.is_usb(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port.product.as_deref().unwrap_or("");

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            if !product.is_empty() {
                format!(" - {}", style(product).dim())
            } else {
                String::new()
            }
        );
    }

    if let Some(first) = ports.iter().find(|p| p.is_usb()) {
        eprintln!(
            "\n{} Default port: {}",
            style("→").green().bold(),
            style(&first.name).cyan().bold()
        );
    }

    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, dir: bool, json: bool) -> Result<()> {
    let (table, report) = load_table(firmware, dir, None)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info_json(&table, &report))?
        );
        return Ok(());
    }

    eprintln!("\n{}", style("Firmware Information").bold().underlined());
    if let Some(declared) = table.declared_type() {
        eprintln!(
            "  Firmware type: {declared} ({})",
            fw_description(u32::from(declared))
        );
    }
    eprintln!("  Partitions: {}", table.len());
    eprintln!("  Total size: {}", human_size(table.total_size()));

    match locate(&table) {
        Ok(Some(sig)) => {
            eprintln!(
                "  Signature: {} bytes in partition {}",
                sig.signature_len, sig.partition
            );
            eprintln!("  Public key hash: {}", sig.public_key_hash);
        },
        Ok(None) => eprintln!("  Signature: none"),
        Err(e) => eprintln!("  Signature: {}", style(e).red()),
    }

    eprintln!("\n{}", style("Partitions").bold().underlined());
    eprintln!(
        "  {:>2}  {:>8}  {:<14} {:>8}  {:>10}  {:<3}  Version",
        "#", "Code", "Name", "Offset", "Size", "Cmp"
    );
    for (i, entry) in table.iter().enumerate() {
        eprintln!("  {}", format_row(i, entry));
    }

    if !report.is_clean() {
        eprintln!("\n{}", style("Validation issues").bold().underlined());
        for issue in report.issues() {
            eprintln!("  {} {issue}", style("✗").red());
        }
    }

    Ok(())
}

/// One line of the partition map.
fn format_row(index: usize, entry: &PartitionEntry) -> String {
    let size = match entry.original_size {
        Some(stored) => format!("{stored}>{}", entry.size()),
        None => entry.size().to_string(),
    };
    format!(
        "{index:>2}  {:08x}  {:<14} {:>8x}  {size:>10}  {:<3}  {} {} {}",
        entry.code(),
        entry.name,
        entry.offset,
        entry.compression.tag(),
        entry.header.version_str(),
        entry.header.date_str(),
        entry.header.time_str(),
    )
}

/// Info command `--json` document.
fn info_json(table: &PartitionTable, report: &ValidationReport) -> serde_json::Value {
    let partitions: Vec<serde_json::Value> = table
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            serde_json::json!({
                "index": i,
                "code": format!("0x{:08x}", entry.code()),
                "name": entry.name,
                "offset": entry.offset,
                "size": entry.size(),
                "stored_size": entry.original_size,
                "compression": entry.compression,
                "hdversion": entry.header.hdversion,
                "date": entry.header.date_str(),
                "time": entry.header.time_str(),
                "version": entry.header.version_str(),
            })
        })
        .collect();

    let signature = locate(table).ok().flatten();

    serde_json::json!({
        "ok": true,
        "data": {
            "firmware_type": table.declared_type(),
            "firmware_type_description": table
                .declared_type()
                .map(|t| fw_description(u32::from(t))),
            "partition_count": table.len(),
            "total_size": table.total_size(),
            "signature": signature,
            "issues": report.issues(),
            "partitions": partitions,
        }
    })
}

/// Firmware type codes.
pub(crate) fn cmd_fw_types() {
    eprintln!("{}", style("Firmware types").bold().underlined());
    for code in 0..8u32 {
        println!("  {code}  {}", fw_description(code));
    }
}

/// Signature presets.
pub(crate) fn cmd_sign_presets() {
    eprintln!("{}", style("Signature presets (--sign N)").bold().underlined());
    for (i, preset) in SIGN_PRESETS.iter().enumerate() {
        println!(
            "  {i}  {},{:<5} {}",
            preset.fw_type, preset.len, preset.description
        );
    }
    eprintln!(
        "\nCustom parameters: --sign '*,TYPE,LEN'; disable with --sign d"
    );
}

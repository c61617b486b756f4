//! Export partitions of a table to individual files.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::Result;
use crate::image::firmware::{PartitionEntry, PartitionTable};

/// File name for partition `index`: `NN-XXXXXXXX-Name.bin`, or `.fw` when
/// the header is included.
pub fn partition_file_name(index: usize, entry: &PartitionEntry, with_headers: bool) -> String {
    let ext = if with_headers { "fw" } else { "bin" };
    format!("{index:02}-{:08x}-{}.{ext}", entry.code(), entry.name)
}

/// Write every partition of `table` into `outdir`.
///
/// Without headers the files hold the bare body and can be flashed back in
/// directory mode. With headers each file holds the full record (header,
/// checksum block and body). Returns the written paths in table order.
pub fn split_partitions<P: AsRef<Path>>(
    table: &PartitionTable,
    outdir: P,
    with_headers: bool,
) -> Result<Vec<PathBuf>> {
    let outdir = outdir.as_ref();
    fs::create_dir_all(outdir)?;

    let mut written = Vec::with_capacity(table.len());
    for (index, entry) in table.iter().enumerate() {
        let path = outdir.join(partition_file_name(index, entry, with_headers));
        if with_headers {
            fs::write(&path, entry.record_bytes())?;
        } else {
            fs::write(&path, &entry.body)?;
        }
        info!("{:02}  {:<14} -> {}", index, entry.name, path.display());
        written.push(path);
    }
    Ok(written)
}

//! Partition table built from a directory of raw partition images.
//!
//! Files are named `NN-XXXXXXXX-Name.ext`: a two-digit flashing index, the
//! partition code as 8 hex digits, and a free-form suffix. Indices are
//! taken in order from `00` and the scan stops at the first gap.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::image::firmware::{PartitionEntry, PartitionTable};
use crate::image::header::MARKER;

/// Highest number of partition files taken from one directory.
pub const MAX_PARTITION_FILES: usize = 30;

/// Partition code encoded in a partition file name.
pub fn parse_file_name(name: &str) -> Option<u32> {
    let bytes = name.as_bytes();
    if bytes.len() < 12
        || !bytes[..2].iter().all(u8::is_ascii_digit)
        || bytes[2] != b'-'
        || bytes[11] != b'-'
    {
        return None;
    }
    let code = &name[3..11];
    if !code.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(code, 16).ok()
}

fn invalid(path: &Path, reason: impl Into<String>) -> Error {
    Error::InvalidPartitionFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Regular file in `dir` whose name starts with the two-digit `index`.
fn find_file(dir: &Path, index: usize) -> Result<Option<PathBuf>> {
    let prefix = format!("{index:02}");
    let mut found: Option<PathBuf> = None;

    for dentry in fs::read_dir(dir)? {
        let dentry = dentry?;
        if !dentry.file_type()?.is_file() {
            continue;
        }
        let name = dentry.file_name();
        if !name.to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let path = dentry.path();
        if let Some(first) = &found {
            return Err(invalid(
                &path,
                format!("index {prefix} is also used by {}", first.display()),
            ));
        }
        found = Some(path);
    }
    Ok(found)
}

fn load_entry(path: &Path) -> Result<PartitionEntry> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let code = parse_file_name(&name)
        .ok_or_else(|| invalid(path, "name is not NN-XXXXXXXX-Name"))?;

    let body = fs::read(path)?;
    if body.len() < 4 {
        return Err(invalid(path, "file is too short"));
    }
    if u32::from_le_bytes([body[0], body[1], body[2], body[3]]) == MARKER {
        return Err(invalid(path, "file has a header - not suitable for flashing"));
    }
    if u32::try_from(body.len()).is_err() {
        return Err(invalid(path, "file is too large"));
    }
    Ok(PartitionEntry::raw(code, body))
}

/// Build a partition table from the files in `dir`.
///
/// `dload_id` is the firmware type to flash with, since raw files carry
/// none.
pub fn scan_directory<P: AsRef<Path>>(dir: P, dload_id: Option<u8>) -> Result<PartitionTable> {
    let dir = dir.as_ref();
    info!("Searching for partition image files in {}", dir.display());

    let mut table = PartitionTable::new(dload_id);
    for index in 0..MAX_PARTITION_FILES {
        let Some(path) = find_file(dir, index)? else {
            break;
        };
        let entry = load_entry(&path)?;
        debug!(
            "  [{index:02}] {:>8} {:08x} {:<14} {}",
            entry.size(),
            entry.code(),
            entry.name,
            path.display()
        );
        table.push(entry);
    }

    if table.is_empty() {
        return Err(Error::NoPartitionFiles(dir.to_path_buf()));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, data: &[u8]) {
        fs::write(dir.join(name), data).unwrap();
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("00-00020000-M3Boot.bin"), Some(0x20000));
        assert_eq!(parse_file_name("07-005aFFff-x"), Some(0x005A_FFFF));
        assert_eq!(parse_file_name("00_00020000-M3Boot.bin"), None);
        assert_eq!(parse_file_name("00-0002000-M3Boot.bin"), None);
        assert_eq!(parse_file_name("00-0002000G-M3Boot.bin"), None);
        assert_eq!(parse_file_name("00-00020000"), None);
    }

    #[test]
    fn test_scan_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "01-00030000-Kernel.bin", &[2; 300]);
        write(dir.path(), "00-00020000-M3Boot.bin", &[1; 100]);
        write(dir.path(), "03-00040000-Skipped.bin", &[3; 10]);

        let table = scan_directory(dir.path(), Some(1)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].name, "M3Boot");
        assert_eq!(table.entries()[0].size(), 100);
        assert_eq!(table.entries()[1].code(), 0x30000);
        assert_eq!(table.entries()[1].header.psize, 300);
        assert!(table.entries()[1].checksums.is_empty());
        assert_eq!(table.dload_id(), Some(1));
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_directory(dir.path(), None),
            Err(Error::NoPartitionFiles(_))
        ));
    }

    #[test]
    fn test_container_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = MARKER.to_le_bytes().to_vec();
        data.extend_from_slice(&[0; 96]);
        write(dir.path(), "00-00020000-M3Boot.fw", &data);

        let err = scan_directory(dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidPartitionFile { .. }));
        assert!(err.to_string().contains("has a header"));
    }

    #[test]
    fn test_bad_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "00-kernel.bin", &[0; 16]);
        assert!(matches!(
            scan_directory(dir.path(), None),
            Err(Error::InvalidPartitionFile { .. })
        ));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "00-00020000-M3Boot.bin", &[0; 16]);
        write(dir.path(), "00-00030000-Kernel.bin", &[0; 16]);
        assert!(matches!(
            scan_directory(dir.path(), None),
            Err(Error::InvalidPartitionFile { .. })
        ));
    }

    #[test]
    fn test_subdirectories_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("00-00020000-dir")).unwrap();
        write(dir.path(), "00-00020000-M3Boot.bin", &[0; 16]);
        let table = scan_directory(dir.path(), None).unwrap();
        assert_eq!(table.len(), 1);
    }
}

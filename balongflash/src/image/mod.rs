//! Firmware image handling.

pub mod decompress;
pub mod directory;
pub mod firmware;
pub mod header;
pub mod names;
pub mod signature;
pub mod split;

pub use decompress::{Compression, DecompressLimits};
pub use firmware::{
    IssueKind, PartitionEntry, PartitionTable, ValidationIssue, ValidationReport,
};
pub use header::PartitionHeader;
pub use signature::{SignatureMode, SignatureRecord};

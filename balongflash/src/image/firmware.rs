//! Balong firmware container parser.
//!
//! ## Container Overview
//!
//! ```text
//! +---------------------------+  image start (anywhere in the file)
//! |  preamble (0x5C bytes)    |  byte 0 = firmware type code (dload_id)
//! +---------------------------+  image start + 0x5C
//! |  record 0                 |
//! |   header (100 bytes)      |  magic = 0xA55AAA55
//! |   checksum block          |  hdsize - 100 bytes
//! |   body                    |  psize bytes
//! +---------------------------+  padded to 4 bytes
//! |  record 1 ...             |
//! +---------------------------+
//! ```
//!
//! The chain ends at the first aligned word that is not the marker.
//! Checksum and decompression failures do not stop parsing; they are
//! collected in a [`ValidationReport`] returned next to the table.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::decompress::{self, Compression, DecompressError, DecompressLimits};
use crate::image::header::{
    HEADER_SIZE, MARKER, PartitionHeader, checksum_block, checksum_block_bytes,
};
use crate::image::names::partition_name;
use crate::image::signature;

/// Length of the container preamble.
pub const PREAMBLE_LEN: usize = 0x5C;

/// Distance from the start of the preamble to the end of the first marker.
const PREAMBLE_SPAN: u64 = 0x60;

/// Largest firmware type code a container may declare.
pub const MAX_FIRMWARE_TYPE: u8 = 0xF;

/// One partition of the image.
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    /// Partition header. After parsing, `psize`, `hdsize` and `crc`
    /// describe the body as held in memory.
    pub header: PartitionHeader,
    /// Checksum block describing `body`.
    pub checksums: Vec<u16>,
    /// Partition body, decompressed when the container stored it compressed.
    pub body: Vec<u8>,
    /// Compression found in the container.
    pub compression: Compression,
    /// Stored size when the body was decompressed.
    pub original_size: Option<u32>,
    /// Symbolic name resolved from the code.
    pub name: String,
    /// File offset of the record, 0 for directory-mode partitions.
    pub offset: u64,
}

impl PartitionEntry {
    /// Entry for a raw body with no checksum block.
    #[allow(clippy::cast_possible_truncation)] // callers bound the body to u32
    pub fn raw(code: u32, body: Vec<u8>) -> Self {
        Self {
            header: PartitionHeader::raw(code, body.len() as u32),
            checksums: Vec::new(),
            body,
            compression: Compression::None,
            original_size: None,
            name: partition_name(code),
            offset: 0,
        }
    }

    /// Partition type code.
    pub fn code(&self) -> u32 {
        self.header.code
    }

    /// Body length in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Recompute the checksum block, `hdsize` and header CRC from the body.
    #[allow(clippy::cast_possible_truncation)] // bodies are bounded well below 4 GiB
    pub fn refresh_checksums(&mut self) {
        self.header.psize = self.body.len() as u32;
        self.checksums = checksum_block(&self.body, self.header.blocksize);
        self.header.hdsize = (self.checksums.len() * 2 + HEADER_SIZE) as u32;
        self.header.crc = self.header.compute_crc();
    }

    /// Header, checksum block and body as one record.
    pub fn record_bytes(&self) -> Vec<u8> {
        let mut out = self.header.to_bytes();
        out.extend_from_slice(&checksum_block_bytes(&self.checksums));
        out.extend_from_slice(&self.body);
        out
    }
}

/// What failed to validate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum IssueKind {
    /// Stored header CRC does not match.
    HeaderChecksum,
    /// Stored checksum block has the wrong length.
    ChecksumBlockSize {
        /// Length implied by the body, in bytes.
        expected: usize,
        /// Length stored in the container, in bytes.
        actual: usize,
    },
    /// Stored checksum block disagrees with the body.
    BlockChecksum,
    /// The compressed body could not be unpacked.
    Decompression(String),
}

/// A validation failure recorded while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ValidationIssue {
    /// Partition index.
    pub index: usize,
    /// Partition name.
    pub name: String,
    /// Numeric tag of the partition code.
    pub tag: u32,
    /// Failure.
    pub kind: IssueKind,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Partition {} ({:02x}) - ", self.name, self.tag)?;
        match &self.kind {
            IssueKind::HeaderChecksum => write!(f, "header checksum error"),
            IssueKind::ChecksumBlockSize { expected, actual } => write!(
                f,
                "incorrect checksum block size ({actual} bytes, expected {expected})"
            ),
            IssueKind::BlockChecksum => write!(f, "incorrect block checksum"),
            IssueKind::Decompression(reason) => write!(f, "decompression error: {reason}"),
        }
    }
}

/// Validation failures collected over a whole parse.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issue.
    pub fn record(&mut self, issue: ValidationIssue) {
        warn!("{issue}");
        self.issues.push(issue);
    }

    /// Whether nothing failed.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// All recorded issues, in discovery order.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

/// Ordered partitions of one image. Order is flashing order.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
    declared_type: Option<u8>,
    dload_id: Option<u8>,
}

impl PartitionTable {
    /// Create an empty table with an optional effective firmware type.
    pub fn new(dload_id: Option<u8>) -> Self {
        Self {
            entries: Vec::new(),
            declared_type: None,
            dload_id,
        }
    }

    /// Parse a container file.
    ///
    /// `forced_type` overrides the firmware type declared in the preamble.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        forced_type: Option<u8>,
    ) -> Result<(Self, ValidationReport)> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(reader, forced_type)
    }

    /// Parse a container held in memory.
    pub fn from_bytes(data: &[u8], forced_type: Option<u8>) -> Result<(Self, ValidationReport)> {
        Self::from_reader(Cursor::new(data), forced_type)
    }

    /// Parse a container from any seekable reader.
    pub fn from_reader<R: Read + Seek>(
        reader: R,
        forced_type: Option<u8>,
    ) -> Result<(Self, ValidationReport)> {
        Self::from_reader_with_limits(reader, forced_type, DecompressLimits::default())
    }

    /// Parse a container with explicit decompression bounds.
    pub fn from_reader_with_limits<R: Read + Seek>(
        reader: R,
        forced_type: Option<u8>,
        limits: DecompressLimits,
    ) -> Result<(Self, ValidationReport)> {
        FirmwareParser::new(reader, forced_type, limits).run()
    }

    /// Append a partition.
    pub fn push(&mut self, entry: PartitionEntry) {
        self.entries.push(entry);
    }

    /// All partitions in order.
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    /// Iterate over partitions in order.
    pub fn iter(&self) -> std::slice::Iter<'_, PartitionEntry> {
        self.entries.iter()
    }

    /// Partition by index.
    pub fn get(&self, index: usize) -> Option<&PartitionEntry> {
        self.entries.get(index)
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Firmware type declared in the container preamble.
    pub fn declared_type(&self) -> Option<u8> {
        self.declared_type
    }

    /// Effective firmware type: forced, or else declared.
    pub fn dload_id(&self) -> Option<u8> {
        self.dload_id
    }

    /// Sum of all body sizes.
    pub fn total_size(&self) -> usize {
        self.entries.iter().map(PartitionEntry::size).sum()
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a PartitionEntry;
    type IntoIter = std::slice::Iter<'a, PartitionEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Seeking,
    HeaderRead,
    PartitionLoop,
    Done,
}

struct FirmwareParser<R> {
    reader: R,
    forced_type: Option<u8>,
    limits: DecompressLimits,
    table: PartitionTable,
    report: ValidationReport,
}

impl<R: Read + Seek> FirmwareParser<R> {
    fn new(reader: R, forced_type: Option<u8>, limits: DecompressLimits) -> Self {
        Self {
            reader,
            forced_type,
            limits,
            table: PartitionTable::new(forced_type),
            report: ValidationReport::new(),
        }
    }

    fn run(mut self) -> Result<(PartitionTable, ValidationReport)> {
        let mut state = ParseState::Seeking;
        loop {
            state = match state {
                ParseState::Seeking => self.seek_marker()?,
                ParseState::HeaderRead => self.read_preamble()?,
                ParseState::PartitionLoop => self.next_partition()?,
                ParseState::Done => break,
            };
        }
        self.finish();
        Ok((self.table, self.report))
    }

    /// Read the next aligned word, `None` at end of stream.
    fn read_word(&mut self) -> Result<Option<u32>> {
        let mut word = [0u8; 4];
        match self.reader.read_exact(&mut word) {
            Ok(()) => Ok(Some(u32::from_le_bytes(word))),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn seek_marker(&mut self) -> Result<ParseState> {
        while let Some(word) = self.read_word()? {
            if word == MARKER {
                return Ok(ParseState::HeaderRead);
            }
        }
        Err(Error::NoFirmwareImage)
    }

    fn read_preamble(&mut self) -> Result<ParseState> {
        let pos = self.reader.stream_position()?;
        if pos < PREAMBLE_SPAN {
            return Err(Error::HeaderTooSmall { offset: pos - 4 });
        }
        self.reader.seek(SeekFrom::Start(pos - PREAMBLE_SPAN))?;
        let mut preamble = [0u8; PREAMBLE_LEN];
        self.reader.read_exact(&mut preamble)?;

        let declared = preamble[0];
        let effective = self.forced_type.unwrap_or(declared);
        if effective > MAX_FIRMWARE_TYPE {
            return Err(Error::InvalidFirmwareType(u32::from(effective)));
        }
        info!(
            "Firmware file code: {declared:x} ({})",
            signature::fw_description(u32::from(declared))
        );
        self.table.declared_type = Some(declared);
        self.table.dload_id = Some(effective);
        Ok(ParseState::PartitionLoop)
    }

    fn next_partition(&mut self) -> Result<ParseState> {
        match self.read_word()? {
            Some(MARKER) => {
                self.reader.seek(SeekFrom::Current(-4))?;
                self.extract()?;
                self.align()?;
                Ok(ParseState::PartitionLoop)
            },
            _ => Ok(ParseState::Done),
        }
    }

    fn align(&mut self) -> Result<()> {
        let pos = self.reader.stream_position()?;
        if pos & 3 != 0 {
            self.reader.seek(SeekFrom::Start((pos + 4) & !3))?;
        }
        Ok(())
    }

    /// Read `len` bytes, failing with a truncation error if the stream ends.
    fn read_exact_vec(&mut self, len: usize, index: usize, offset: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.reader).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(Error::TruncatedPartition { index, offset });
        }
        Ok(buf)
    }

    fn extract(&mut self) -> Result<()> {
        let index = self.table.len();
        let offset = self.reader.stream_position()?;

        let header_bytes = self.read_exact_vec(HEADER_SIZE, index, offset)?;
        let header = PartitionHeader::read_from(&mut header_bytes.as_slice())?;
        let name = partition_name(header.code);
        let stored_block = self.read_exact_vec(header.checksum_block_len(), index, offset)?;
        let body = self.read_exact_vec(header.psize as usize, index, offset)?;

        debug!(
            "  [{index}] {name} @ {offset:#x}: code {:08x}, {} bytes, blocksize {}",
            header.code, header.psize, header.blocksize
        );

        let header_ok = header.crc_valid();
        let mut entry = PartitionEntry {
            header,
            checksums: Vec::new(),
            body,
            compression: Compression::None,
            original_size: None,
            name,
            offset,
        };

        if !header_ok {
            self.issue(&entry, index, IssueKind::HeaderChecksum);
        }

        entry.refresh_checksums();
        let expected = checksum_block_bytes(&entry.checksums);
        if expected.len() != stored_block.len() {
            self.issue(
                &entry,
                index,
                IssueKind::ChecksumBlockSize {
                    expected: expected.len(),
                    actual: stored_block.len(),
                },
            );
        } else if expected != stored_block {
            self.issue(&entry, index, IssueKind::BlockChecksum);
        }

        self.decompress(&mut entry, index)?;
        self.table.push(entry);
        Ok(())
    }

    fn decompress(&mut self, entry: &mut PartitionEntry, index: usize) -> Result<()> {
        let compression = decompress::detect(&entry.body);
        let result = match compression {
            Compression::None => return Ok(()),
            Compression::Zlib => decompress::inflate_zlib_bounded(&entry.body, self.limits.zlib),
            Compression::Lzma => decompress::decode_lzma_bounded(&entry.body, self.limits.lzma),
        };

        match result {
            Ok(data) => {
                debug!(
                    "  [{index}] {:?}: {} -> {} bytes",
                    compression,
                    entry.body.len(),
                    data.len()
                );
                entry.original_size = Some(entry.header.psize);
                entry.body = data;
                entry.compression = compression;
                entry.refresh_checksums();
            },
            Err(DecompressError::TooLarge { limit }) if compression == Compression::Lzma => {
                return Err(Error::DecompressedTooLarge { index, limit });
            },
            Err(e) => self.issue(entry, index, IssueKind::Decompression(e.to_string())),
        }
        Ok(())
    }

    fn issue(&mut self, entry: &PartitionEntry, index: usize, kind: IssueKind) {
        self.report.record(ValidationIssue {
            index,
            name: entry.name.clone(),
            tag: entry.header.tag(),
            kind,
        });
    }

    fn finish(&self) {
        info!("Found {} partitions", self.table.len());
        signature::check_consistency(&self.table);
    }
}

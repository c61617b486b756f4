//! Partition record header of the Balong firmware container.
//!
//! ## Layout (100 bytes, little-endian)
//!
//! ```text
//! 0x00  magic      u32   0xA55AAA55
//! 0x04  hdsize     u32   header + checksum block length
//! 0x08  hdversion  u32
//! 0x0C  unlock     [8]
//! 0x14  code       u32   partition type code
//! 0x18  psize      u32   body length
//! 0x1C  date       [16]  NUL-padded text
//! 0x2C  time       [16]  NUL-padded text
//! 0x3C  version    [32]  NUL-padded text
//! 0x5C  crc        u16   CRC16 of the header with this field zeroed
//! 0x5E  pad        [2]
//! 0x60  blocksize  u32   granularity of the checksum block
//! ```

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::protocol::crc::crc16;

/// Marker word opening the container preamble and every partition record.
pub const MARKER: u32 = 0xA55AAA55;

/// Size of [`PartitionHeader`] on disk.
pub const HEADER_SIZE: usize = 100;

/// Byte offset of the `crc` field.
const CRC_OFFSET: usize = 0x5C;

/// Fixed-size header in front of each partition record.
///
/// Fields the parser does not interpret are kept so the header round-trips
/// byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHeader {
    /// Record marker, normally [`MARKER`].
    pub magic: u32,
    /// Header size plus checksum block size.
    pub hdsize: u32,
    /// Header format version.
    pub hdversion: u32,
    /// Unlock bytes.
    pub unlock: [u8; 8],
    /// Partition type code.
    pub code: u32,
    /// Body size in bytes.
    pub psize: u32,
    /// Build date.
    pub date: [u8; 16],
    /// Build time.
    pub time: [u8; 16],
    /// Firmware version string.
    pub version: [u8; 32],
    /// Header CRC16.
    pub crc: u16,
    /// Padding after the CRC.
    pub pad: [u8; 2],
    /// Bytes of body covered by each checksum block entry.
    pub blocksize: u32,
}

impl Default for PartitionHeader {
    fn default() -> Self {
        Self {
            magic: MARKER,
            hdsize: HEADER_SIZE as u32,
            hdversion: 0,
            unlock: [0; 8],
            code: 0,
            psize: 0,
            date: [0; 16],
            time: [0; 16],
            version: [0; 32],
            crc: 0,
            pad: [0; 2],
            blocksize: 0,
        }
    }
}

impl PartitionHeader {
    /// Header for a raw partition body with no checksum block.
    pub fn raw(code: u32, psize: u32) -> Self {
        Self {
            code,
            psize,
            ..Self::default()
        }
    }

    /// Read a header from a reader (100 bytes).
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let hdsize = reader.read_u32::<LittleEndian>()?;
        let hdversion = reader.read_u32::<LittleEndian>()?;
        let mut unlock = [0u8; 8];
        reader.read_exact(&mut unlock)?;
        let code = reader.read_u32::<LittleEndian>()?;
        let psize = reader.read_u32::<LittleEndian>()?;
        let mut date = [0u8; 16];
        reader.read_exact(&mut date)?;
        let mut time = [0u8; 16];
        reader.read_exact(&mut time)?;
        let mut version = [0u8; 32];
        reader.read_exact(&mut version)?;
        let crc = reader.read_u16::<LittleEndian>()?;
        let mut pad = [0u8; 2];
        reader.read_exact(&mut pad)?;
        let blocksize = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            magic,
            hdsize,
            hdversion,
            unlock,
            code,
            psize,
            date,
            time,
            version,
            crc,
            pad,
            blocksize,
        })
    }

    /// Serialize to the 100-byte on-disk layout.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.write_u32::<LittleEndian>(self.magic).unwrap();
        buf.write_u32::<LittleEndian>(self.hdsize).unwrap();
        buf.write_u32::<LittleEndian>(self.hdversion).unwrap();
        buf.extend_from_slice(&self.unlock);
        buf.write_u32::<LittleEndian>(self.code).unwrap();
        buf.write_u32::<LittleEndian>(self.psize).unwrap();
        buf.extend_from_slice(&self.date);
        buf.extend_from_slice(&self.time);
        buf.extend_from_slice(&self.version);
        buf.write_u16::<LittleEndian>(self.crc).unwrap();
        buf.extend_from_slice(&self.pad);
        buf.write_u32::<LittleEndian>(self.blocksize).unwrap();
        buf
    }

    /// CRC16 of the header with the `crc` field zeroed.
    pub fn compute_crc(&self) -> u16 {
        let mut bytes = self.to_bytes();
        bytes[CRC_OFFSET..CRC_OFFSET + 2].fill(0);
        crc16(&bytes)
    }

    /// Whether the stored CRC matches the header contents.
    pub fn crc_valid(&self) -> bool {
        self.compute_crc() == self.crc
    }

    /// Length in bytes of the checksum block following the header.
    pub fn checksum_block_len(&self) -> usize {
        (self.hdsize as usize).saturating_sub(HEADER_SIZE)
    }

    /// Short numeric tag from the high half of the code, used in messages.
    pub fn tag(&self) -> u32 {
        self.code >> 16
    }

    /// Build date as text.
    pub fn date_str(&self) -> String {
        field_str(&self.date)
    }

    /// Build time as text.
    pub fn time_str(&self) -> String {
        field_str(&self.time)
    }

    /// Version string as text.
    pub fn version_str(&self) -> String {
        field_str(&self.version)
    }
}

fn field_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Per-chunk CRC16 values of `body` at `blocksize` granularity.
///
/// The last chunk covers whatever remains. A zero `blocksize` yields an
/// empty block.
pub fn checksum_block(body: &[u8], blocksize: u32) -> Vec<u16> {
    if blocksize == 0 {
        return Vec::new();
    }
    body.chunks(blocksize as usize).map(crc16).collect()
}

/// Checksum block as stored on disk (little-endian words).
pub fn checksum_block_bytes(block: &[u16]) -> Vec<u8> {
    block.iter().flat_map(|c| c.to_le_bytes()).collect()
}

//! Detection and bounded decompression of partition bodies.
//!
//! Bodies are either stored as-is, as a zlib stream (`78 DA` header), or
//! as a raw `.lzma` stream with an unknown-size header.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use thiserror::Error;

/// Largest accepted zlib output.
pub const ZLIB_LIMIT: usize = 50 * 1024 * 1024;

/// Largest accepted LZMA output.
pub const LZMA_LIMIT: usize = 100 * 1024 * 1024;

/// Output bounds applied while unpacking partition bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompressLimits {
    /// Largest zlib output, in bytes.
    pub zlib: usize,
    /// Largest LZMA output, in bytes.
    pub lzma: usize,
}

impl Default for DecompressLimits {
    fn default() -> Self {
        Self {
            zlib: ZLIB_LIMIT,
            lzma: LZMA_LIMIT,
        }
    }
}

/// zlib header read as a little-endian word.
const ZLIB_TAG: u16 = 0xDA78;

/// First byte of an LZMA header with the default properties.
const LZMA_PROPS: u8 = 0x5D;

/// Compression of a partition body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Compression {
    /// Stored as-is.
    #[default]
    None,
    /// zlib stream.
    Zlib,
    /// Raw LZMA stream.
    Lzma,
}

impl Compression {
    /// One-letter tag used in file maps.
    pub fn tag(self) -> char {
        match self {
            Self::None => ' ',
            Self::Zlib => 'Z',
            Self::Lzma => 'L',
        }
    }
}

/// Why decompression produced no body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecompressError {
    /// The stream is damaged.
    #[error("corrupt stream: {0}")]
    Corrupt(String),
    /// The output would exceed the size bound.
    #[error("output exceeds {limit} bytes")]
    TooLarge {
        /// The bound that was hit.
        limit: usize,
    },
}

/// Identify the compression of `body` from its leading bytes.
pub fn detect(body: &[u8]) -> Compression {
    if body.len() >= 2 && u16::from_le_bytes([body[0], body[1]]) == ZLIB_TAG {
        Compression::Zlib
    } else if body.len() >= 13 && body[0] == LZMA_PROPS && body[5..13].iter().all(|&b| b == 0xFF)
    {
        Compression::Lzma
    } else {
        Compression::None
    }
}

/// Inflate a zlib body, refusing output above [`ZLIB_LIMIT`].
pub fn inflate_zlib(body: &[u8]) -> Result<Vec<u8>, DecompressError> {
    inflate_zlib_bounded(body, ZLIB_LIMIT)
}

/// Inflate a zlib body, refusing output above `limit`.
pub fn inflate_zlib_bounded(body: &[u8], limit: usize) -> Result<Vec<u8>, DecompressError> {
    let mut out = Vec::new();
    ZlibDecoder::new(body)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecompressError::Corrupt(e.to_string()))?;
    if out.len() > limit {
        return Err(DecompressError::TooLarge { limit });
    }
    Ok(out)
}

/// Decode a raw LZMA body, refusing output above [`LZMA_LIMIT`].
pub fn decode_lzma(body: &[u8]) -> Result<Vec<u8>, DecompressError> {
    decode_lzma_bounded(body, LZMA_LIMIT)
}

/// Decode a raw LZMA body, refusing output above `limit`.
pub fn decode_lzma_bounded(body: &[u8], limit: usize) -> Result<Vec<u8>, DecompressError> {
    let mut sink = BoundedSink::new(limit);
    let mut input = io::BufReader::new(body);
    match lzma_rs::lzma_decompress(&mut input, &mut sink) {
        Ok(()) => Ok(sink.buf),
        Err(_) if sink.overflowed => Err(DecompressError::TooLarge { limit }),
        Err(e) => Err(DecompressError::Corrupt(e.to_string())),
    }
}

/// Writer that refuses to grow past a fixed size.
struct BoundedSink {
    buf: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl BoundedSink {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            overflowed: false,
        }
    }
}

impl Write for BoundedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            self.overflowed = true;
            return Err(io::Error::other("decompression limit exceeded"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as Level;
    use flate2::write::ZlibEncoder;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Level::best());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn lzma(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut io::BufReader::new(data), &mut out).unwrap();
        out
    }

    #[test]
    fn test_detect_zlib() {
        let body = zlib(b"hello hello hello");
        assert_eq!(&body[..2], &[0x78, 0xDA]);
        assert_eq!(detect(&body), Compression::Zlib);
    }

    #[test]
    fn test_detect_lzma() {
        let body = lzma(b"hello hello hello");
        assert_eq!(detect(&body), Compression::Lzma);

        let mut header = vec![0x5D, 0, 0, 0x80, 0];
        header.extend_from_slice(&[0xFF; 8]);
        assert_eq!(detect(&header), Compression::Lzma);
    }

    #[test]
    fn test_detect_plain() {
        assert_eq!(detect(&[]), Compression::None);
        assert_eq!(detect(&[0x78]), Compression::None);
        assert_eq!(detect(&[0x78, 0x9C, 0, 0]), Compression::None);
        let mut almost = vec![0x5D, 0, 0, 0x80, 0];
        almost.extend_from_slice(&[0xFF; 7]);
        almost.push(0x00);
        assert_eq!(detect(&almost), Compression::None);
    }

    #[test]
    fn test_inflate_zlib() {
        let data = vec![0x42u8; 100_000];
        assert_eq!(inflate_zlib(&zlib(&data)).unwrap(), data);
    }

    #[test]
    fn test_inflate_zlib_corrupt() {
        // Reserved block type right after the header
        let body = [0x78, 0xDA, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            inflate_zlib(&body),
            Err(DecompressError::Corrupt(_))
        ));
    }

    #[test]
    fn test_inflate_zlib_bound() {
        let body = zlib(&[0u8; 5000]);
        assert_eq!(
            inflate_zlib_bounded(&body, 4096),
            Err(DecompressError::TooLarge { limit: 4096 })
        );
    }

    #[test]
    fn test_decode_lzma() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(decode_lzma(&lzma(&data)).unwrap(), data);
    }

    #[test]
    fn test_decode_lzma_bound() {
        let body = lzma(&[0u8; 10_000]);
        assert_eq!(
            decode_lzma_bounded(&body, 1000),
            Err(DecompressError::TooLarge { limit: 1000 })
        );
    }

    #[test]
    fn test_decode_lzma_corrupt() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        let body = lzma(&data);
        assert!(matches!(
            decode_lzma(&body[..body.len() / 2]),
            Err(DecompressError::Corrupt(_))
        ));
    }
}

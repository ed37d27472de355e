//! Pluggable compression for stored-field chunks.
//!
//! Compression is a capability, not an inheritance hierarchy: writers hold a
//! boxed [`Compressor`], readers a boxed [`Decompressor`], and the segment
//! format records which [`CompressionMode`] produced a file. Swapping modes
//! is not backward-compatible, so readers refuse a mode byte they do not
//! recognize.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{Result, StrataError};

/// Compresses byte spans. One invocation produces one self-contained
/// compressed frame.
pub trait Compressor: Send {
    /// Compress `bytes` into a new buffer.
    fn compress(&mut self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Decompresses byte spans produced by the matching [`Compressor`].
pub trait Decompressor: Send {
    /// Decompress `bytes`, which must expand to exactly `expected_len`
    /// bytes.
    fn decompress(&mut self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

/// The compression implementations the segment format knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Store chunks uncompressed. Useful for tests and diagnostics.
    None,
    /// DEFLATE via flate2, tuned for speed over ratio.
    Deflate,
}

impl CompressionMode {
    /// The byte code recorded in file headers.
    pub fn code(&self) -> u8 {
        match self {
            CompressionMode::None => 0,
            CompressionMode::Deflate => 1,
        }
    }

    /// Resolve a header byte code back to a mode.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CompressionMode::None),
            1 => Ok(CompressionMode::Deflate),
            _ => Err(StrataError::format(format!(
                "unknown compression mode code: {code}"
            ))),
        }
    }

    /// Create a compressor for this mode.
    pub fn new_compressor(&self) -> Box<dyn Compressor> {
        match self {
            CompressionMode::None => Box::new(RawCompressor),
            CompressionMode::Deflate => Box::new(DeflateCompressor),
        }
    }

    /// Create a decompressor for this mode.
    pub fn new_decompressor(&self) -> Box<dyn Decompressor> {
        match self {
            CompressionMode::None => Box::new(RawDecompressor),
            CompressionMode::Deflate => Box::new(DeflateDecompressor),
        }
    }
}

struct RawCompressor;

impl Compressor for RawCompressor {
    fn compress(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

struct RawDecompressor;

impl Decompressor for RawDecompressor {
    fn decompress(&mut self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if bytes.len() != expected_len {
            return Err(StrataError::format(format!(
                "raw chunk length mismatch: stored {}, expected {}",
                bytes.len(),
                expected_len
            )));
        }
        Ok(bytes.to_vec())
    }
}

struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }
}

struct DeflateDecompressor;

impl Decompressor for DeflateDecompressor {
    fn decompress(&mut self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(bytes);
        let mut out = Vec::with_capacity(expected_len);
        decoder.read_to_end(&mut out)?;
        if out.len() != expected_len {
            return Err(StrataError::format(format!(
                "decompressed chunk length mismatch: got {}, expected {}",
                out.len(),
                expected_len
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, \
                     the quick brown fox jumps over the lazy dog";

        for mode in [CompressionMode::None, CompressionMode::Deflate] {
            let mut compressor = mode.new_compressor();
            let mut decompressor = mode.new_decompressor();

            let compressed = compressor.compress(data).unwrap();
            let restored = decompressor.decompress(&compressed, data.len()).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn test_deflate_shrinks_redundant_data() {
        let data = vec![b'a'; 4096];
        let mut compressor = CompressionMode::Deflate.new_compressor();
        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
    }

    #[test]
    fn test_empty_span() {
        for mode in [CompressionMode::None, CompressionMode::Deflate] {
            let mut compressor = mode.new_compressor();
            let mut decompressor = mode.new_decompressor();
            let compressed = compressor.compress(b"").unwrap();
            let restored = decompressor.decompress(&compressed, 0).unwrap();
            assert!(restored.is_empty());
        }
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let mut compressor = CompressionMode::Deflate.new_compressor();
        let mut decompressor = CompressionMode::Deflate.new_decompressor();
        let compressed = compressor.compress(b"abcdef").unwrap();
        assert!(decompressor.decompress(&compressed, 5).is_err());
    }

    #[test]
    fn test_mode_codes() {
        for mode in [CompressionMode::None, CompressionMode::Deflate] {
            assert_eq!(CompressionMode::from_code(mode.code()).unwrap(), mode);
        }
        assert!(CompressionMode::from_code(99).is_err());
    }
}

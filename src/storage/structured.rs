//! Structured file I/O for binary segment data.
//!
//! Every segment file is framed the same way: a magic/version/segment-id
//! header, file-specific content, and a trailing CRC32 of everything before
//! it. A file is only considered valid once that footer is present, which is
//! what makes partially-written outputs detectable after a crash.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, StrataError};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// Number of trailing bytes occupied by the checksum footer.
pub const FOOTER_LEN: u64 = 4;

/// A structured file writer for binary data.
///
/// Tracks the byte position of every write and folds all written bytes into
/// a running CRC32 which [`StructWriter::close`] appends as the footer.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write the standard file header: magic, format version, segment id.
    pub fn write_header(&mut self, magic: u32, version: u32, segment_id: &str) -> Result<()> {
        self.write_u32(magic)?;
        self.write_u32(version)?;
        self.write_string(segment_id)
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.hasher.update(&[value]);
        self.position += 1;
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a variable-length u32.
    pub fn write_vint(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; 5];
        let len = varint::encode_u32(value, &mut buf);
        self.write_raw(&buf[..len])
    }

    /// Write a variable-length u64.
    pub fn write_vlong(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; 10];
        let len = varint::encode_u64(value, &mut buf);
        self.write_raw(&buf[..len])
    }

    /// Write a string with a VInt length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        self.write_vint(bytes.len() as u32)?;
        self.write_raw(bytes)
    }

    /// Write raw bytes with a VInt length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_vint(value.len() as u32)?;
        self.write_raw(value)
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get the current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Write the checksum footer, flush and sync the file.
    ///
    /// After this returns the file is durable and complete.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read and validate the standard file header, returning the format
    /// version and the segment id recorded in the file.
    pub fn read_header(
        &mut self,
        expected_magic: u32,
        min_version: u32,
        max_version: u32,
    ) -> Result<(u32, String)> {
        let magic = self.read_u32()?;
        if magic != expected_magic {
            return Err(StrataError::format(format!(
                "bad magic: expected {expected_magic:#010x}, found {magic:#010x}"
            )));
        }
        let version = self.read_u32()?;
        if version < min_version || version > max_version {
            return Err(StrataError::format(format!(
                "unsupported format version {version} (supported {min_version}..={max_version})"
            )));
        }
        let segment_id = self.read_string()?;
        Ok((version, segment_id))
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.hasher.update(&[value]);
        self.position += 1;
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(value)
    }

    /// Read a variable-length u32.
    pub fn read_vint(&mut self) -> Result<u32> {
        let (value, raw) = varint::read_u32_raw(&mut self.reader)?;
        self.hasher.update(raw.bytes());
        self.position += raw.len() as u64;
        Ok(value)
    }

    /// Read a variable-length u64.
    pub fn read_vlong(&mut self) -> Result<u64> {
        let (value, raw) = varint::read_u64_raw(&mut self.reader)?;
        self.hasher.update(raw.bytes());
        self.position += raw.len() as u64;
        Ok(value)
    }

    /// Read a string with a VInt length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| StrataError::format(format!("invalid UTF-8: {e}")))
    }

    /// Read bytes with a VInt length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_vint()? as usize;
        self.read_raw(length)
    }

    /// Read an exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.hasher.update(&bytes);
        self.position += length as u64;
        Ok(bytes)
    }

    /// Get the current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the file size.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Check whether all content before the checksum footer has been read.
    pub fn is_eof(&self) -> bool {
        self.position >= self.file_size.saturating_sub(FOOTER_LEN)
    }

    /// Verify the checksum footer against everything read so far.
    ///
    /// Must be called with the reader positioned exactly at the footer,
    /// i.e. after sequentially reading the whole file content.
    pub fn verify_checksum(&mut self) -> Result<()> {
        if self.position + FOOTER_LEN != self.file_size {
            return Err(StrataError::format(format!(
                "checksum verification at position {} but footer starts at {}",
                self.position,
                self.file_size.saturating_sub(FOOTER_LEN)
            )));
        }
        let expected = self.hasher.clone().finalize();
        let stored = self.reader.read_u32::<LittleEndian>()?;
        self.position += FOOTER_LEN;
        if stored != expected {
            return Err(StrataError::format(format!(
                "checksum mismatch: stored {stored:#010x}, computed {expected:#010x}"
            )));
        }
        Ok(())
    }

    /// Close the reader.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }

    /// Give up structured reading and return the underlying input, e.g. to
    /// continue with random access after consuming a header.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Re-read an entire file sequentially and verify its checksum footer.
///
/// Used by integrity checks before bulk-copy merges and by the `check`
/// command.
pub fn verify_file_checksum(input: Box<dyn StorageInput>) -> Result<()> {
    let mut reader = StructReader::new(input)?;
    if reader.size() < FOOTER_LEN {
        return Err(StrataError::format("file too short for checksum footer"));
    }
    let content_len = reader.size() - FOOTER_LEN;
    let mut remaining = content_len;
    while remaining > 0 {
        let step = remaining.min(65536) as usize;
        reader.read_raw(step)?;
        remaining -= step as u64;
    }
    reader.verify_checksum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    const TEST_MAGIC: u32 = 0x5354_5254;

    #[test]
    fn test_struct_writer_reader_round_trip() {
        let storage = MemoryStorage::new_default();

        {
            let output = storage.create_output("test.bin").unwrap();
            let mut writer = StructWriter::new(output);

            writer.write_header(TEST_MAGIC, 1, "seg-id").unwrap();
            writer.write_u8(42).unwrap();
            writer.write_u32(5678).unwrap();
            writer.write_vint(12345).unwrap();
            writer.write_vlong(9_876_543_210).unwrap();
            writer.write_string("hello").unwrap();
            writer.write_bytes(b"binary data").unwrap();
            writer.close().unwrap();
        }

        {
            let input = storage.open_input("test.bin").unwrap();
            let mut reader = StructReader::new(input).unwrap();

            let (version, segment_id) = reader.read_header(TEST_MAGIC, 1, 1).unwrap();
            assert_eq!(version, 1);
            assert_eq!(segment_id, "seg-id");
            assert_eq!(reader.read_u8().unwrap(), 42);
            assert_eq!(reader.read_u32().unwrap(), 5678);
            assert_eq!(reader.read_vint().unwrap(), 12345);
            assert_eq!(reader.read_vlong().unwrap(), 9_876_543_210);
            assert_eq!(reader.read_string().unwrap(), "hello");
            assert_eq!(reader.read_bytes().unwrap(), b"binary data");
            assert!(reader.is_eof());
            reader.verify_checksum().unwrap();
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let storage = MemoryStorage::new_default();

        {
            let output = storage.create_output("bad.bin").unwrap();
            let mut writer = StructWriter::new(output);
            writer.write_header(0xDEAD_BEEF, 1, "seg").unwrap();
            writer.close().unwrap();
        }

        let input = storage.open_input("bad.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        let err = reader.read_header(TEST_MAGIC, 1, 1).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_corruption_detected_by_checksum() {
        let storage = MemoryStorage::new_default();

        {
            let output = storage.create_output("c.bin").unwrap();
            let mut writer = StructWriter::new(output);
            writer.write_header(TEST_MAGIC, 1, "seg").unwrap();
            writer.write_string("payload payload payload").unwrap();
            writer.close().unwrap();
        }

        // Corrupt one byte in the middle of the file.
        let mut input = storage.open_input("c.bin").unwrap();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut input, &mut bytes).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        {
            let mut output = storage.create_output("c.bin").unwrap();
            std::io::Write::write_all(&mut output, &bytes).unwrap();
            output.close().unwrap();
        }

        let input = storage.open_input("c.bin").unwrap();
        assert!(verify_file_checksum(input).is_err());
    }

    #[test]
    fn test_verify_file_checksum_ok() {
        let storage = MemoryStorage::new_default();

        {
            let output = storage.create_output("ok.bin").unwrap();
            let mut writer = StructWriter::new(output);
            writer.write_header(TEST_MAGIC, 1, "seg").unwrap();
            for i in 0..1000u32 {
                writer.write_vint(i).unwrap();
            }
            writer.close().unwrap();
        }

        verify_file_checksum(storage.open_input("ok.bin").unwrap()).unwrap();
    }
}

//! Per-field norm files.
//!
//! A norm is one opaque byte per document per indexed field, consumed by
//! scoring. This engine only stores and merges them; a document that lacks
//! the field gets a 0 byte so every norms file is exactly `max_doc` bytes
//! of payload.

use crate::error::{Result, StrataError};
use crate::segment::SegmentInfo;
use crate::storage::{Storage, StructReader, StructWriter};

const NORMS_MAGIC: u32 = 0x53_4E_52_4D; // "SNRM"
const NORMS_VERSION: u32 = 1;

/// Write one field's norm bytes.
pub fn write_norms(
    storage: &dyn Storage,
    info: &SegmentInfo,
    field_number: u32,
    norms: &[u8],
) -> Result<()> {
    let output = storage.create_output(&info.norms_file(field_number))?;
    let mut writer = StructWriter::new(output);
    writer.write_header(NORMS_MAGIC, NORMS_VERSION, &info.id)?;
    writer.write_bytes(norms)?;
    writer.close()
}

/// Read one field's norm bytes, validating the per-document count.
pub fn read_norms(
    storage: &dyn Storage,
    info: &SegmentInfo,
    field_number: u32,
    expected_docs: u32,
) -> Result<Vec<u8>> {
    let input = storage.open_input(&info.norms_file(field_number))?;
    let mut reader = StructReader::new(input)?;
    let (_, segment_id) = reader.read_header(NORMS_MAGIC, NORMS_VERSION, NORMS_VERSION)?;
    if segment_id != info.id {
        return Err(StrataError::format(format!(
            "norms file belongs to segment {segment_id}, expected {}",
            info.id
        )));
    }
    let norms = reader.read_bytes()?;
    reader.verify_checksum()?;
    if norms.len() != expected_docs as usize {
        return Err(StrataError::consistency(format!(
            "norms file for field {field_number} holds {} bytes, expected {expected_docs}",
            norms.len()
        )));
    }
    Ok(norms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_round_trip() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_n", 4);

        write_norms(&storage, &info, 2, &[1, 0, 255, 7]).unwrap();
        let norms = read_norms(&storage, &info, 2, 4).unwrap();
        assert_eq!(norms, vec![1, 0, 255, 7]);
    }

    #[test]
    fn test_doc_count_validated() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_n2", 4);

        write_norms(&storage, &info, 0, &[1, 2, 3]).unwrap();
        assert!(read_norms(&storage, &info, 0, 4).is_err());
    }
}

//! Per-field metadata for a segment.
//!
//! Field numbers are stable within one segment. When segments with
//! different numberings are merged, fields are joined by name and assigned
//! fresh numbers in first-appearance order, so the merge result is
//! deterministic for a fixed source order.

use ahash::AHashMap;

use crate::error::{Result, StrataError};
use crate::storage::{Storage, StructReader, StructWriter};

const FIELD_INFOS_MAGIC: u32 = 0x53_46_4C_44; // "SFLD"
const FIELD_INFOS_VERSION: u32 = 1;

const FLAG_INDEXED: u8 = 0x01;
const FLAG_STORED: u8 = 0x02;
const FLAG_NORMS: u8 = 0x04;
const FLAG_VECTORS: u8 = 0x08;

/// Metadata for a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// The field's number in this segment.
    pub number: u32,
    /// The field's name.
    pub name: String,
    /// Whether the field is indexed (has postings).
    pub indexed: bool,
    /// Whether the field has stored values.
    pub stored: bool,
    /// Whether the field carries norms.
    pub has_norms: bool,
    /// Whether the field carries term vectors.
    pub has_vectors: bool,
}

/// The ordered field table of a segment.
#[derive(Debug, Clone, Default)]
pub struct FieldInfos {
    infos: Vec<FieldInfo>,
    by_name: AHashMap<String, u32>,
}

impl FieldInfos {
    /// Create an empty field table.
    pub fn new() -> Self {
        FieldInfos::default()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// True if no fields are registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Iterate fields in number order.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldInfo> {
        self.infos.iter()
    }

    /// Look up a field by number.
    pub fn by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.infos.get(number as usize)
    }

    /// Look up a field by name.
    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name
            .get(name)
            .and_then(|&n| self.infos.get(n as usize))
    }

    /// Register a field, or merge flags into an existing one. Returns the
    /// field's number. New fields are numbered in first-appearance order.
    pub fn get_or_add(
        &mut self,
        name: &str,
        indexed: bool,
        stored: bool,
        has_norms: bool,
        has_vectors: bool,
    ) -> u32 {
        if let Some(&number) = self.by_name.get(name) {
            let info = &mut self.infos[number as usize];
            info.indexed |= indexed;
            info.stored |= stored;
            info.has_norms |= has_norms;
            info.has_vectors |= has_vectors;
            return number;
        }

        let number = self.infos.len() as u32;
        self.infos.push(FieldInfo {
            number,
            name: name.to_string(),
            indexed,
            stored,
            has_norms,
            has_vectors,
        });
        self.by_name.insert(name.to_string(), number);
        number
    }

    /// True if any field carries term vectors.
    pub fn has_vectors(&self) -> bool {
        self.infos.iter().any(|f| f.has_vectors)
    }

    /// Write the field table to `file_name`.
    pub fn write(&self, storage: &dyn Storage, file_name: &str, segment_id: &str) -> Result<()> {
        let output = storage.create_output(file_name)?;
        let mut writer = StructWriter::new(output);
        writer.write_header(FIELD_INFOS_MAGIC, FIELD_INFOS_VERSION, segment_id)?;
        writer.write_vint(self.infos.len() as u32)?;
        for info in &self.infos {
            writer.write_string(&info.name)?;
            writer.write_vint(info.number)?;
            let mut flags = 0u8;
            if info.indexed {
                flags |= FLAG_INDEXED;
            }
            if info.stored {
                flags |= FLAG_STORED;
            }
            if info.has_norms {
                flags |= FLAG_NORMS;
            }
            if info.has_vectors {
                flags |= FLAG_VECTORS;
            }
            writer.write_u8(flags)?;
        }
        writer.close()
    }

    /// Read a field table from `file_name`, checking the segment id.
    pub fn read(storage: &dyn Storage, file_name: &str, segment_id: &str) -> Result<Self> {
        let input = storage.open_input(file_name)?;
        let mut reader = StructReader::new(input)?;
        let (_, file_segment_id) =
            reader.read_header(FIELD_INFOS_MAGIC, FIELD_INFOS_VERSION, FIELD_INFOS_VERSION)?;
        if file_segment_id != segment_id {
            return Err(StrataError::format(format!(
                "field infos belong to segment {file_segment_id}, expected {segment_id}"
            )));
        }

        let count = reader.read_vint()? as usize;
        let mut infos = FieldInfos::new();
        for expected_number in 0..count {
            let name = reader.read_string()?;
            let number = reader.read_vint()?;
            if number as usize != expected_number {
                return Err(StrataError::format(format!(
                    "field numbers out of order: found {number}, expected {expected_number}"
                )));
            }
            let flags = reader.read_u8()?;
            let assigned = infos.get_or_add(
                &name,
                flags & FLAG_INDEXED != 0,
                flags & FLAG_STORED != 0,
                flags & FLAG_NORMS != 0,
                flags & FLAG_VECTORS != 0,
            );
            if assigned != number {
                return Err(StrataError::format(format!(
                    "duplicate field name '{name}' in field table"
                )));
            }
        }
        reader.verify_checksum()?;
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_insertion_order_numbering() {
        let mut infos = FieldInfos::new();
        assert_eq!(infos.get_or_add("title", true, true, true, false), 0);
        assert_eq!(infos.get_or_add("body", true, false, true, false), 1);
        assert_eq!(infos.get_or_add("id", false, true, false, false), 2);
        // Re-adding keeps the number and merges flags.
        assert_eq!(infos.get_or_add("title", false, false, false, true), 0);

        let title = infos.by_name("title").unwrap();
        assert!(title.indexed && title.stored && title.has_norms && title.has_vectors);
        assert!(infos.has_vectors());
    }

    #[test]
    fn test_round_trip() {
        let mut infos = FieldInfos::new();
        infos.get_or_add("alpha", true, true, true, false);
        infos.get_or_add("beta", false, true, false, false);
        infos.get_or_add("gamma", true, false, true, true);

        let storage = MemoryStorage::new_default();
        infos.write(&storage, "seg_0.fld", "id-123").unwrap();

        let restored = FieldInfos::read(&storage, "seg_0.fld", "id-123").unwrap();
        assert_eq!(restored.len(), 3);
        for (a, b) in infos.iter().zip(restored.iter()) {
            assert_eq!(a, b);
        }

        // Wrong segment id is rejected.
        assert!(FieldInfos::read(&storage, "seg_0.fld", "other-id").is_err());
    }
}

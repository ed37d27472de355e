//! Segment metadata.
//!
//! A segment is an immutable, named unit of documents. Its metadata lives
//! in a small JSON side file (`<name>.info`) which, together with the
//! live-docs side file, is the only thing that may change after sealing —
//! and then only by bumping the deletion generation.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use uuid::Uuid;

use crate::error::{Result, StrataError};
use crate::segment::FieldInfos;
use crate::storage::Storage;

/// Current on-disk format version, recorded in every segment file.
pub const FORMAT_VERSION: u32 = 1;

/// Metadata describing one segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment name, e.g. `seg_3`. Also the file-name stem.
    pub name: String,
    /// Unique id embedded in every file header of this segment.
    pub id: String,
    /// Total number of documents, including deleted ones.
    pub max_doc: u32,
    /// Deletion generation; 0 means no deletions file exists.
    pub del_gen: u64,
    /// Whether the segment's files live in a compound container.
    pub compound: bool,
    /// On-disk format version the segment was written with.
    pub format_version: u32,
}

impl SegmentInfo {
    /// Create metadata for a new segment with a fresh unique id.
    pub fn new(name: &str, max_doc: u32) -> Self {
        SegmentInfo {
            name: name.to_string(),
            id: Uuid::new_v4().to_string(),
            max_doc,
            del_gen: 0,
            compound: false,
            format_version: FORMAT_VERSION,
        }
    }

    /// Name of the metadata file.
    pub fn info_file(&self) -> String {
        format!("{}.info", self.name)
    }

    /// Name of the stored-fields data file.
    pub fn stored_data_file(&self) -> String {
        format!("{}.sfd", self.name)
    }

    /// Name of the stored-fields index file.
    pub fn stored_index_file(&self) -> String {
        format!("{}.sfx", self.name)
    }

    /// Name of the field-infos file.
    pub fn field_infos_file(&self) -> String {
        format!("{}.fld", self.name)
    }

    /// Name of the term dictionary file.
    pub fn term_dict_file(&self) -> String {
        format!("{}.trm", self.name)
    }

    /// Name of the postings (doc/freq) file.
    pub fn postings_file(&self) -> String {
        format!("{}.pst", self.name)
    }

    /// Name of the positions file.
    pub fn positions_file(&self) -> String {
        format!("{}.pos", self.name)
    }

    /// Name of the norms file for one field.
    pub fn norms_file(&self, field_number: u32) -> String {
        format!("{}.nrm{}", self.name, field_number)
    }

    /// Name of the live-docs file for a deletion generation.
    pub fn live_docs_file(&self, del_gen: u64) -> String {
        format!("{}_{}.del", self.name, del_gen)
    }

    /// Name of the compound container file.
    pub fn compound_file(&self) -> String {
        format!("{}.cpd", self.name)
    }

    /// True if a live-docs file exists for this segment.
    pub fn has_deletions(&self) -> bool {
        self.del_gen > 0
    }

    /// The data files owned by the segment's core (everything that goes
    /// into a compound container). The metadata and live-docs side files
    /// always stay standalone.
    pub fn core_files(&self, field_infos: &FieldInfos) -> Vec<String> {
        let mut files = vec![
            self.field_infos_file(),
            self.stored_data_file(),
            self.stored_index_file(),
            self.term_dict_file(),
            self.postings_file(),
            self.positions_file(),
        ];
        for info in field_infos.iter() {
            if info.indexed && info.has_norms {
                files.push(self.norms_file(info.number));
            }
        }
        files
    }

    /// Persist the metadata as JSON.
    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let mut output = storage.create_output(&self.info_file())?;
        output.write_all(&json)?;
        output.flush_and_sync()?;
        output.close()?;
        Ok(())
    }

    /// Load segment metadata by segment name.
    pub fn read(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut input = storage.open_input(&format!("{name}.info"))?;
        let mut json = Vec::new();
        input.read_to_end(&mut json)?;
        let info: SegmentInfo = serde_json::from_slice(&json)?;
        if info.name != name {
            return Err(StrataError::format(format!(
                "segment metadata for '{}' found under name '{name}'",
                info.name
            )));
        }
        if info.format_version > FORMAT_VERSION {
            return Err(StrataError::format(format!(
                "segment '{name}' has format version {} (newest supported is {FORMAT_VERSION})",
                info.format_version
            )));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_file_names() {
        let info = SegmentInfo::new("seg_7", 100);
        assert_eq!(info.stored_data_file(), "seg_7.sfd");
        assert_eq!(info.stored_index_file(), "seg_7.sfx");
        assert_eq!(info.norms_file(3), "seg_7.nrm3");
        assert_eq!(info.live_docs_file(2), "seg_7_2.del");
        assert_eq!(info.compound_file(), "seg_7.cpd");
    }

    #[test]
    fn test_json_round_trip() {
        let storage = MemoryStorage::new_default();
        let mut info = SegmentInfo::new("seg_1", 42);
        info.del_gen = 3;
        info.write(&storage).unwrap();

        let restored = SegmentInfo::read(&storage, "seg_1").unwrap();
        assert_eq!(restored, info);
        assert!(restored.has_deletions());
    }

    #[test]
    fn test_unique_ids() {
        let a = SegmentInfo::new("seg_1", 1);
        let b = SegmentInfo::new("seg_1", 1);
        assert_ne!(a.id, b.id);
    }
}

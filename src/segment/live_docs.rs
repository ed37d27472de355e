//! Live/deleted document tracking.
//!
//! Deletions never mutate a sealed segment's data files. They live in a
//! generation-numbered side file holding a bitmap of deleted documents; a
//! new generation is written on every save so a crash mid-write leaves the
//! previous generation intact.

use bit_vec::BitVec;

use crate::error::{Result, StrataError};
use crate::segment::SegmentInfo;
use crate::storage::{Storage, StructReader, StructWriter};

const LIVE_DOCS_MAGIC: u32 = 0x53_44_45_4C; // "SDEL"
const LIVE_DOCS_VERSION: u32 = 1;

/// A per-segment record of which documents are not deleted.
#[derive(Debug, Clone)]
pub struct LiveDocs {
    /// Bit set = deleted.
    deleted: BitVec,
    max_doc: u32,
    deleted_count: u32,
}

impl LiveDocs {
    /// Create a bitmap with all documents live.
    pub fn new(max_doc: u32) -> Self {
        LiveDocs {
            deleted: BitVec::from_elem(max_doc as usize, false),
            max_doc,
            deleted_count: 0,
        }
    }

    /// Total document count, including deleted ones.
    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// Check whether a document is live.
    pub fn is_live(&self, doc_id: u32) -> bool {
        doc_id < self.max_doc && !self.deleted.get(doc_id as usize).unwrap_or(true)
    }

    /// Mark a document deleted. Returns true if it was live before.
    pub fn delete(&mut self, doc_id: u32) -> Result<bool> {
        if doc_id >= self.max_doc {
            return Err(StrataError::consistency(format!(
                "document {doc_id} out of range (max_doc {})",
                self.max_doc
            )));
        }
        let was_deleted = self.deleted.get(doc_id as usize).unwrap_or(false);
        if !was_deleted {
            self.deleted.set(doc_id as usize, true);
            self.deleted_count += 1;
        }
        Ok(!was_deleted)
    }

    /// Number of live documents.
    pub fn live_count(&self) -> u32 {
        self.max_doc - self.deleted_count
    }

    /// Number of deleted documents.
    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    /// True if no document is deleted.
    pub fn is_all_live(&self) -> bool {
        self.deleted_count == 0
    }

    /// Write the bitmap as the next deletion generation of `info`,
    /// updating and persisting the metadata. The new generation file is
    /// durable before the metadata starts pointing at it.
    pub fn save(&self, storage: &dyn Storage, info: &mut SegmentInfo) -> Result<()> {
        let next_gen = info.del_gen + 1;
        let file_name = info.live_docs_file(next_gen);

        let output = storage.create_output(&file_name)?;
        let mut writer = StructWriter::new(output);
        writer.write_header(LIVE_DOCS_MAGIC, LIVE_DOCS_VERSION, &info.id)?;
        writer.write_vint(self.max_doc)?;
        writer.write_vint(self.deleted_count)?;
        writer.write_bytes(&self.deleted.to_bytes())?;
        writer.close()?;

        let old_gen = info.del_gen;
        info.del_gen = next_gen;
        info.write(storage)?;

        if old_gen > 0 {
            // The previous generation is unreferenced now; dropping it is
            // best-effort.
            if let Err(e) = storage.delete_file(&info.live_docs_file(old_gen)) {
                log::warn!("failed to delete old live-docs generation: {e}");
            }
        }
        Ok(())
    }

    /// Load the live-docs bitmap for `info`, or an all-live bitmap if the
    /// segment has no deletions.
    pub fn load(storage: &dyn Storage, info: &SegmentInfo) -> Result<Self> {
        if !info.has_deletions() {
            return Ok(LiveDocs::new(info.max_doc));
        }

        let input = storage.open_input(&info.live_docs_file(info.del_gen))?;
        let mut reader = StructReader::new(input)?;
        let (_, segment_id) =
            reader.read_header(LIVE_DOCS_MAGIC, LIVE_DOCS_VERSION, LIVE_DOCS_VERSION)?;
        if segment_id != info.id {
            return Err(StrataError::format(format!(
                "live-docs file belongs to segment {segment_id}, expected {}",
                info.id
            )));
        }

        let max_doc = reader.read_vint()?;
        if max_doc != info.max_doc {
            return Err(StrataError::consistency(format!(
                "live-docs bitmap covers {max_doc} docs but segment has {}",
                info.max_doc
            )));
        }
        let deleted_count = reader.read_vint()?;
        let bytes = reader.read_bytes()?;
        reader.verify_checksum()?;

        let mut deleted = BitVec::from_bytes(&bytes);
        deleted.truncate(max_doc as usize);

        let actual = deleted.iter().filter(|b| *b).count() as u32;
        if actual != deleted_count {
            return Err(StrataError::format(format!(
                "live-docs bitmap records {deleted_count} deletions but contains {actual}"
            )));
        }

        Ok(LiveDocs {
            deleted,
            max_doc,
            deleted_count,
        })
    }
}

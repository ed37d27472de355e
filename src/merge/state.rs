//! Per-source view used during a merge.
//!
//! Each source contributes its live documents at a base offset in the
//! merged ID space. The live-docs bitmap is snapshotted once when the
//! source enters the merge — the deletions side file may change
//! concurrently, the merge result must not.

use crate::segment::{LiveDocs, SegmentReader};

/// One source segment of a merge.
pub struct MergeSource {
    /// The source's reader.
    pub reader: SegmentReader,
    /// First merged document ID contributed by this source.
    pub doc_base: u32,
    /// Live docs as of the start of the merge.
    pub live_snapshot: LiveDocs,
    /// Field-number translation into the merged segment, indexed by the
    /// source's field number.
    pub field_map: Vec<u32>,
    /// Local remap skipping deleted docs; `u32::MAX` marks a deleted doc.
    /// `None` when the source has no deletions.
    doc_map: Option<Vec<u32>>,
}

impl MergeSource {
    /// Wrap a reader, snapshotting its live docs and building the
    /// deletion-aware document remap.
    pub fn new(reader: SegmentReader) -> Self {
        let live_snapshot = reader.live_docs().clone();
        let doc_map = if live_snapshot.is_all_live() {
            None
        } else {
            let mut map = Vec::with_capacity(live_snapshot.max_doc() as usize);
            let mut next = 0u32;
            for doc in 0..live_snapshot.max_doc() {
                if live_snapshot.is_live(doc) {
                    map.push(next);
                    next += 1;
                } else {
                    map.push(u32::MAX);
                }
            }
            Some(map)
        };

        MergeSource {
            reader,
            doc_base: 0,
            live_snapshot,
            field_map: Vec::new(),
            doc_map,
        }
    }

    /// Number of live documents this source contributes.
    pub fn live_count(&self) -> u32 {
        self.live_snapshot.live_count()
    }

    /// Remap a source-local document ID around deletions. Returns the
    /// source-local position among live documents, or `None` for a
    /// deleted document. Add [`MergeSource::doc_base`] to get the merged
    /// ID.
    pub fn remap(&self, doc: u32) -> Option<u32> {
        match &self.doc_map {
            None => Some(doc),
            Some(map) => match map[doc as usize] {
                u32::MAX => None,
                local => Some(local),
            },
        }
    }
}

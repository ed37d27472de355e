//! Read-side view of one sealed segment.
//!
//! Opens every sub-structure up front — field table, stored fields, term
//! dictionary, norms, live docs — and exposes the surface the merger (and
//! any search layer above) consumes. Compound segments are served through
//! the same code path via a read-only storage view over the container.

use std::sync::Arc;

use ahash::AHashMap;

use crate::compound::CompoundStorage;
use crate::document::FieldValue;
use crate::error::Result;
use crate::postings::{PostingsCursor, TermEntry, TermsCursor, TermsReader};
use crate::segment::norms::read_norms;
use crate::segment::{FieldInfos, LiveDocs, SegmentInfo};
use crate::storage::Storage;
use crate::stored::StoredFieldsReader;

/// A reader over one sealed segment.
pub struct SegmentReader {
    info: SegmentInfo,
    field_infos: FieldInfos,
    live_docs: LiveDocs,
    stored: StoredFieldsReader,
    terms: TermsReader,
    /// Field number to norm bytes, one byte per document.
    norms: AHashMap<u32, Vec<u8>>,
}

impl SegmentReader {
    /// Open the segment named `name` from `storage`.
    pub fn open(storage: Arc<dyn Storage>, name: &str) -> Result<Self> {
        let info = SegmentInfo::read(&*storage, name)?;

        // Metadata and live docs always live outside the container.
        let live_docs = LiveDocs::load(&*storage, &info)?;

        let core: Arc<dyn Storage> = if info.compound {
            Arc::new(CompoundStorage::open(Arc::clone(&storage), &info)?)
        } else {
            Arc::clone(&storage)
        };

        let field_infos = FieldInfos::read(&*core, &info.field_infos_file(), &info.id)?;
        let stored = StoredFieldsReader::open(&*core, &info)?;
        let terms = TermsReader::open(&*core, &info, &field_infos)?;

        let mut norms = AHashMap::new();
        for field in field_infos.iter() {
            if field.indexed && field.has_norms {
                norms.insert(
                    field.number,
                    read_norms(&*core, &info, field.number, info.max_doc)?,
                );
            }
        }

        Ok(SegmentReader {
            info,
            field_infos,
            live_docs,
            stored,
            terms,
            norms,
        })
    }

    /// The segment's metadata.
    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    /// Total document count, including deleted documents.
    pub fn max_doc(&self) -> u32 {
        self.info.max_doc
    }

    /// Number of live documents.
    pub fn num_docs(&self) -> u32 {
        self.live_docs.live_count()
    }

    /// The live-docs bitmap as currently loaded.
    pub fn live_docs(&self) -> &LiveDocs {
        &self.live_docs
    }

    /// The segment's field table.
    pub fn field_infos(&self) -> &FieldInfos {
        &self.field_infos
    }

    /// A cursor over all terms in (field, text) order.
    pub fn terms(&self) -> TermsCursor {
        self.terms.terms()
    }

    /// The underlying terms reader, for postings access.
    pub fn terms_reader(&self) -> &TermsReader {
        &self.terms
    }

    /// Open a postings cursor for a term entry.
    pub fn postings(&self, entry: &TermEntry) -> Result<PostingsCursor> {
        self.terms.postings(entry)
    }

    /// Decode a document's stored fields.
    pub fn document(&mut self, doc_id: u32) -> Result<Vec<(u32, FieldValue)>> {
        self.stored.document(doc_id)
    }

    /// The stored-fields reader.
    pub fn stored_fields(&self) -> &StoredFieldsReader {
        &self.stored
    }

    /// Mutable access to the stored-fields reader, used by the merge bulk
    /// path.
    pub fn stored_fields_mut(&mut self) -> &mut StoredFieldsReader {
        &mut self.stored
    }

    /// One field's norm bytes, or None if the field has no norms.
    pub fn norms(&self, field_name: &str) -> Option<&[u8]> {
        let field = self.field_infos.by_name(field_name)?;
        self.norms.get(&field.number).map(|v| v.as_slice())
    }

    /// Close the reader's open inputs.
    pub fn close(&mut self) -> Result<()> {
        self.stored.close()
    }
}

//! Builds a new segment from documents.
//!
//! Stored values stream straight into the stored-fields writer; indexed
//! terms accumulate in an in-memory inverted map that is spilled through
//! the postings writer when the segment is committed. The merge path
//! drives the same stored/postings writers, so a flushed segment and a
//! merged one share the exact same on-disk shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;

use crate::document::Document;
use crate::error::{Result, StrataError};
use crate::postings::{PostingsWriter, Term, DEFAULT_SKIP_INTERVAL};
use crate::segment::norms::write_norms;
use crate::segment::{FieldInfos, SegmentInfo};
use crate::stored::{StoredFieldsConfig, StoredFieldsWriter};
use crate::storage::Storage;
use crate::{compound, segment};

/// Configuration for building segments, shared by flush and merge.
#[derive(Debug, Clone)]
pub struct SegmentWriterConfig {
    /// Stored-fields chunking and compression.
    pub stored: StoredFieldsConfig,
    /// Documents-with-term between skip-table entries.
    pub skip_interval: u32,
    /// Roll the finished segment's core files into a compound container.
    pub compound: bool,
}

impl Default for SegmentWriterConfig {
    fn default() -> Self {
        SegmentWriterConfig {
            stored: StoredFieldsConfig::default(),
            skip_interval: DEFAULT_SKIP_INTERVAL,
            compound: false,
        }
    }
}

/// Per-term buffered postings.
#[derive(Debug, Default)]
struct TermPostings {
    /// (doc id, positions), in increasing doc order.
    docs: Vec<(u32, Vec<u32>)>,
}

/// Writes one new segment from added documents.
pub struct SegmentWriter {
    storage: Arc<dyn Storage>,
    info: SegmentInfo,
    config: SegmentWriterConfig,
    field_infos: FieldInfos,
    stored: StoredFieldsWriter,
    postings: BTreeMap<Term, TermPostings>,
    norms: AHashMap<u32, Vec<u8>>,
    doc_count: u32,
}

impl SegmentWriter {
    /// Start a new segment named `name`.
    pub fn new(storage: Arc<dyn Storage>, name: &str, config: SegmentWriterConfig) -> Result<Self> {
        let info = SegmentInfo::new(name, 0);
        let stored = StoredFieldsWriter::new(&*storage, &info, config.stored.clone())?;
        Ok(SegmentWriter {
            storage,
            info,
            config,
            field_infos: FieldInfos::new(),
            stored,
            postings: BTreeMap::new(),
            norms: AHashMap::new(),
            doc_count: 0,
        })
    }

    /// Number of documents added so far.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Add one document, returning its ID within the segment.
    pub fn add_document(&mut self, doc: &Document) -> Result<u32> {
        let doc_id = self.doc_count;

        // Validate stored values before touching any writer state, so a
        // rejected document leaves the segment unchanged.
        for field in &doc.fields {
            if let Some(value) = &field.stored {
                value.check_storable(&field.name)?;
            }
        }

        self.stored.start_document();
        // Position offsets continue across multiple occurrences of the
        // same field within one document.
        let mut field_positions: AHashMap<u32, u32> = AHashMap::new();

        for field in &doc.fields {
            let indexed = field.terms.is_some();
            let number = self.field_infos.get_or_add(
                &field.name,
                indexed,
                field.stored.is_some(),
                indexed,
                false,
            );

            if let Some(value) = &field.stored {
                self.stored.write_field(number, value)?;
            }

            if let Some(terms) = &field.terms {
                let base = field_positions.entry(number).or_insert(0);
                for (i, text) in terms.iter().enumerate() {
                    let position = *base + i as u32;
                    let term = Term::new(field.name.clone(), text.clone());
                    let postings = self.postings.entry(term).or_default();
                    match postings.docs.last_mut() {
                        Some((last_doc, positions)) if *last_doc == doc_id => {
                            positions.push(position);
                        }
                        _ => postings.docs.push((doc_id, vec![position])),
                    }
                }
                let count = terms.len() as u32;
                *base += count;

                let norms = self.norms.entry(number).or_default();
                if norms.len() == doc_id as usize + 1 {
                    // Same field again in this document.
                    let combined = (norms[doc_id as usize] as u32 + count).min(255);
                    norms[doc_id as usize] = combined as u8;
                } else {
                    norms.resize(doc_id as usize, 0);
                    norms.push(count.min(255) as u8);
                }
            }
        }

        self.stored.finish_document()?;
        self.doc_count += 1;
        Ok(doc_id)
    }

    /// Seal the segment: spill postings and norms, write the field table
    /// and metadata, optionally build the compound container. Returns the
    /// sealed segment's metadata. A failed commit deletes the in-progress
    /// segment's files best-effort; previously sealed segments are never
    /// touched.
    pub fn commit(self) -> Result<SegmentInfo> {
        let storage = Arc::clone(&self.storage);
        let name = self.info.name.clone();
        match self.commit_inner() {
            Ok(info) => Ok(info),
            Err(e) => {
                segment::delete_segment_files(&*storage, &name);
                Err(e)
            }
        }
    }

    fn commit_inner(mut self) -> Result<SegmentInfo> {
        self.info.max_doc = self.doc_count;
        self.info.compound = self.config.compound;

        self.stored.finish(self.doc_count)?;

        self.field_infos
            .write(&*self.storage, &self.info.field_infos_file(), &self.info.id)?;

        let mut postings_writer =
            PostingsWriter::new(&*self.storage, &self.info, self.config.skip_interval)?;
        let result = Self::write_postings(&self.postings, &self.field_infos, &mut postings_writer);
        match result {
            Ok(()) => postings_writer.finish()?,
            Err(e) => {
                postings_writer.abort(&*self.storage);
                return Err(e);
            }
        }

        for field in self.field_infos.iter() {
            if !(field.indexed && field.has_norms) {
                continue;
            }
            let mut bytes = self.norms.remove(&field.number).unwrap_or_default();
            bytes.resize(self.doc_count as usize, 0);
            write_norms(&*self.storage, &self.info, field.number, &bytes)?;
        }

        if self.config.compound {
            let files = self.info.core_files(&self.field_infos);
            compound::build_compound(&*self.storage, &self.info, &files)?;
        }

        self.info.write(&*self.storage)?;
        Ok(self.info)
    }

    fn write_postings(
        postings: &BTreeMap<Term, TermPostings>,
        field_infos: &FieldInfos,
        writer: &mut PostingsWriter,
    ) -> Result<()> {
        for (term, term_postings) in postings {
            let number = field_infos
                .by_name(&term.field)
                .map(|f| f.number)
                .ok_or_else(|| {
                    StrataError::consistency(format!("indexed field '{}' never registered", term.field))
                })?;
            writer.start_term(term, number)?;
            for (doc, positions) in &term_postings.docs {
                writer.write_posting(*doc, positions)?;
            }
            writer.finish_term()?;
        }
        Ok(())
    }

    /// Discard the in-progress segment, deleting everything written so
    /// far best-effort.
    pub fn abort(self) {
        let storage = Arc::clone(&self.storage);
        let name = self.info.name.clone();
        self.stored.abort(&*storage);
        segment::delete_segment_files(&*storage, &name);
    }
}

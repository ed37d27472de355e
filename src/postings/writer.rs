//! Writes the term dictionary, postings and positions of one segment.
//!
//! Both the flush path and the merge path funnel through this writer, so a
//! merged segment is byte-identical to one freshly flushed from the same
//! data. Terms must arrive in (field, text) order; documents within a term
//! must arrive with strictly increasing IDs.

use crate::error::{Result, StrataError};
use crate::postings::Term;
use crate::segment::SegmentInfo;
use crate::storage::{Storage, StorageOutput, StructWriter};
use crate::util::varint;

pub(crate) const TERM_DICT_MAGIC: u32 = 0x53_54_52_4D; // "STRM"
pub(crate) const POSTINGS_MAGIC: u32 = 0x53_50_53_54; // "SPST"
pub(crate) const POSITIONS_MAGIC: u32 = 0x53_50_4F_53; // "SPOS"
pub(crate) const POSTINGS_VERSION: u32 = 1;

struct TermState {
    term: Term,
    field_number: u32,
    freq_start: u64,
    prox_start: u64,
    doc_freq: u32,
    last_doc: u32,
    // Skip-table buffer; offsets reset at the start of each term.
    skip_buffer: Vec<u8>,
    last_skip_doc: u32,
    last_skip_freq_ptr: u64,
    last_skip_prox_ptr: u64,
}

/// Writes postings for one segment being built.
pub struct PostingsWriter {
    dict: StructWriter<Box<dyn StorageOutput>>,
    freq: StructWriter<Box<dyn StorageOutput>>,
    prox: StructWriter<Box<dyn StorageOutput>>,
    skip_interval: u32,

    dict_file: String,
    freq_file: String,
    prox_file: String,

    last_term: Option<Term>,
    last_dict_freq_ptr: u64,
    last_dict_prox_ptr: u64,
    current: Option<TermState>,
}

impl PostingsWriter {
    /// Create the dictionary, postings and positions outputs. On failure,
    /// partially-created files are deleted best-effort.
    pub fn new(storage: &dyn Storage, info: &SegmentInfo, skip_interval: u32) -> Result<Self> {
        match Self::open(storage, info, skip_interval) {
            Ok(writer) => Ok(writer),
            Err(e) => {
                for file in [
                    info.term_dict_file(),
                    info.postings_file(),
                    info.positions_file(),
                ] {
                    if let Err(cleanup) = storage.delete_file(&file) {
                        log::warn!("failed to clean up partial output {file}: {cleanup}");
                    }
                }
                Err(e)
            }
        }
    }

    fn open(storage: &dyn Storage, info: &SegmentInfo, skip_interval: u32) -> Result<Self> {
        if skip_interval < 2 {
            return Err(StrataError::other(format!(
                "skip interval must be at least 2, got {skip_interval}"
            )));
        }

        let dict_file = info.term_dict_file();
        let freq_file = info.postings_file();
        let prox_file = info.positions_file();

        let mut dict = StructWriter::new(storage.create_output(&dict_file)?);
        dict.write_header(TERM_DICT_MAGIC, POSTINGS_VERSION, &info.id)?;
        dict.write_vint(skip_interval)?;

        let mut freq = StructWriter::new(storage.create_output(&freq_file)?);
        freq.write_header(POSTINGS_MAGIC, POSTINGS_VERSION, &info.id)?;

        let mut prox = StructWriter::new(storage.create_output(&prox_file)?);
        prox.write_header(POSITIONS_MAGIC, POSTINGS_VERSION, &info.id)?;

        Ok(PostingsWriter {
            dict,
            freq,
            prox,
            skip_interval,
            dict_file,
            freq_file,
            prox_file,
            last_term: None,
            last_dict_freq_ptr: 0,
            last_dict_prox_ptr: 0,
            current: None,
        })
    }

    /// Begin a term. Terms must arrive in strictly increasing
    /// (field, text) order.
    pub fn start_term(&mut self, term: &Term, field_number: u32) -> Result<()> {
        if self.current.is_some() {
            return Err(StrataError::other(
                "start_term called while a term is still open",
            ));
        }
        if let Some(last) = &self.last_term {
            if term <= last {
                return Err(StrataError::consistency(format!(
                    "terms out of order: '{}:{}' after '{}:{}'",
                    term.field, term.text, last.field, last.text
                )));
            }
        }

        self.current = Some(TermState {
            term: term.clone(),
            field_number,
            freq_start: self.freq.position(),
            prox_start: self.prox.position(),
            doc_freq: 0,
            last_doc: 0,
            skip_buffer: Vec::new(),
            last_skip_doc: 0,
            last_skip_freq_ptr: self.freq.position(),
            last_skip_prox_ptr: self.prox.position(),
        });
        Ok(())
    }

    /// Add one document's posting for the current term. `positions` holds
    /// the term's occurrence positions in the document, in increasing
    /// order; its length is the term frequency.
    pub fn write_posting(&mut self, doc_id: u32, positions: &[u32]) -> Result<()> {
        let freq_position = self.freq.position();
        let prox_position = self.prox.position();

        let state = self
            .current
            .as_mut()
            .ok_or_else(|| StrataError::other("write_posting called outside a term"))?;

        if positions.is_empty() {
            return Err(StrataError::other(format!(
                "posting for doc {doc_id} has no positions"
            )));
        }
        if state.doc_freq > 0 && doc_id <= state.last_doc {
            return Err(StrataError::consistency(format!(
                "docs out of order: {doc_id} after {}",
                state.last_doc
            )));
        }

        state.doc_freq += 1;
        if state.doc_freq % self.skip_interval == 0 {
            // Record a skip point at the previous document, before this
            // entry's bytes.
            varint::write_u32(
                &mut state.skip_buffer,
                state.last_doc - state.last_skip_doc,
            )?;
            varint::write_u64(
                &mut state.skip_buffer,
                freq_position - state.last_skip_freq_ptr,
            )?;
            varint::write_u64(
                &mut state.skip_buffer,
                prox_position - state.last_skip_prox_ptr,
            )?;
            state.last_skip_doc = state.last_doc;
            state.last_skip_freq_ptr = freq_position;
            state.last_skip_prox_ptr = prox_position;
        }

        let doc_code = (doc_id - state.last_doc) << 1;
        state.last_doc = doc_id;

        let freq = positions.len() as u32;
        if freq == 1 {
            // Low bit flags freq == 1 so the common case costs one VInt.
            self.freq.write_vint(doc_code | 1)?;
        } else {
            self.freq.write_vint(doc_code)?;
            self.freq.write_vint(freq)?;
        }

        let mut last_position = 0u32;
        for &position in positions {
            if position < last_position {
                return Err(StrataError::consistency(format!(
                    "positions out of order: {position} after {last_position}"
                )));
            }
            self.prox.write_vint(position - last_position)?;
            last_position = position;
        }

        Ok(())
    }

    /// Seal the current term. A term that gathered no documents produces
    /// no dictionary entry.
    pub fn finish_term(&mut self) -> Result<()> {
        let state = self
            .current
            .take()
            .ok_or_else(|| StrataError::other("finish_term called outside a term"))?;

        if state.doc_freq == 0 {
            return Ok(());
        }

        // Skip data goes right after the term's postings.
        let skip_pointer = self.freq.position();
        self.freq.write_raw(&state.skip_buffer)?;

        // Dictionary entry: prefix-compressed text, then pointers as
        // deltas from the previous entry.
        let prefix_len = match &self.last_term {
            Some(last) if last.field == state.term.field => {
                common_prefix(last.text.as_bytes(), state.term.text.as_bytes())
            }
            _ => 0,
        };
        let suffix = &state.term.text.as_bytes()[prefix_len..];

        self.dict.write_vint(prefix_len as u32)?;
        self.dict.write_bytes(suffix)?;
        self.dict.write_vint(state.field_number)?;
        self.dict.write_vint(state.doc_freq)?;
        self.dict
            .write_vlong(state.freq_start - self.last_dict_freq_ptr)?;
        self.dict
            .write_vlong(state.prox_start - self.last_dict_prox_ptr)?;
        if state.doc_freq >= self.skip_interval {
            self.dict.write_vlong(skip_pointer - state.freq_start)?;
        }

        self.last_dict_freq_ptr = state.freq_start;
        self.last_dict_prox_ptr = state.prox_start;
        self.last_term = Some(state.term);
        Ok(())
    }

    /// Seal all three files with their integrity footers.
    pub fn finish(self) -> Result<()> {
        if self.current.is_some() {
            return Err(StrataError::other("finish called with an open term"));
        }
        self.dict.close()?;
        self.freq.close()?;
        self.prox.close()
    }

    /// Discard this writer, deleting its partially-written files
    /// best-effort.
    pub fn abort(self, storage: &dyn Storage) {
        let files = [
            self.dict_file.clone(),
            self.freq_file.clone(),
            self.prox_file.clone(),
        ];
        drop(self);
        for file in files {
            if let Err(e) = storage.delete_file(&file) {
                log::warn!("failed to delete discarded output {file}: {e}");
            }
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_terms_must_be_ordered() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_p", 10);
        let mut writer = PostingsWriter::new(&storage, &info, 16).unwrap();

        writer.start_term(&Term::new("body", "beta"), 0).unwrap();
        writer.write_posting(0, &[1]).unwrap();
        writer.finish_term().unwrap();

        let err = writer
            .start_term(&Term::new("body", "alpha"), 0)
            .unwrap_err();
        assert!(matches!(err, StrataError::Consistency(_)));
    }

    #[test]
    fn test_docs_must_increase() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_q", 10);
        let mut writer = PostingsWriter::new(&storage, &info, 16).unwrap();

        writer.start_term(&Term::new("body", "x"), 0).unwrap();
        writer.write_posting(4, &[0]).unwrap();
        let err = writer.write_posting(4, &[0]).unwrap_err();
        assert!(matches!(err, StrataError::Consistency(_)));
    }

    #[test]
    fn test_empty_term_writes_no_entry() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_e", 10);
        let mut writer = PostingsWriter::new(&storage, &info, 16).unwrap();

        writer.start_term(&Term::new("body", "ghost"), 0).unwrap();
        writer.finish_term().unwrap();
        writer.start_term(&Term::new("body", "real"), 0).unwrap();
        writer.write_posting(1, &[2, 5]).unwrap();
        writer.finish_term().unwrap();
        writer.finish().unwrap();

        let mut field_infos = crate::segment::FieldInfos::new();
        field_infos.get_or_add("body", true, false, true, false);
        let reader = crate::postings::TermsReader::open(&storage, &info, &field_infos).unwrap();
        let mut cursor = reader.terms();
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.term().text, "real");
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_abort_removes_outputs() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_a", 10);
        let writer = PostingsWriter::new(&storage, &info, 16).unwrap();
        writer.abort(&storage);
        assert!(!storage.file_exists("seg_a.trm"));
        assert!(!storage.file_exists("seg_a.pst"));
        assert!(!storage.file_exists("seg_a.pos"));
    }
}

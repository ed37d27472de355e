//! Reads the term dictionary and postings of a sealed segment.
//!
//! The dictionary is small relative to the postings, so it is decoded into
//! memory up front (verifying its checksum in the same pass). Postings and
//! positions stream from their files through cloned inputs, so any number
//! of cursors can be open at once.

use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::postings::writer::{POSITIONS_MAGIC, POSTINGS_MAGIC, POSTINGS_VERSION, TERM_DICT_MAGIC};
use crate::postings::Term;
use crate::segment::{FieldInfos, SegmentInfo};
use crate::storage::{Storage, StorageInput, StructReader};
use crate::util::varint;

/// One decoded term dictionary entry.
#[derive(Debug, Clone)]
pub struct TermEntry {
    /// The term.
    pub term: Term,
    /// The term's field number in this segment.
    pub field_number: u32,
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Absolute offset of the term's postings in the postings file.
    pub freq_pointer: u64,
    /// Absolute offset of the term's positions in the positions file.
    pub prox_pointer: u64,
    /// Absolute offset of the term's skip table, when one was written.
    pub skip_pointer: Option<u64>,
}

/// Reads the postings structures of one segment.
pub struct TermsReader {
    entries: Arc<Vec<TermEntry>>,
    skip_interval: u32,
    freq_input: Box<dyn StorageInput>,
    prox_input: Box<dyn StorageInput>,
}

impl std::fmt::Debug for TermsReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermsReader")
            .field("entries", &self.entries)
            .field("skip_interval", &self.skip_interval)
            .finish_non_exhaustive()
    }
}

impl TermsReader {
    /// Open and decode the term dictionary of `info`, validating all three
    /// file headers and the dictionary checksum. Field numbers are
    /// resolved to names through `field_infos`.
    pub fn open(
        storage: &dyn Storage,
        info: &SegmentInfo,
        field_infos: &FieldInfos,
    ) -> Result<Self> {
        let input = storage.open_input(&info.term_dict_file())?;
        let mut dict = StructReader::new(input)?;
        let (_, segment_id) =
            dict.read_header(TERM_DICT_MAGIC, POSTINGS_VERSION, POSTINGS_VERSION)?;
        if segment_id != info.id {
            return Err(StrataError::format(format!(
                "term dictionary belongs to segment {segment_id}, expected {}",
                info.id
            )));
        }
        let skip_interval = dict.read_vint()?;

        let mut entries = Vec::new();
        let mut previous_text: Vec<u8> = Vec::new();
        let mut previous_field: Option<u32> = None;
        let mut freq_pointer = 0u64;
        let mut prox_pointer = 0u64;
        while !dict.is_eof() {
            let prefix_len = dict.read_vint()? as usize;
            let suffix = dict.read_bytes()?;
            let field_number = dict.read_vint()?;
            let doc_freq = dict.read_vint()?;
            freq_pointer += dict.read_vlong()?;
            prox_pointer += dict.read_vlong()?;
            let skip_pointer = if doc_freq >= skip_interval {
                Some(freq_pointer + dict.read_vlong()?)
            } else {
                None
            };

            if previous_field != Some(field_number) {
                // Prefix compression never crosses a field boundary.
                if prefix_len != 0 {
                    return Err(StrataError::format(
                        "term prefix crosses a field boundary in the dictionary",
                    ));
                }
                previous_field = Some(field_number);
            }
            if prefix_len > previous_text.len() {
                return Err(StrataError::format(format!(
                    "term prefix length {prefix_len} exceeds previous term length {}",
                    previous_text.len()
                )));
            }
            let mut text = previous_text[..prefix_len].to_vec();
            text.extend_from_slice(&suffix);
            previous_text = text.clone();

            let field = field_infos
                .by_number(field_number)
                .map(|f| f.name.clone())
                .ok_or_else(|| {
                    StrataError::format(format!(
                        "term dictionary references unknown field number {field_number}"
                    ))
                })?;
            entries.push(TermEntry {
                term: Term {
                    field,
                    text: String::from_utf8(text).map_err(|e| {
                        StrataError::format(format!("term text is not UTF-8: {e}"))
                    })?,
                },
                field_number,
                doc_freq,
                freq_pointer,
                prox_pointer,
                skip_pointer,
            });
        }
        dict.verify_checksum()?;

        let freq_input = open_checked(storage, &info.postings_file(), POSTINGS_MAGIC, &info.id)?;
        let prox_input = open_checked(storage, &info.positions_file(), POSITIONS_MAGIC, &info.id)?;

        Ok(TermsReader {
            entries: Arc::new(entries),
            skip_interval,
            freq_input,
            prox_input,
        })
    }

    /// Number of terms in the dictionary.
    pub fn term_count(&self) -> usize {
        self.entries.len()
    }

    /// The configured skip interval.
    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    /// A cursor over all terms in (field, text) order.
    pub fn terms(&self) -> TermsCursor {
        TermsCursor {
            entries: Arc::clone(&self.entries),
            next_index: 0,
            current: None,
        }
    }

    /// Look up a term's dictionary entry.
    pub fn term_entry(&self, term: &Term) -> Option<&TermEntry> {
        self.entries
            .binary_search_by(|e| e.term.cmp(term))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Open a postings cursor for a dictionary entry.
    pub fn postings(&self, entry: &TermEntry) -> Result<PostingsCursor> {
        let mut freq = self.freq_input.clone_input()?;
        freq.seek(SeekFrom::Start(entry.freq_pointer))?;
        let mut prox = self.prox_input.clone_input()?;
        prox.seek(SeekFrom::Start(entry.prox_pointer))?;

        // Decode the skip table up front; it is at most df / interval
        // entries.
        let mut skip_points = Vec::new();
        if let Some(skip_pointer) = entry.skip_pointer {
            let mut skip_input = self.freq_input.clone_input()?;
            skip_input.seek(SeekFrom::Start(skip_pointer))?;
            let num_skips = (entry.doc_freq / self.skip_interval) as usize;
            let mut doc = 0u32;
            let mut freq_ptr = entry.freq_pointer;
            let mut prox_ptr = entry.prox_pointer;
            for _ in 0..num_skips {
                doc += varint::read_u32(&mut skip_input)?;
                freq_ptr += varint::read_u64(&mut skip_input)?;
                prox_ptr += varint::read_u64(&mut skip_input)?;
                skip_points.push(SkipPoint {
                    doc,
                    freq_ptr,
                    prox_ptr,
                });
            }
        }

        Ok(PostingsCursor {
            freq,
            prox,
            doc_freq: entry.doc_freq,
            skip_interval: self.skip_interval,
            skip_points,
            consumed: 0,
            doc: 0,
            term_freq: 0,
            positions_pending: 0,
            last_position: 0,
        })
    }
}

fn open_checked(
    storage: &dyn Storage,
    file_name: &str,
    magic: u32,
    segment_id: &str,
) -> Result<Box<dyn StorageInput>> {
    let input = storage.open_input(file_name)?;
    let mut reader = StructReader::new(input)?;
    let (_, file_segment_id) = reader.read_header(magic, POSTINGS_VERSION, POSTINGS_VERSION)?;
    if file_segment_id != segment_id {
        return Err(StrataError::format(format!(
            "file {file_name} belongs to segment {file_segment_id}, expected {segment_id}"
        )));
    }
    Ok(reader.into_inner())
}

/// A cursor over the terms of a segment, in (field, text) order.
pub struct TermsCursor {
    entries: Arc<Vec<TermEntry>>,
    next_index: usize,
    current: Option<usize>,
}

impl TermsCursor {
    /// Advance to the next term. Returns false once exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if self.next_index < self.entries.len() {
            self.current = Some(self.next_index);
            self.next_index += 1;
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }

    /// The current term. Panics if `next` has not returned true.
    pub fn term(&self) -> &Term {
        &self.entries[self.current.expect("cursor is not positioned")].term
    }

    /// The current term's dictionary entry.
    pub fn entry(&self) -> &TermEntry {
        &self.entries[self.current.expect("cursor is not positioned")]
    }

    /// The current term's document frequency.
    pub fn doc_freq(&self) -> u32 {
        self.entry().doc_freq
    }
}

#[derive(Debug, Clone, Copy)]
struct SkipPoint {
    /// Last document before the skip point.
    doc: u32,
    freq_ptr: u64,
    prox_ptr: u64,
}

/// A cursor over one term's postings: documents, frequencies and
/// positions.
pub struct PostingsCursor {
    freq: Box<dyn StorageInput>,
    prox: Box<dyn StorageInput>,
    doc_freq: u32,
    skip_interval: u32,
    skip_points: Vec<SkipPoint>,
    consumed: u32,
    doc: u32,
    term_freq: u32,
    positions_pending: u32,
    last_position: u32,
}

impl PostingsCursor {
    /// Advance to the next document. Returns false once exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if self.consumed == self.doc_freq {
            return Ok(false);
        }

        // Keep the positions stream in step even when the caller did not
        // drain it.
        for _ in 0..self.positions_pending {
            varint::read_u32(&mut self.prox)?;
        }

        let doc_code = varint::read_u32(&mut self.freq)?;
        self.doc += doc_code >> 1;
        self.term_freq = if doc_code & 1 != 0 {
            1
        } else {
            varint::read_u32(&mut self.freq)?
        };
        self.consumed += 1;
        self.positions_pending = self.term_freq;
        self.last_position = 0;
        Ok(true)
    }

    /// Skip forward to the first document at or past `target`, using the
    /// term's skip table when it can jump over whole intervals. Returns
    /// false if no such document exists.
    pub fn skip_to(&mut self, target: u32) -> Result<bool> {
        // Last skip point strictly before the target that is ahead of our
        // position. A skip point is recorded just before the entry that
        // completes an interval, so following point `i` means
        // `(i + 1) * interval - 1` entries are behind us.
        let mut jump: Option<(usize, SkipPoint)> = None;
        for (i, point) in self.skip_points.iter().enumerate() {
            let point_consumed = (i as u32 + 1) * self.skip_interval - 1;
            if point.doc < target && point_consumed > self.consumed {
                jump = Some((i, *point));
            }
        }
        if let Some((i, point)) = jump {
            self.freq.seek(SeekFrom::Start(point.freq_ptr))?;
            self.prox.seek(SeekFrom::Start(point.prox_ptr))?;
            self.consumed = (i as u32 + 1) * self.skip_interval - 1;
            self.doc = point.doc;
            self.positions_pending = 0;
            self.term_freq = 0;
        }

        loop {
            if !self.next()? {
                return Ok(false);
            }
            if self.doc >= target {
                return Ok(true);
            }
        }
    }

    /// The current document ID.
    pub fn doc(&self) -> u32 {
        self.doc
    }

    /// The term frequency in the current document.
    pub fn freq(&self) -> u32 {
        self.term_freq
    }

    /// Read the next position of the term in the current document.
    pub fn next_position(&mut self) -> Result<u32> {
        if self.positions_pending == 0 {
            return Err(StrataError::other(
                "next_position called with no positions left",
            ));
        }
        self.last_position += varint::read_u32(&mut self.prox)?;
        self.positions_pending -= 1;
        Ok(self.last_position)
    }
}

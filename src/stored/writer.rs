//! Stored-fields writer: buffers per-document field payloads and flushes
//! them as compressed chunks.
//!
//! Documents are appended one at a time. Encoded field payloads accumulate
//! in an in-memory buffer; once the buffer reaches the configured byte
//! size or document count, the run is flushed as one chunk: an index
//! entry, a header carrying the packed per-document field counts and byte
//! lengths, and the compressed payload. A buffer that grew to twice the
//! nominal chunk size is compressed in chunk-sized slices so a single
//! compressor invocation stays bounded; the chunk header flags this so the
//! reader re-invokes the decompressor per slice.

use crate::document::FieldValue;
use crate::error::{Result, StrataError};
use crate::merge::CheckAbort;
use crate::segment::{LiveDocs, SegmentInfo, FORMAT_VERSION};
use crate::stored::index::StoredFieldsIndexWriter;
use crate::stored::reader::StoredFieldsReader;
use crate::stored::{
    STORED_DATA_MAGIC, STORED_DATA_VERSION, TYPE_BITS, TYPE_BYTE_ARR, TYPE_DOUBLE, TYPE_FLOAT,
    TYPE_INT, TYPE_LONG, TYPE_STRING,
};
use crate::storage::{Storage, StorageOutput, StructWriter};
use crate::util::compression::{CompressionMode, Compressor};
use crate::util::{packed, varint};

/// Configuration for the stored-fields writer.
#[derive(Debug, Clone)]
pub struct StoredFieldsConfig {
    /// Nominal chunk size in bytes; a flush triggers once the buffer
    /// reaches it.
    pub chunk_size: usize,
    /// Maximum number of documents per chunk.
    pub max_docs_per_chunk: u32,
    /// Compression applied to chunk payloads.
    pub compression: CompressionMode,
}

impl Default for StoredFieldsConfig {
    fn default() -> Self {
        StoredFieldsConfig {
            chunk_size: 1 << 14,
            max_docs_per_chunk: 128,
            compression: CompressionMode::Deflate,
        }
    }
}

/// One merge source for [`StoredFieldsWriter::merge`]: a source segment's
/// stored-fields reader, its live-docs snapshot, and the map from its
/// field numbers to the merged segment's numbers.
pub struct StoredFieldsMergeSource<'a> {
    /// Reader over the source segment's stored fields.
    pub reader: &'a mut StoredFieldsReader,
    /// Live-docs snapshot taken at the start of the merge.
    pub live_docs: &'a LiveDocs,
    /// `field_map[source_number] == merged_number`.
    pub field_map: Vec<u32>,
}

impl StoredFieldsMergeSource<'_> {
    fn field_numbers_match(&self) -> bool {
        self.field_map.iter().enumerate().all(|(i, &m)| i as u32 == m)
    }
}

/// Writes the stored fields of one segment.
pub struct StoredFieldsWriter {
    data: StructWriter<Box<dyn StorageOutput>>,
    index: StoredFieldsIndexWriter,
    compressor: Box<dyn Compressor>,
    compression: CompressionMode,
    chunk_size: usize,
    max_docs_per_chunk: u32,

    data_file: String,
    index_file: String,

    buffered_docs: Vec<u8>,
    num_stored_fields: Vec<u32>,
    end_offsets: Vec<u32>,
    num_fields_in_doc: u32,
    doc_base: u32,
    num_buffered_docs: u32,
}

impl StoredFieldsWriter {
    /// Create the data and index outputs for a new segment. On failure,
    /// partially-created files are deleted best-effort before the error is
    /// returned.
    pub fn new(
        storage: &dyn Storage,
        info: &SegmentInfo,
        config: StoredFieldsConfig,
    ) -> Result<Self> {
        match Self::open(storage, info, &config) {
            Ok(writer) => Ok(writer),
            Err(e) => {
                for file in [info.stored_data_file(), info.stored_index_file()] {
                    if let Err(cleanup) = storage.delete_file(&file) {
                        log::warn!("failed to clean up partial output {file}: {cleanup}");
                    }
                }
                Err(e)
            }
        }
    }

    fn open(
        storage: &dyn Storage,
        info: &SegmentInfo,
        config: &StoredFieldsConfig,
    ) -> Result<Self> {
        let index_file = info.stored_index_file();
        let data_file = info.stored_data_file();

        let index = StoredFieldsIndexWriter::new(storage, &index_file, &info.id)?;

        let output = storage.create_output(&data_file)?;
        let mut data = StructWriter::new(output);
        data.write_header(STORED_DATA_MAGIC, STORED_DATA_VERSION, &info.id)?;
        data.write_vint(config.chunk_size as u32)?;
        data.write_vint(packed::PACKED_FORMAT_VERSION)?;
        data.write_u8(config.compression.code())?;

        Ok(StoredFieldsWriter {
            data,
            index,
            compressor: config.compression.new_compressor(),
            compression: config.compression,
            chunk_size: config.chunk_size,
            max_docs_per_chunk: config.max_docs_per_chunk,
            data_file,
            index_file,
            buffered_docs: Vec::with_capacity(config.chunk_size),
            num_stored_fields: Vec::new(),
            end_offsets: Vec::new(),
            num_fields_in_doc: 0,
            doc_base: 0,
            num_buffered_docs: 0,
        })
    }

    /// Begin a new document. All real work happens in
    /// [`StoredFieldsWriter::write_field`].
    pub fn start_document(&mut self) {}

    /// Append one field of the current document to the buffer.
    pub fn write_field(&mut self, field_number: u32, value: &FieldValue) -> Result<()> {
        let type_tag = match value {
            FieldValue::Text(_) => TYPE_STRING,
            FieldValue::Binary(_) => TYPE_BYTE_ARR,
            FieldValue::Int(_) => TYPE_INT,
            FieldValue::Float(_) => TYPE_FLOAT,
            FieldValue::Long(_) => TYPE_LONG,
            FieldValue::Double(_) => TYPE_DOUBLE,
            FieldValue::Null => {
                return Err(StrataError::invalid_field_value(format!(
                    "field {field_number} has no binary, string or numeric value"
                )));
            }
        };

        self.num_fields_in_doc += 1;

        let token = (field_number as u64) << TYPE_BITS | type_tag;
        varint::write_u64(&mut self.buffered_docs, token)?;

        match value {
            FieldValue::Text(s) => {
                varint::write_u32(&mut self.buffered_docs, s.len() as u32)?;
                self.buffered_docs.extend_from_slice(s.as_bytes());
            }
            FieldValue::Binary(b) => {
                varint::write_u32(&mut self.buffered_docs, b.len() as u32)?;
                self.buffered_docs.extend_from_slice(b);
            }
            FieldValue::Int(i) => {
                varint::write_zint(&mut self.buffered_docs, *i)?;
            }
            FieldValue::Float(f) => {
                varint::write_zfloat(&mut self.buffered_docs, *f)?;
            }
            FieldValue::Long(l) => {
                varint::write_tlong(&mut self.buffered_docs, *l)?;
            }
            FieldValue::Double(d) => {
                varint::write_zdouble(&mut self.buffered_docs, *d)?;
            }
            FieldValue::Null => unreachable!(),
        }

        Ok(())
    }

    /// Seal the current document and flush the chunk if a threshold was
    /// reached.
    pub fn finish_document(&mut self) -> Result<()> {
        self.num_stored_fields.push(self.num_fields_in_doc);
        self.num_fields_in_doc = 0;
        self.end_offsets.push(self.buffered_docs.len() as u32);
        self.num_buffered_docs += 1;
        if self.trigger_flush() {
            self.flush()?;
        }
        Ok(())
    }

    fn trigger_flush(&self) -> bool {
        self.buffered_docs.len() >= self.chunk_size
            || self.num_buffered_docs >= self.max_docs_per_chunk
    }

    fn flush(&mut self) -> Result<()> {
        self.index
            .write_entry(self.num_buffered_docs, self.data.position())?;

        // Transform end offsets into lengths.
        let mut lengths = self.end_offsets.clone();
        for i in (1..lengths.len()).rev() {
            lengths[i] -= self.end_offsets[i - 1];
        }

        let sliced = self.buffered_docs.len() >= 2 * self.chunk_size;

        self.data.write_vint(self.doc_base)?;
        self.data
            .write_vint(self.num_buffered_docs << 1 | sliced as u32)?;
        packed::write_packed(&mut self.data, &self.num_stored_fields)?;
        packed::write_packed(&mut self.data, &lengths)?;

        if sliced {
            // Big chunk: bound each compressor invocation to chunk_size.
            for slice in self.buffered_docs.chunks(self.chunk_size) {
                let compressed = self.compressor.compress(slice)?;
                self.data.write_vint(compressed.len() as u32)?;
                self.data.write_raw(&compressed)?;
            }
        } else {
            let compressed = self.compressor.compress(&self.buffered_docs)?;
            self.data.write_vint(compressed.len() as u32)?;
            self.data.write_raw(&compressed)?;
        }

        self.doc_base += self.num_buffered_docs;
        self.num_buffered_docs = 0;
        self.buffered_docs.clear();
        self.num_stored_fields.clear();
        self.end_offsets.clear();

        Ok(())
    }

    /// Documents written so far, buffered or flushed.
    pub fn doc_count(&self) -> u32 {
        self.doc_base + self.num_buffered_docs
    }

    /// Flush any remaining documents, verify the caller-declared total and
    /// seal both files with their integrity footers.
    pub fn finish(mut self, total_docs: u32) -> Result<()> {
        if self.num_buffered_docs > 0 {
            self.flush()?;
        }
        if self.doc_base != total_docs {
            return Err(StrataError::consistency(format!(
                "wrote {} docs but finish called with total_docs={total_docs}",
                self.doc_base
            )));
        }
        self.index.finish(total_docs, self.data.position())?;
        self.data.close()
    }

    /// Discard this writer, deleting its partially-written files
    /// best-effort.
    pub fn abort(self, storage: &dyn Storage) {
        let data_file = self.data_file.clone();
        let index_file = self.index_file.clone();
        drop(self);
        for file in [data_file, index_file] {
            if let Err(e) = storage.delete_file(&file) {
                log::warn!("failed to delete discarded output {file}: {e}");
            }
        }
    }

    /// Copy all live documents of `sources` into this writer, in source
    /// order, skipping deleted documents entirely.
    ///
    /// When a source was written by this exact format version with the
    /// same compression and an identity field mapping, its documents are
    /// bulk-copied as already-serialized spans, skipping field-by-field
    /// re-encoding; otherwise each document is decoded and re-written
    /// field by field with numbers translated through the source's map.
    /// Reports one work unit batch per document to `check_abort`.
    ///
    /// Returns the number of documents copied. The caller still calls
    /// [`StoredFieldsWriter::finish`] with the final total.
    pub fn merge(
        &mut self,
        sources: &mut [StoredFieldsMergeSource<'_>],
        check_abort: &mut dyn CheckAbort,
    ) -> Result<u32> {
        let mut doc_count = 0u32;

        for source in sources.iter_mut() {
            let max_doc = source.reader.max_doc();
            let bulk = source.reader.format_version() == FORMAT_VERSION
                && source.reader.compression_mode() == self.compression
                && source.field_numbers_match();

            // Catch corruption before propagating bytes into the new
            // segment.
            source.reader.check_integrity()?;

            if bulk {
                for doc_id in 0..max_doc {
                    if !source.live_docs.is_live(doc_id) {
                        continue;
                    }
                    let serialized = source.reader.serialized_document(doc_id)?;
                    self.start_document();
                    self.buffered_docs.extend_from_slice(&serialized.bytes);
                    self.num_fields_in_doc = serialized.num_fields;
                    self.finish_document()?;
                    doc_count += 1;
                    check_abort.work(300)?;
                }
            } else {
                for doc_id in 0..max_doc {
                    if !source.live_docs.is_live(doc_id) {
                        continue;
                    }
                    let fields = source.reader.document(doc_id)?;
                    self.start_document();
                    for (source_number, value) in &fields {
                        let mapped = *source.field_map.get(*source_number as usize).ok_or_else(
                            || {
                                StrataError::consistency(format!(
                                    "source field number {source_number} has no mapping"
                                ))
                            },
                        )?;
                        self.write_field(mapped, value)?;
                    }
                    self.finish_document()?;
                    doc_count += 1;
                    check_abort.work(300)?;
                }
            }
        }

        Ok(doc_count)
    }
}

//! Random-access reader for stored fields.
//!
//! Locates the chunk containing a target document through the side index,
//! decompresses only that chunk (slice by slice when the chunk was written
//! sliced) and replays the document's field payloads. The decompressed
//! chunk is cached so scanning documents in order touches each chunk once
//! — the access pattern of both the merge bulk path and the naive path.

use std::io::{Read, Seek, SeekFrom};

use crate::document::FieldValue;
use crate::error::{Result, StrataError};
use crate::segment::SegmentInfo;
use crate::stored::index::StoredFieldsIndex;
use crate::stored::{
    STORED_DATA_MAGIC, STORED_DATA_VERSION, TYPE_BITS, TYPE_BYTE_ARR, TYPE_DOUBLE, TYPE_FLOAT,
    TYPE_INT, TYPE_LONG, TYPE_MASK, TYPE_STRING,
};
use crate::storage::{verify_file_checksum, Storage, StorageInput, StructReader};
use crate::util::compression::{CompressionMode, Decompressor};
use crate::util::{packed, varint};

/// A document's still-serialized field payload, for bulk merge copies.
pub struct SerializedDocument {
    /// The encoded field tokens and values, exactly as buffered by the
    /// writer.
    pub bytes: Vec<u8>,
    /// Number of stored fields in the payload.
    pub num_fields: u32,
}

/// One decompressed chunk.
struct LoadedChunk {
    doc_base: u32,
    doc_count: u32,
    /// Cumulative end offsets; `offsets[0] == 0`, length `doc_count + 1`.
    offsets: Vec<u32>,
    num_fields: Vec<u32>,
    bytes: Vec<u8>,
}

/// Reads the stored fields of a sealed segment.
pub struct StoredFieldsReader {
    data: Box<dyn StorageInput>,
    index: StoredFieldsIndex,
    decompressor: Box<dyn Decompressor>,
    compression: CompressionMode,
    format_version: u32,
    chunk_size: usize,
    chunk: Option<LoadedChunk>,
}

impl StoredFieldsReader {
    /// Open the stored-fields files of `info` from `storage`.
    pub fn open(storage: &dyn Storage, info: &SegmentInfo) -> Result<Self> {
        let index = StoredFieldsIndex::load(storage, &info.stored_index_file(), &info.id)?;

        let input = storage.open_input(&info.stored_data_file())?;
        let mut header = StructReader::new(input)?;
        let (_, segment_id) =
            header.read_header(STORED_DATA_MAGIC, STORED_DATA_VERSION, STORED_DATA_VERSION)?;
        if segment_id != info.id {
            return Err(StrataError::format(format!(
                "stored-fields data belongs to segment {segment_id}, expected {}",
                info.id
            )));
        }
        let chunk_size = header.read_vint()? as usize;
        let packed_version = header.read_vint()?;
        if packed_version != packed::PACKED_FORMAT_VERSION {
            return Err(StrataError::format(format!(
                "unsupported packed encoding version {packed_version}"
            )));
        }
        let compression = CompressionMode::from_code(header.read_u8()?)?;
        let data = header.into_inner();

        Ok(StoredFieldsReader {
            data,
            index,
            decompressor: compression.new_decompressor(),
            compression,
            format_version: info.format_version,
            chunk_size,
            chunk: None,
        })
    }

    /// Total number of documents (including deleted ones).
    pub fn max_doc(&self) -> u32 {
        self.index.total_docs()
    }

    /// The loaded chunk index.
    pub fn index(&self) -> &StoredFieldsIndex {
        &self.index
    }

    /// Nominal chunk size the data file was written with.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Segment format version this reader was opened from.
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Compression mode the data file was written with.
    pub fn compression_mode(&self) -> CompressionMode {
        self.compression
    }

    /// Verify the data file's checksum footer by re-reading it in full.
    /// The index file's footer was already verified at open time.
    pub fn check_integrity(&self) -> Result<()> {
        verify_file_checksum(self.data.clone_input()?)
    }

    fn chunk_is_loaded(&self, doc_id: u32) -> bool {
        match &self.chunk {
            Some(chunk) => doc_id >= chunk.doc_base && doc_id < chunk.doc_base + chunk.doc_count,
            None => false,
        }
    }

    fn load_chunk(&mut self, chunk_index: usize) -> Result<()> {
        let expected_base = self.index.doc_base(chunk_index);
        let expected_count = self.index.doc_count(chunk_index);

        self.data
            .seek(SeekFrom::Start(self.index.start_pointer(chunk_index)))?;

        let doc_base = varint::read_u32(&mut self.data)?;
        let token = varint::read_u32(&mut self.data)?;
        let doc_count = token >> 1;
        let sliced = token & 1 != 0;

        if doc_base != expected_base || doc_count != expected_count {
            return Err(StrataError::format(format!(
                "chunk header disagrees with index: header ({doc_base}, {doc_count}), \
                 index ({expected_base}, {expected_count})"
            )));
        }

        let num_fields = packed::read_packed(&mut self.data, doc_count as usize)?;
        let lengths = packed::read_packed(&mut self.data, doc_count as usize)?;

        let mut offsets = Vec::with_capacity(doc_count as usize + 1);
        offsets.push(0u32);
        let mut total = 0u32;
        for (&len, &fields) in lengths.iter().zip(num_fields.iter()) {
            // Only the empty document serializes to zero bytes.
            if (len == 0) != (fields == 0) {
                return Err(StrataError::format(format!(
                    "corrupt chunk: document length {len} with {fields} stored fields"
                )));
            }
            total += len;
            offsets.push(total);
        }

        let total = total as usize;
        let mut bytes = Vec::with_capacity(total);
        if sliced {
            let mut remaining = total;
            while remaining > 0 {
                let slice_len = remaining.min(self.chunk_size);
                bytes.extend_from_slice(&self.read_compressed_frame(slice_len)?);
                remaining -= slice_len;
            }
        } else {
            bytes = self.read_compressed_frame(total)?;
        }

        self.chunk = Some(LoadedChunk {
            doc_base,
            doc_count,
            offsets,
            num_fields,
            bytes,
        });
        Ok(())
    }

    fn read_compressed_frame(&mut self, expected_len: usize) -> Result<Vec<u8>> {
        let compressed_len = varint::read_u32(&mut self.data)? as usize;
        let mut compressed = vec![0u8; compressed_len];
        self.data.read_exact(&mut compressed)?;
        self.decompressor.decompress(&compressed, expected_len)
    }

    fn ensure_chunk(&mut self, doc_id: u32) -> Result<()> {
        if !self.chunk_is_loaded(doc_id) {
            let chunk_index = self.index.chunk_containing(doc_id)?;
            self.load_chunk(chunk_index)?;
        }
        Ok(())
    }

    /// Return the still-serialized payload of a document, for bulk merge
    /// copies.
    pub fn serialized_document(&mut self, doc_id: u32) -> Result<SerializedDocument> {
        self.ensure_chunk(doc_id)?;
        let chunk = self.chunk.as_ref().unwrap();
        let slot = (doc_id - chunk.doc_base) as usize;
        let start = chunk.offsets[slot] as usize;
        let end = chunk.offsets[slot + 1] as usize;
        Ok(SerializedDocument {
            bytes: chunk.bytes[start..end].to_vec(),
            num_fields: chunk.num_fields[slot],
        })
    }

    /// Decode a document into its (field number, value) pairs in write
    /// order.
    pub fn document(&mut self, doc_id: u32) -> Result<Vec<(u32, FieldValue)>> {
        let serialized = self.serialized_document(doc_id)?;
        let mut cursor = std::io::Cursor::new(serialized.bytes.as_slice());

        let mut fields = Vec::with_capacity(serialized.num_fields as usize);
        for _ in 0..serialized.num_fields {
            let token = varint::read_u64(&mut cursor)?;
            let field_number = (token >> TYPE_BITS) as u32;
            let value = match token & TYPE_MASK {
                TYPE_STRING => {
                    let len = varint::read_u32(&mut cursor)? as usize;
                    let mut bytes = vec![0u8; len];
                    std::io::Read::read_exact(&mut cursor, &mut bytes)?;
                    FieldValue::Text(String::from_utf8(bytes).map_err(|e| {
                        StrataError::format(format!("stored string is not UTF-8: {e}"))
                    })?)
                }
                TYPE_BYTE_ARR => {
                    let len = varint::read_u32(&mut cursor)? as usize;
                    let mut bytes = vec![0u8; len];
                    std::io::Read::read_exact(&mut cursor, &mut bytes)?;
                    FieldValue::Binary(bytes)
                }
                TYPE_INT => FieldValue::Int(varint::read_zint(&mut cursor)?),
                TYPE_FLOAT => FieldValue::Float(varint::read_zfloat(&mut cursor)?),
                TYPE_LONG => FieldValue::Long(varint::read_tlong(&mut cursor)?),
                TYPE_DOUBLE => FieldValue::Double(varint::read_zdouble(&mut cursor)?),
                tag => {
                    return Err(StrataError::format(format!(
                        "unknown stored field type tag: {tag}"
                    )));
                }
            };
            fields.push((field_number, value));
        }

        Ok(fields)
    }

    /// Close the reader.
    pub fn close(&mut self) -> Result<()> {
        self.data.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::stored::writer::{StoredFieldsConfig, StoredFieldsWriter};

    fn write_docs(
        storage: &MemoryStorage,
        info: &SegmentInfo,
        config: StoredFieldsConfig,
        docs: &[Vec<(u32, FieldValue)>],
    ) {
        let mut writer = StoredFieldsWriter::new(storage, info, config).unwrap();
        for doc in docs {
            writer.start_document();
            for (number, value) in doc {
                writer.write_field(*number, value).unwrap();
            }
            writer.finish_document().unwrap();
        }
        writer.finish(docs.len() as u32).unwrap();
    }

    #[test]
    fn test_round_trip_all_types() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_r", 3);

        let docs = vec![
            vec![
                (0, FieldValue::Text("hello world".to_string())),
                (1, FieldValue::Binary(vec![0, 1, 2, 255])),
                (2, FieldValue::Int(-42)),
            ],
            vec![
                (0, FieldValue::Long(1_640_995_200_000)),
                (3, FieldValue::Float(-0.0)),
                (4, FieldValue::Double(std::f64::consts::PI)),
            ],
            vec![],
        ];

        write_docs(&storage, &info, StoredFieldsConfig::default(), &docs);

        let mut reader = StoredFieldsReader::open(&storage, &info).unwrap();
        assert_eq!(reader.max_doc(), 3);

        for (doc_id, expected) in docs.iter().enumerate() {
            let fields = reader.document(doc_id as u32).unwrap();
            assert_eq!(&fields, expected, "doc {doc_id}");
        }

        // Negative zero stays bit-exact.
        let fields = reader.document(1).unwrap();
        match fields[1].1 {
            FieldValue::Float(f) => assert_eq!(f.to_bits(), (-0.0f32).to_bits()),
            _ => panic!("expected float"),
        }

        reader.check_integrity().unwrap();
    }

    #[test]
    fn test_random_access_across_chunks() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_m", 50);

        let docs: Vec<Vec<(u32, FieldValue)>> = (0..50)
            .map(|i| vec![(0, FieldValue::Int(i)), (1, FieldValue::Long(i as i64 * 10))])
            .collect();

        // Small chunks force several of them.
        let config = StoredFieldsConfig {
            chunk_size: 64,
            max_docs_per_chunk: 7,
            compression: CompressionMode::Deflate,
        };
        write_docs(&storage, &info, config, &docs);

        let mut reader = StoredFieldsReader::open(&storage, &info).unwrap();
        // Access out of order.
        for &doc_id in &[49u32, 0, 25, 7, 6, 48, 1] {
            let fields = reader.document(doc_id).unwrap();
            assert_eq!(fields[0].1, FieldValue::Int(doc_id as i32));
            assert_eq!(fields[1].1, FieldValue::Long(doc_id as i64 * 10));
        }
    }

    #[test]
    fn test_sliced_chunk_round_trip() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_s", 3);

        // One giant document makes the buffer reach >= 2 * chunk_size,
        // forcing the sliced path.
        let big: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let docs = vec![
            vec![(0, FieldValue::Binary(big.clone()))],
            vec![(0, FieldValue::Text("after the big one".to_string()))],
            vec![(1, FieldValue::Double(-1.0 / 3.0))],
        ];

        let config = StoredFieldsConfig {
            chunk_size: 256,
            max_docs_per_chunk: 128,
            compression: CompressionMode::Deflate,
        };
        write_docs(&storage, &info, config, &docs);

        let mut reader = StoredFieldsReader::open(&storage, &info).unwrap();
        let fields = reader.document(0).unwrap();
        assert_eq!(fields[0].1, FieldValue::Binary(big));
        let fields = reader.document(2).unwrap();
        match fields[0].1 {
            FieldValue::Double(d) => assert_eq!(d.to_bits(), (-1.0f64 / 3.0).to_bits()),
            _ => panic!("expected double"),
        }
    }

    #[test]
    fn test_serialized_document_matches_reencoding() {
        let storage = MemoryStorage::new_default();
        let info = SegmentInfo::new("seg_b", 2);

        let docs = vec![
            vec![(0, FieldValue::Text("abc".to_string())), (1, FieldValue::Int(5))],
            vec![(2, FieldValue::Long(-1))],
        ];
        write_docs(&storage, &info, StoredFieldsConfig::default(), &docs);

        let mut reader = StoredFieldsReader::open(&storage, &info).unwrap();
        let serialized = reader.serialized_document(0).unwrap();
        assert_eq!(serialized.num_fields, 2);

        // The serialized span decodes to the same fields.
        let decoded = reader.document(0).unwrap();
        assert_eq!(decoded, docs[0]);
    }
}

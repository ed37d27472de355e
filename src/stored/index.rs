//! Chunk index for the stored-fields data file.
//!
//! A secondary file mapping document ID ranges to byte offsets in the data
//! file, so a reader can decompress exactly the chunk containing a target
//! document. The file is an append-only sequence of (doc count, start
//! pointer) pairs, closed by a terminal pair holding the total document
//! count and the final data-file offset.

use crate::error::{Result, StrataError};
use crate::storage::{Storage, StorageOutput, StructReader, StructWriter};

const STORED_INDEX_MAGIC: u32 = 0x53_53_46_58; // "SSFX"
const STORED_INDEX_VERSION: u32 = 1;

/// Append-only writer for the chunk index. Owned exclusively by the
/// stored-fields writer while the segment is being built.
pub struct StoredFieldsIndexWriter {
    writer: StructWriter<Box<dyn StorageOutput>>,
}

impl StoredFieldsIndexWriter {
    /// Create the index file.
    pub fn new(storage: &dyn Storage, file_name: &str, segment_id: &str) -> Result<Self> {
        let output = storage.create_output(file_name)?;
        let mut writer = StructWriter::new(output);
        writer.write_header(STORED_INDEX_MAGIC, STORED_INDEX_VERSION, segment_id)?;
        Ok(StoredFieldsIndexWriter { writer })
    }

    /// Record one flushed chunk.
    pub fn write_entry(&mut self, doc_count: u32, start_pointer: u64) -> Result<()> {
        self.writer.write_vint(doc_count)?;
        self.writer.write_vlong(start_pointer)
    }

    /// Write the terminal entry and seal the file.
    pub fn finish(mut self, total_docs: u32, final_pointer: u64) -> Result<()> {
        self.writer.write_vint(total_docs)?;
        self.writer.write_vlong(final_pointer)?;
        self.writer.close()
    }
}

/// The loaded, read-only chunk index of a sealed segment.
#[derive(Debug)]
pub struct StoredFieldsIndex {
    doc_bases: Vec<u32>,
    doc_counts: Vec<u32>,
    start_pointers: Vec<u64>,
    total_docs: u32,
    final_pointer: u64,
}

impl StoredFieldsIndex {
    /// Load and validate the chunk index.
    pub fn load(storage: &dyn Storage, file_name: &str, segment_id: &str) -> Result<Self> {
        let input = storage.open_input(file_name)?;
        let mut reader = StructReader::new(input)?;
        let (_, file_segment_id) =
            reader.read_header(STORED_INDEX_MAGIC, STORED_INDEX_VERSION, STORED_INDEX_VERSION)?;
        if file_segment_id != segment_id {
            return Err(StrataError::format(format!(
                "stored-fields index belongs to segment {file_segment_id}, expected {segment_id}"
            )));
        }

        let mut pairs: Vec<(u32, u64)> = Vec::new();
        while !reader.is_eof() {
            let doc_count = reader.read_vint()?;
            let pointer = reader.read_vlong()?;
            pairs.push((doc_count, pointer));
        }
        reader.verify_checksum()?;

        let (total_docs, final_pointer) = pairs
            .pop()
            .ok_or_else(|| StrataError::format("stored-fields index has no terminal entry"))?;

        let mut doc_bases = Vec::with_capacity(pairs.len());
        let mut doc_counts = Vec::with_capacity(pairs.len());
        let mut start_pointers = Vec::with_capacity(pairs.len());
        let mut base = 0u32;
        for (doc_count, pointer) in pairs {
            doc_bases.push(base);
            doc_counts.push(doc_count);
            start_pointers.push(pointer);
            base += doc_count;
        }

        if base != total_docs {
            return Err(StrataError::consistency(format!(
                "stored-fields index chunks cover {base} docs but terminal entry says {total_docs}"
            )));
        }

        Ok(StoredFieldsIndex {
            doc_bases,
            doc_counts,
            start_pointers,
            total_docs,
            final_pointer,
        })
    }

    /// Number of chunks.
    pub fn num_chunks(&self) -> usize {
        self.doc_bases.len()
    }

    /// Total document count recorded by the terminal entry.
    pub fn total_docs(&self) -> u32 {
        self.total_docs
    }

    /// Data-file offset just past the last chunk.
    pub fn final_pointer(&self) -> u64 {
        self.final_pointer
    }

    /// First document ID of a chunk.
    pub fn doc_base(&self, chunk: usize) -> u32 {
        self.doc_bases[chunk]
    }

    /// Document count of a chunk.
    pub fn doc_count(&self, chunk: usize) -> u32 {
        self.doc_counts[chunk]
    }

    /// Data-file offset of a chunk.
    pub fn start_pointer(&self, chunk: usize) -> u64 {
        self.start_pointers[chunk]
    }

    /// Find the chunk containing `doc_id`.
    pub fn chunk_containing(&self, doc_id: u32) -> Result<usize> {
        if doc_id >= self.total_docs {
            return Err(StrataError::format(format!(
                "document {doc_id} out of range ({} docs)",
                self.total_docs
            )));
        }
        // Last chunk whose base is <= doc_id.
        let chunk = match self.doc_bases.binary_search(&doc_id) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn build_index(chunks: &[(u32, u64)], total: u32, final_ptr: u64) -> StoredFieldsIndex {
        let storage = MemoryStorage::new_default();
        let mut writer = StoredFieldsIndexWriter::new(&storage, "s.sfx", "id").unwrap();
        for &(count, ptr) in chunks {
            writer.write_entry(count, ptr).unwrap();
        }
        writer.finish(total, final_ptr).unwrap();
        StoredFieldsIndex::load(&storage, "s.sfx", "id").unwrap()
    }

    #[test]
    fn test_lookup() {
        let index = build_index(&[(4, 100), (3, 200), (5, 350)], 12, 500);

        assert_eq!(index.num_chunks(), 3);
        assert_eq!(index.total_docs(), 12);
        assert_eq!(index.final_pointer(), 500);

        assert_eq!(index.chunk_containing(0).unwrap(), 0);
        assert_eq!(index.chunk_containing(3).unwrap(), 0);
        assert_eq!(index.chunk_containing(4).unwrap(), 1);
        assert_eq!(index.chunk_containing(6).unwrap(), 1);
        assert_eq!(index.chunk_containing(7).unwrap(), 2);
        assert_eq!(index.chunk_containing(11).unwrap(), 2);
        assert!(index.chunk_containing(12).is_err());

        assert_eq!(index.doc_base(1), 4);
        assert_eq!(index.start_pointer(1), 200);
        assert_eq!(index.doc_count(2), 5);
    }

    #[test]
    fn test_count_mismatch_detected() {
        let storage = MemoryStorage::new_default();
        let mut writer = StoredFieldsIndexWriter::new(&storage, "bad.sfx", "id").unwrap();
        writer.write_entry(4, 100).unwrap();
        // Terminal total disagrees with the chunk counts.
        writer.finish(9, 300).unwrap();

        let err = StoredFieldsIndex::load(&storage, "bad.sfx", "id").unwrap_err();
        assert!(matches!(err, StrataError::Consistency(_)));
    }

    #[test]
    fn test_empty_segment_index() {
        let index = build_index(&[], 0, 42);
        assert_eq!(index.num_chunks(), 0);
        assert_eq!(index.total_docs(), 0);
        assert!(index.chunk_containing(0).is_err());
    }
}

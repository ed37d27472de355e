//! Stored-fields persistence: chunked, compressed document payloads plus a
//! side index for random access.

pub mod index;
pub mod reader;
pub mod writer;

pub use index::{StoredFieldsIndex, StoredFieldsIndexWriter};
pub use reader::StoredFieldsReader;
pub use writer::{StoredFieldsConfig, StoredFieldsMergeSource, StoredFieldsWriter};

pub(crate) const STORED_DATA_MAGIC: u32 = 0x53_53_46_44; // "SSFD"
pub(crate) const STORED_DATA_VERSION: u32 = 1;

/// Bits of the field token used by the type tag.
pub(crate) const TYPE_BITS: u32 = 3;
pub(crate) const TYPE_MASK: u64 = (1 << TYPE_BITS) - 1;

pub(crate) const TYPE_STRING: u64 = 0x00;
pub(crate) const TYPE_BYTE_ARR: u64 = 0x01;
pub(crate) const TYPE_INT: u64 = 0x02;
pub(crate) const TYPE_FLOAT: u64 = 0x03;
pub(crate) const TYPE_LONG: u64 = 0x04;
pub(crate) const TYPE_DOUBLE: u64 = 0x05;

//! Storage abstraction layer.

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

pub use file::FileStorage;
pub use memory::{MemoryInput, MemoryStorage};
pub use structured::{verify_file_checksum, StructReader, StructWriter, FOOTER_LEN};
pub use traits::{Storage, StorageConfig, StorageError, StorageInput, StorageOutput};

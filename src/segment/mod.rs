//! Segment model: metadata, field table, live docs, flush writer and
//! reader.

pub mod field_infos;
pub mod info;
pub mod live_docs;
pub mod norms;
pub mod reader;
pub mod writer;

pub use field_infos::{FieldInfo, FieldInfos};
pub use info::{SegmentInfo, FORMAT_VERSION};
pub use live_docs::LiveDocs;
pub use reader::SegmentReader;
pub use writer::{SegmentWriter, SegmentWriterConfig};

use crate::storage::Storage;

/// Delete every file belonging to segment `name`, best-effort. Used when
/// discarding an in-progress or failed segment.
pub(crate) fn delete_segment_files(storage: &dyn Storage, name: &str) {
    let dot_prefix = format!("{name}.");
    let gen_prefix = format!("{name}_");
    let files = match storage.list_files() {
        Ok(files) => files,
        Err(e) => {
            log::warn!("failed to list files while discarding segment {name}: {e}");
            return;
        }
    };
    for file in files {
        if file.starts_with(&dot_prefix) || file.starts_with(&gen_prefix) {
            if let Err(e) = storage.delete_file(&file) {
                log::warn!("failed to delete {file} while discarding segment {name}: {e}");
            }
        }
    }
}

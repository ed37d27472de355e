//! Segment merging: per-source merge state, the multi-way merger, and
//! cooperative cancellation.

pub mod check_abort;
pub mod merger;
pub mod state;

pub use check_abort::{AbortAfter, CheckAbort, NoAbort};
pub use merger::{MergeConfig, SegmentMerger};
pub use state::MergeSource;

//! # Strata
//!
//! A segment-based, append-only document storage and merge engine.
//!
//! Documents are persisted into immutable, compressed, block-oriented
//! segments: stored field values go into chunked, compressed payloads with
//! a side index for random access, indexed terms into a shared term
//! dictionary with postings, positions and skip tables, plus per-field
//! norms and a live-docs deletion bitmap. Segments are combined by a
//! multi-way merge that preserves live/deleted-document semantics and can
//! be cancelled cooperatively.
//!
//! ## Features
//!
//! - Compact variable-length numeric encodings (VInt, zig-zag, timestamp
//!   and small-float fast paths)
//! - Chunked, compressed stored fields with random access by document ID
//! - Priority-queue multi-way segment merge with deletion remapping
//! - Crash consistency: no file is valid before its checksum footer
//! - Pluggable storage backends and compression codecs

pub mod cli;
pub mod compound;
pub mod document;
pub mod error;
pub mod merge;
pub mod postings;
pub mod segment;
pub mod storage;
pub mod stored;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

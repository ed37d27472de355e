//! Error types for the Strata library.
//!
//! All failures surface as the [`StrataError`] enum. The variants follow the
//! engine's error taxonomy: corrupt on-disk data is a format error, bad
//! caller input is an invalid-value error, writer/caller desynchronization is
//! a consistency error, and a cooperatively cancelled merge is reported
//! distinctly from a failed one.

use std::io;

use thiserror::Error;

/// The main error type for Strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// I/O errors from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed on-disk data: bad varint, unknown type tag, corrupt
    /// header or footer. Always fatal to the read operation.
    #[error("Format error: {0}")]
    Format(String),

    /// A field presented for storage has no encodable representation.
    #[error("Invalid field value: {0}")]
    InvalidFieldValue(String),

    /// Writer/caller desynchronization or corrupt source segment:
    /// doc-count mismatch at finish, out-of-order doc IDs during merge.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Storage-level errors (missing files, lock failures, closed storage).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A merge was cancelled through its abort callback. Distinct from
    /// failure so callers can tell "cancelled" from "failed".
    #[error("Merge aborted: {0}")]
    MergeAborted(String),

    /// Segment metadata (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Create a new format error.
    pub fn format<S: Into<String>>(msg: S) -> Self {
        StrataError::Format(msg.into())
    }

    /// Create a new invalid-field-value error.
    pub fn invalid_field_value<S: Into<String>>(msg: S) -> Self {
        StrataError::InvalidFieldValue(msg.into())
    }

    /// Create a new consistency error.
    pub fn consistency<S: Into<String>>(msg: S) -> Self {
        StrataError::Consistency(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        StrataError::Storage(msg.into())
    }

    /// Create a new merge-aborted error.
    pub fn aborted<S: Into<String>>(msg: S) -> Self {
        StrataError::MergeAborted(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        StrataError::Other(msg.into())
    }

    /// True if this error is a cooperative merge cancellation rather than a
    /// real failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, StrataError::MergeAborted(_))
    }
}

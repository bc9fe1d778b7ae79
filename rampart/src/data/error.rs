//! Dataset errors.

use std::io;

/// Errors produced while building, indexing or caching datasets.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// An index falls outside `[-len, len)`.
    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange {
        /// Requested index, before negative wrapping
        index: isize,
        /// Dataset length
        len: usize,
    },
    /// Operands that must share a length do not.
    #[error("lengths must match: expected {expected}, found {found}")]
    LengthMismatch {
        /// Length of the first operand
        expected: usize,
        /// Length of the offending operand
        found: usize,
    },
    /// An operator argument is outside its domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Elements cannot be merged into a batch.
    #[error("cannot collate elements: {0}")]
    Collate(String),
    /// A projection names a field the element does not have.
    #[error("element has no field {0}")]
    UnknownField(String),
    /// The registry has no dataset with this name.
    #[error("no dataset named {name:?}; available: {available:?}")]
    UnknownDataset {
        /// Requested name
        name: String,
        /// Registered names
        available: Vec<String>,
    },
    /// A parted dataset cannot produce the requested part.
    #[error("no part named {part:?}; available: {available:?}")]
    UnknownPart {
        /// Requested part
        part: String,
        /// Parts present or derivable
        available: Vec<String>,
    },
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Element (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    /// Metadata (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for dataset operations.
pub type DataResult<T> = Result<T, DataError>;

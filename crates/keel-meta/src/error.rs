//! Error types for the metadata subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for metadata store operations.
pub type MetaResult<T> = Result<T, MetaStoreError>;

/// Errors raised while encoding a record.
///
/// Decoding never fails: an unreadable record decodes as absent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The destination buffer cannot hold the encoded record.
    #[error("buffer too small: record needs {required} bytes, {available} available")]
    BufferTooSmall {
        /// Bytes needed from the offset onwards.
        required: usize,
        /// Bytes available from the offset onwards.
        available: usize,
    },

    /// A member id exceeds the encodable length.
    #[error("member id of {length} bytes exceeds the limit of {max}")]
    MemberIdTooLong {
        /// Length of the offending id in bytes.
        length: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// A member list exceeds the encodable count.
    #[error("member list of {count} entries exceeds the limit of {max}")]
    TooManyMembers {
        /// Number of members in the list.
        count: usize,
        /// Maximum accepted count.
        max: usize,
    },
}

/// Error variants for metadata store operations.
#[derive(Debug, Error)]
pub enum MetaStoreError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the metadata file lock.
    #[error("metadata file {path:?} is locked by another process")]
    Locked {
        /// The locked file.
        path: PathBuf,
    },

    /// The file exists but was written with an incompatible layout.
    #[error("invalid metadata file layout: {reason}")]
    InvalidLayout {
        /// Description of the mismatch.
        reason: String,
    },

    /// The store configuration is unusable.
    #[error("invalid metadata store config: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },

    /// An encoded record does not fit in its slot.
    #[error("{record} record of {size} bytes exceeds slot capacity of {capacity} bytes")]
    RecordTooLarge {
        /// Which record kind overflowed.
        record: &'static str,
        /// Encoded size in bytes.
        size: usize,
        /// Payload capacity of the slot in bytes.
        capacity: usize,
    },

    /// Encoding a record failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The store was closed through a shared handle.
    #[error("metadata store is closed")]
    Closed,
}

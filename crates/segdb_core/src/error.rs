//! Error types for segdb core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in segdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] segdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Index id is out of range for the schema.
    #[error("invalid index id {index_id}: schema has {index_count} indexes")]
    InvalidIndexId {
        /// The requested index id.
        index_id: usize,
        /// Number of indexes in the schema.
        index_count: usize,
    },

    /// Regex matching was requested on a multi-column index.
    #[error("cannot match regex on composite index {index_id} ({name})")]
    CompositeIndex {
        /// The requested index id.
        index_id: usize,
        /// Index name.
        name: String,
    },

    /// Regex matching was requested on an index over a non-string column.
    #[error("cannot match regex on non-string index {index_id} ({name})")]
    NonStringIndex {
        /// The requested index id.
        index_id: usize,
        /// Index name.
        name: String,
    },

    /// A readonly segment holds something other than a trie index where
    /// the schema promises one.
    #[error("index {index_id} ({name}) of segment {} is not a trie index", .segment.display())]
    NotRegexCapable {
        /// The requested index id.
        index_id: usize,
        /// Index name.
        name: String,
        /// Directory of the offending segment.
        segment: PathBuf,
    },

    /// The regex pattern could not be compiled.
    #[error("cannot compile regex {pattern:?}: {message}")]
    RegexCompile {
        /// The pattern as given.
        pattern: String,
        /// Parser or builder message.
        message: String,
    },

    /// The regex options string holds an unknown flag.
    #[error("unknown regex option {option:?}")]
    InvalidRegexOption {
        /// The offending flag character.
        option: char,
    },

    /// The schema is malformed, or a row does not fit it.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Segment data is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Write-ahead log is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// No segment at the given ordinal.
    #[error("segment {ordinal} not found: table has {count} segments")]
    SegmentNotFound {
        /// Requested ordinal.
        ordinal: usize,
        /// Number of segments in the table.
        count: usize,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for faults raised by argument validation, before any
    /// segment is visited.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidIndexId { .. }
                | Self::CompositeIndex { .. }
                | Self::NonStringIndex { .. }
                | Self::RegexCompile { .. }
                | Self::InvalidRegexOption { .. }
        )
    }
}

/// Encodes `value` as CBOR.
pub(crate) fn to_cbor<T: serde::Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(out)
}

/// Decodes a CBOR value.
pub(crate) fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_classification() {
        let err = CoreError::InvalidIndexId {
            index_id: 3,
            index_count: 3,
        };
        assert!(err.is_precondition());
        assert_eq!(err.to_string(), "invalid index id 3: schema has 3 indexes");

        let err = CoreError::NotRegexCapable {
            index_id: 0,
            name: "name".into(),
            segment: PathBuf::from("t/rd-0001"),
        };
        assert!(!err.is_precondition());
        assert!(err.to_string().contains("rd-0001"));
    }

    #[test]
    fn cbor_helpers_round_trip_and_fail_cleanly() {
        let bytes = to_cbor(&vec![1u32, 2, 3]).unwrap();
        let back: Vec<u32> = from_cbor(&bytes).unwrap();
        assert_eq!(back, vec![1, 2, 3]);

        let err = from_cbor::<Vec<u32>>(&[0xff, 0x00]).unwrap_err();
        assert!(matches!(err, CoreError::Codec { .. }));
    }
}

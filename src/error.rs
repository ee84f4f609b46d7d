//! Error types for bamread

use crate::io::bam::error::DecodeError;
use crate::io::bgzf::VirtualPosition;
use std::io;
use thiserror::Error;

/// Result type alias for bamread operations
pub type Result<T> = std::result::Result<T, BamError>;

/// Error types that can occur while decoding BAM/BGZF/BAI data
///
/// Clean end-of-stream is not an error: block and record reads report it
/// as `Ok(None)`.
#[derive(Debug, Error)]
pub enum BamError {
    /// I/O error from the underlying source
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed input: bad magic, broken BGZF framing, malformed header
    #[error("Invalid format: {0}")]
    Format(String),

    /// Stream ended inside a block or a record
    #[error("Truncated input: {0}")]
    Truncated(String),

    /// Missing index, coordinate out of range, or index/file mismatch
    #[error("Index error: {0}")]
    Index(String),

    /// Coordinate-sort order violated during a seek
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Tags whose sizes disagree with each other or with the record
    #[error("Inconsistent data: {0}")]
    Inconsistent(String),

    /// Record-level decode failure
    #[error("Record decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Position rejected by `set_position`
    #[error("Invalid position: {0}")]
    InvalidPosition(VirtualPosition),

    /// Operation the active backend cannot perform
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl BamError {
    /// True for errors caused by the input ending early.
    pub fn is_truncated(&self) -> bool {
        matches!(self, BamError::Truncated(_))
    }
}

// I/O errors are not Clone; they are rebuilt from kind and message so a
// failure can be replayed to later callers.
impl Clone for BamError {
    fn clone(&self) -> Self {
        match self {
            BamError::Io(e) => BamError::Io(io::Error::new(e.kind(), e.to_string())),
            BamError::Format(m) => BamError::Format(m.clone()),
            BamError::Truncated(m) => BamError::Truncated(m.clone()),
            BamError::Index(m) => BamError::Index(m.clone()),
            BamError::Corruption(m) => BamError::Corruption(m.clone()),
            BamError::Inconsistent(m) => BamError::Inconsistent(m.clone()),
            BamError::Decode(e) => BamError::Decode(e.clone()),
            BamError::InvalidPosition(p) => BamError::InvalidPosition(*p),
            BamError::Unsupported(m) => BamError::Unsupported(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_preserves_io_kind() {
        let err = BamError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        match err.clone() {
            BamError::Io(e) => {
                assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
                assert!(e.to_string().contains("denied"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_display_messages() {
        let err = BamError::Truncated("EOF inside BGZF block at offset 10".into());
        assert!(err.is_truncated());
        assert_eq!(
            err.to_string(),
            "Truncated input: EOF inside BGZF block at offset 10"
        );
        assert!(!BamError::Format("x".into()).is_truncated());
    }
}

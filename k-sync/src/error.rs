//! Error types for k-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from walk and sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bytes transferred for a file did not match its declared size.
    #[error("bad file copy: {path:?} {actual} != {expected}")]
    BadCopy {
        path: String,
        actual: u64,
        expected: u64,
    },

    /// Backslash escapes are not supported in ignore patterns.
    #[error("only simple patterns are supported: {0:?}")]
    BadPattern(String),

    /// The translated ignore pattern is not a valid regex.
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    PatternRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A frame on the wire failed to decode.
    #[error("frame decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The peer sent a frame out of protocol order.
    #[error("unexpected frame: expected {expected}")]
    UnexpectedFrame { expected: &'static str },

    /// The peer declared a frame larger than the protocol allows.
    #[error("frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(u32),

    /// The sender was asked for a path it never offered.
    #[error("peer requested undeclared path {0:?}")]
    UnknownPath(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

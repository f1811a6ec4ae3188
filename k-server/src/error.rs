//! Error types for k-server.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while assembling and running the router.
///
/// Per-route compile failures are logged and skipped by the mux; only
/// pattern syntax errors and listener/TLS failures abort startup.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Routing table parse error.
    #[error("routing table JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pattern is missing its `hostname/path` separator.
    #[error("pattern must be either {{hostname}}/... or /...: {0}")]
    BadPattern(String),

    /// A proxy target failed to parse as a URI.
    #[error("bad proxy target {target}: {source}")]
    BadTarget {
        target: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    /// A proxy target lacks a scheme or authority.
    #[error("proxy target must be an absolute URL: {0}")]
    RelativeTarget(String),

    /// A route's log format failed to compile.
    #[error("bad log format: {0}")]
    LogFormat(#[from] tera::Error),

    /// Binding or adopting a listener failed.
    #[error("listener error: {0}")]
    Listen(#[source] std::io::Error),

    /// The accept/serve loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Convenience constructor for [`ServerError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ServerError {
    ServerError::Io {
        path: path.into(),
        source,
    }
}

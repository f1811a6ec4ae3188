//! Error types for k-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while rendering the config tree.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A unit directive holds something other than a scalar, a list of
    /// scalars, or null.
    #[error("{unit}: [{section}] {key} holds an unsupported value kind")]
    BadValue {
        unit: String,
        section: String,
        key: String,
    },

    /// Routing table serialization error.
    #[error("routing table JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`RenderError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

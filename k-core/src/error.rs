//! Error types for k-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading and validating the config tree.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template execution failure (bad syntax, failing `decrypt`, …).
    #[error("failed to expand {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },

    /// Parse error — includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An app lists a dependency that no config file declares.
    #[error("unknown dependency: {0:?}")]
    UnknownDependency(String),

    /// The app dependency graph contains a cycle.
    #[error("recursive dependency: {0:?}")]
    RecursiveDependency(String),

    /// `Build` and `Deploy` are mutually exclusive on an app.
    #[error("{0}: .Build and .Deploy cannot be used in combination")]
    BuildDeployConflict(String),
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// All errors that can arise from vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Underlying I/O failure (key file, prompt), with annotated path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Interactive password prompt failed.
    #[error("password prompt failed: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("passwords did not match")]
    PasswordMismatch,

    /// The key file exists but does not hold exactly 32 bytes.
    #[error("vault key at {path} is not a 32 byte key")]
    BadKey { path: PathBuf },

    /// The encrypted value is not valid base64.
    #[error("invalid base64 in encrypted value: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to encrypt value")]
    Encrypt,

    /// Wrong key, truncated value, or tampered ciphertext.
    #[error("failed to decrypt {0:?}")]
    Decrypt(String),
}

//! # k-core
//!
//! Domain model for the `k` configuration tree: the typed root and per-app
//! records, template-driven loading with dependency validation, and the
//! vault that backs `decrypt` inside config templates.
//!
//! Public API surface:
//! - [`config`] — [`Config`], [`App`], [`Route`] and friends, plus [`config::load`]
//! - [`vault`] — [`Vault`]
//! - [`error`] — [`ConfigError`], [`VaultError`]

pub mod config;
pub mod error;
pub mod vault;

pub use config::{App, BasicAuth, Config, Route, Section, ServerConfig, Tunnel, Unit, Units, Vars};
pub use error::{ConfigError, VaultError};
pub use vault::Vault;

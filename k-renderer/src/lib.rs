//! # k-renderer
//!
//! Deterministic rendering of a loaded [`k_core::Config`] into a systemd
//! config tree: merged unit files, per-app env files, the `k-http.json`
//! routing table, per-app targets, `k.target`, and the
//! `multi-user.target.wants` symlink.
//!
//! The output is a pure function of `(Config, executable path)` — map
//! iteration is sorted, the route list is sorted by target, and every
//! generated unit carries a `# generated by k` banner — so trees can be
//! compared byte-for-byte for drift detection.

pub mod error;
pub mod render;

pub use error::RenderError;
pub use render::{merge, render};

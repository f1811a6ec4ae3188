//! # k-sync
//!
//! Fingerprint-based file-tree synchronization over any reliable byte
//! stream. The sender walks the source tree (gitignore-filtered), ships a
//! manifest of `path → {mode, size, sha-or-linktarget}`, receives the list
//! of paths the receiver is missing, streams exactly those file bodies, and
//! gets back the total count of changes applied — the caller's signal for
//! whether anything downstream needs a reload.

pub mod error;
pub mod ignore;
pub mod pipe;
pub mod walk;

pub use error::SyncError;
pub use pipe::Pipe;
pub use walk::{walk_tree, FileMeta};
